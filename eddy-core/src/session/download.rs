//! Download side of a peer connection.
//!
//! A [`DownloadSession`] issues one fetch request, waits for the length
//! announcement, then consumes the raw byte stream that follows on the same
//! socket. Compressed transfers are inflated with one persistent zlib stream
//! for the whole file.

use std::borrow::Cow;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use flate2::{Decompress, FlushDecompress, Status};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};

use super::DownloadUpdate;
use crate::protocol::types::{BZ_LIST, DC_LIST, XML_BZ_LIST, ext};
use crate::protocol::{AdcTransfer, Extensions, Message};
use crate::scheduler::{DownloadFailure, DownloadTicket};

/// Fetch command chosen from the peer's extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchMethod {
    /// `$ADCGET` for a path or `TTH/<hash>`, optionally zlib compressed
    Adc { identifier: String, zlib: bool },
    /// `$UGetZBlock`, always compressed
    ZBlock,
    /// `$UGetBlock`
    Block,
    /// `$Get` with a one based offset
    Legacy,
}

/// Catalog file to request from a peer with these extensions.
pub fn catalog_name(extensions: &Extensions) -> &'static str {
    if extensions.contains(ext::XML_BZ_LIST) {
        XML_BZ_LIST
    } else if extensions.contains(ext::BZ_LIST) {
        BZ_LIST
    } else {
        DC_LIST
    }
}

/// Picks the remote file name and fetch command for `ticket`.
///
/// Preference: ADC (hash addressed when possible) over Z-block over block
/// over legacy `$Get`.
pub fn select_fetch(extensions: &Extensions, ticket: &DownloadTicket) -> (String, FetchMethod) {
    let remote = if ticket.is_file_list() {
        catalog_name(extensions).to_string()
    } else {
        ticket.file.clone()
    };

    let method = if extensions.contains(ext::ADC_GET) {
        let identifier = match &ticket.tth {
            Some(tth) if extensions.contains(ext::TTHF) && !ticket.is_file_list() => {
                format!("TTH/{tth}")
            }
            _ => remote.clone(),
        };
        FetchMethod::Adc {
            identifier,
            zlib: extensions.contains(ext::ZLIG),
        }
    } else if extensions.contains(ext::GET_ZBLOCK) {
        FetchMethod::ZBlock
    } else if extensions.contains(ext::XML_BZ_LIST) {
        FetchMethod::Block
    } else {
        FetchMethod::Legacy
    };

    (remote, method)
}

/// Local path for a download from `nick`.
///
/// Files land in `<download_dir>/<nick>/<name>`. A fresh download of a
/// regular file never overwrites: an existing name gets a `1-`, `2-`, ...
/// prefix. Catalogs are overwritten and resumed files reuse the name.
pub async fn destination(
    download_dir: &Path,
    nick: &str,
    remote: &str,
    catalog: bool,
    offset: u64,
) -> PathBuf {
    let dir = download_dir.join(sanitize(nick));
    let base = sanitize(remote.rsplit(['\\', '/']).next().unwrap_or(remote));
    let path = dir.join(&base);
    if catalog || offset > 0 {
        return path;
    }

    let mut candidate = path;
    let mut counter = 0u32;
    while tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
        counter += 1;
        candidate = dir.join(format!("{counter}-{base}"));
    }
    candidate
}

fn sanitize(component: &str) -> String {
    let cleaned: String = component
        .chars()
        .map(|c| if matches!(c, '/' | '\\' | '\0') { '_' } else { c })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => "download".to_string(),
        _ => cleaned,
    }
}

/// What the connection driver must do next.
#[derive(Debug, Clone, PartialEq)]
pub enum DownloadStep {
    Send(Message),
    EnterRaw,
    ExitRaw,
    Update(DownloadUpdate),
    /// Close the connection once the steps are applied
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Requested,
    Streaming,
    Done,
}

#[derive(Debug)]
struct Sink {
    file: File,
    path: PathBuf,
    expected: u64,
    received: u64,
    inflater: Option<Decompress>,
    stream_ended: bool,
    raw: bool,
    last_reported: f64,
}

struct Decoded<'a> {
    bytes: Cow<'a, [u8]>,
    /// Input left after the end of the compressed stream
    leftover: usize,
}

impl Sink {
    fn decode<'a>(&mut self, data: &'a [u8]) -> Result<Decoded<'a>, DownloadFailure> {
        let Some(inflater) = self.inflater.as_mut() else {
            return Ok(Decoded {
                bytes: Cow::Borrowed(data),
                leftover: 0,
            });
        };
        if self.stream_ended {
            return Ok(Decoded {
                bytes: Cow::Borrowed(&[]),
                leftover: data.len(),
            });
        }

        let (bytes, ended, leftover) =
            inflate(inflater, data).map_err(|e| DownloadFailure::Decompression {
                reason: e.to_string(),
            })?;
        self.stream_ended = ended;
        Ok(Decoded {
            bytes: Cow::Owned(bytes),
            leftover,
        })
    }

    fn is_complete(&self) -> bool {
        self.received == self.expected && (self.inflater.is_none() || self.stream_ended)
    }
}

/// Feeds `input` through a persistent zlib stream.
///
/// Returns the inflated bytes, whether the stream ended, and how many input
/// bytes followed the end of the stream.
fn inflate(
    inflater: &mut Decompress,
    mut input: &[u8],
) -> Result<(Vec<u8>, bool, usize), flate2::DecompressError> {
    let mut output = Vec::with_capacity(input.len().saturating_mul(4).max(1024));
    loop {
        if output.capacity() - output.len() < 1024 {
            output.reserve(output.capacity().max(1024));
        }
        let before_in = inflater.total_in();
        let before_out = inflater.total_out();
        let status = inflater.decompress_vec(input, &mut output, FlushDecompress::None)?;
        let consumed = (inflater.total_in() - before_in) as usize;
        input = &input[consumed..];

        if status == Status::StreamEnd {
            return Ok((output, true, input.len()));
        }
        let progressed = consumed > 0 || inflater.total_out() > before_out;
        let drained = output.len() < output.capacity();
        if (input.is_empty() && drained) || !progressed {
            return Ok((output, false, input.len()));
        }
    }
}

/// One download running on a peer connection.
#[derive(Debug)]
pub struct DownloadSession {
    ticket: DownloadTicket,
    remote_file: String,
    method: FetchMethod,
    download_dir: PathBuf,
    progress_step: f64,
    phase: Phase,
    sink: Option<Sink>,
}

impl DownloadSession {
    /// Creates the session and the request message to send.
    pub fn begin(
        ticket: DownloadTicket,
        extensions: &Extensions,
        download_dir: PathBuf,
        progress_step: f64,
    ) -> (Self, Message) {
        let (remote_file, method) = select_fetch(extensions, &ticket);
        let size = ticket
            .size
            .map(|size| size.saturating_sub(ticket.offset))
            .and_then(|size| i64::try_from(size).ok())
            .unwrap_or(-1);

        let request = match &method {
            FetchMethod::Adc { identifier, zlib } => Message::AdcGet(AdcTransfer {
                kind: "file".to_string(),
                identifier: identifier.clone(),
                offset: ticket.offset,
                size,
                zlib: *zlib,
            }),
            FetchMethod::ZBlock => Message::UGetZBlock {
                offset: ticket.offset,
                size,
                file: remote_file.clone(),
            },
            FetchMethod::Block => Message::UGetBlock {
                offset: ticket.offset,
                size,
                file: remote_file.clone(),
            },
            FetchMethod::Legacy => Message::Get {
                file: remote_file.clone(),
                offset: ticket.offset,
            },
        };
        tracing::debug!("Requesting {} from {} via {:?}", remote_file, ticket.nick, method);

        let session = Self {
            ticket,
            remote_file,
            method,
            download_dir,
            progress_step,
            phase: Phase::Requested,
            sink: None,
        };
        (session, request)
    }

    pub fn ticket(&self) -> &DownloadTicket {
        &self.ticket
    }

    pub fn method(&self) -> &FetchMethod {
        &self.method
    }

    pub fn remote_file(&self) -> &str {
        &self.remote_file
    }

    pub fn is_streaming(&self) -> bool {
        self.phase == Phase::Streaming
    }

    pub fn is_done(&self) -> bool {
        self.phase == Phase::Done
    }

    /// Handles a reply to our request.
    ///
    /// Returns `None` for messages that are not a reply, leaving them to the
    /// caller.
    pub async fn on_message(&mut self, message: &Message) -> Option<Vec<DownloadStep>> {
        if self.phase != Phase::Requested {
            return None;
        }

        let steps = match message {
            Message::FileLength { size } => {
                let expected = size.saturating_sub(self.ticket.offset);
                self.start(expected, false, true).await
            }
            Message::AdcSnd(transfer) => {
                let expected = u64::try_from(transfer.size).ok().or_else(|| self.remaining());
                match expected {
                    Some(expected) => self.start(expected, transfer.zlib, false).await,
                    None => self.abort(DownloadFailure::UnknownLength).await,
                }
            }
            Message::Sending { size } => {
                let zlib = self.method == FetchMethod::ZBlock;
                match size.or_else(|| self.remaining()) {
                    Some(expected) => self.start(expected, zlib, false).await,
                    None => self.abort(DownloadFailure::UnknownLength).await,
                }
            }
            Message::MaxedOut => self.abort(DownloadFailure::NoSlots).await,
            Message::Error { message } | Message::Failed { message } => {
                self.abort(DownloadFailure::Rejected {
                    message: message.clone(),
                })
                .await
            }
            _ => return None,
        };
        Some(steps)
    }

    /// Consumes a chunk of the raw transfer stream.
    pub async fn on_data(&mut self, data: &[u8]) -> Vec<DownloadStep> {
        let decoded = match self.sink.as_mut() {
            Some(sink) => sink.decode(data),
            None => return Vec::new(),
        };
        let decoded = match decoded {
            Ok(decoded) => decoded,
            Err(reason) => return self.abort(reason).await,
        };

        let Some(sink) = self.sink.as_mut() else {
            return Vec::new();
        };
        let total = sink.received + decoded.bytes.len() as u64;
        if total > sink.expected || decoded.leftover > 0 {
            let expected = sink.expected;
            tracing::warn!(
                "{} sent more than the announced {} bytes for {}",
                self.ticket.nick,
                expected,
                self.remote_file
            );
            return self
                .abort(DownloadFailure::SizeMismatch {
                    expected,
                    received: total + decoded.leftover as u64,
                })
                .await;
        }

        if let Err(e) = sink.file.write_all(&decoded.bytes).await {
            return self.abort(io_failure(&e)).await;
        }
        sink.received = total;

        if sink.is_complete() {
            return self.finish().await;
        }

        let mut steps = Vec::new();
        if sink.expected > 0 {
            let percent = sink.received as f64 * 100.0 / sink.expected as f64;
            if percent - sink.last_reported >= self.progress_step {
                if let Err(e) = sink.file.flush().await {
                    return self.abort(io_failure(&e)).await;
                }
                sink.last_reported = percent;
                steps.push(DownloadStep::Update(DownloadUpdate::Progress {
                    id: self.ticket.id,
                    received: sink.received,
                    size: sink.expected,
                    percent,
                }));
            }
        }
        steps
    }

    /// Fails the download, closing and cleaning up the local file.
    pub async fn abort(&mut self, reason: DownloadFailure) -> Vec<DownloadStep> {
        self.phase = Phase::Done;
        let mut steps = Vec::new();
        if let Some(sink) = self.sink.take() {
            if sink.raw {
                steps.push(DownloadStep::ExitRaw);
            }
            self.close_sink(sink).await;
        }
        tracing::info!("Download of {} from {} failed: {}", self.remote_file, self.ticket.nick, reason);
        steps.push(DownloadStep::Update(DownloadUpdate::Failed {
            id: self.ticket.id,
            reason,
        }));
        steps
    }

    fn remaining(&self) -> Option<u64> {
        self.ticket
            .size
            .map(|size| size.saturating_sub(self.ticket.offset))
    }

    async fn start(&mut self, expected: u64, zlib: bool, legacy: bool) -> Vec<DownloadStep> {
        let catalog = self.ticket.is_file_list();
        let path = destination(
            &self.download_dir,
            &self.ticket.nick,
            &self.remote_file,
            catalog,
            self.ticket.offset,
        )
        .await;

        let file = match open_destination(&path, self.ticket.offset).await {
            Ok(file) => file,
            Err(e) => return self.abort(io_failure(&e)).await,
        };
        tracing::info!(
            "Receiving {} bytes of {} from {} into {}",
            expected,
            self.remote_file,
            self.ticket.nick,
            path.display()
        );

        let mut steps = vec![DownloadStep::Update(DownloadUpdate::Started {
            id: self.ticket.id,
            size: expected,
        })];
        if legacy {
            steps.push(DownloadStep::Send(Message::Send));
        }

        self.phase = Phase::Streaming;
        let raw = expected > 0 || zlib;
        self.sink = Some(Sink {
            file,
            path,
            expected,
            received: 0,
            inflater: zlib.then(|| Decompress::new(true)),
            stream_ended: false,
            raw,
            last_reported: 0.0,
        });

        if raw {
            steps.push(DownloadStep::EnterRaw);
        } else {
            steps.extend(self.finish().await);
        }
        steps
    }

    async fn finish(&mut self) -> Vec<DownloadStep> {
        let Some(mut sink) = self.sink.take() else {
            return Vec::new();
        };
        if let Err(e) = sink.file.flush().await {
            self.sink = Some(sink);
            return self.abort(io_failure(&e)).await;
        }
        self.phase = Phase::Done;

        let mut steps = Vec::new();
        if sink.raw {
            steps.push(DownloadStep::ExitRaw);
        }
        let path = sink.path.clone();
        self.close_sink(sink).await;
        tracing::info!("Finished {} from {}", self.remote_file, self.ticket.nick);

        steps.push(DownloadStep::Update(DownloadUpdate::Finished {
            id: self.ticket.id,
            path,
        }));
        if self.ticket.is_file_list() {
            steps.push(DownloadStep::Close);
        }
        steps
    }

    async fn close_sink(&self, mut sink: Sink) {
        if let Err(e) = sink.file.flush().await {
            tracing::warn!("Failed to flush {}: {}", sink.path.display(), e);
        }
        drop(sink.file);
        if sink.received == 0 && self.ticket.offset == 0 {
            if let Err(e) = tokio::fs::remove_file(&sink.path).await {
                tracing::debug!("Could not remove empty {}: {}", sink.path.display(), e);
            }
        }
    }
}

async fn open_destination(path: &Path, offset: u64) -> std::io::Result<File> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(offset == 0)
        .open(path)
        .await?;
    if offset > 0 {
        file.seek(SeekFrom::Start(offset)).await?;
    }
    Ok(file)
}

fn io_failure(error: &std::io::Error) -> DownloadFailure {
    DownloadFailure::Io {
        reason: error.to_string(),
    }
}
