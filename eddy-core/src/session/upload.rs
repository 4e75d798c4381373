//! Upload side of a peer connection.
//!
//! Requests are resolved against the local index and gated by the shared
//! upload slots. An accepted request yields an [`UploadStream`] that reads
//! the file in fixed chunks, optionally deflates them, and paces writes with
//! a token bucket.

use std::io::SeekFrom;
use std::sync::Arc;

use flate2::{Compress, Compression, FlushCompress, Status};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use super::SessionError;
use crate::network::TokenBucket;
use crate::protocol::{AdcTransfer, Message};
use crate::share::{LocalFileIndex, is_catalog_name};
use crate::slots::{SharedSlotGate, UploadSlotPermit};

const NOT_AVAILABLE: &str = "File Not Available";

/// How the peer asked for the file; decides the reply and framing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadMethod {
    Adc { kind: String },
    Block,
    ZBlock,
    Legacy,
}

/// A fetch request received from a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
    pub identifier: String,
    pub offset: u64,
    /// Requested byte count; `None` for the rest of the file
    pub size: Option<u64>,
    pub zlib: bool,
    pub method: UploadMethod,
}

impl UploadRequest {
    /// Extracts a fetch request, or `None` if `message` is not one.
    pub fn from_message(message: &Message) -> Option<Self> {
        let request = match message {
            Message::Get { file, offset } => Self {
                identifier: file.clone(),
                offset: *offset,
                size: None,
                zlib: false,
                method: UploadMethod::Legacy,
            },
            Message::AdcGet(transfer) => Self {
                identifier: transfer.identifier.clone(),
                offset: transfer.offset,
                size: u64::try_from(transfer.size).ok(),
                zlib: transfer.zlib,
                method: UploadMethod::Adc {
                    kind: transfer.kind.clone(),
                },
            },
            Message::UGetBlock { offset, size, file } => Self {
                identifier: file.clone(),
                offset: *offset,
                size: u64::try_from(*size).ok(),
                zlib: false,
                method: UploadMethod::Block,
            },
            Message::UGetZBlock { offset, size, file } => Self {
                identifier: file.clone(),
                offset: *offset,
                size: u64::try_from(*size).ok(),
                zlib: true,
                method: UploadMethod::ZBlock,
            },
            _ => return None,
        };
        Some(request)
    }

    fn rejection(&self, text: &str) -> Message {
        match self.method {
            UploadMethod::Block | UploadMethod::ZBlock => Message::Failed {
                message: text.to_string(),
            },
            _ => Message::Error {
                message: text.to_string(),
            },
        }
    }
}

/// Outcome of a fetch request.
#[derive(Debug)]
pub enum UploadReply {
    /// Refuse with this message
    Reject(Message),
    /// Send `reply`, then stream immediately
    Stream { reply: Message, stream: UploadStream },
    /// Send `reply`, then wait for `$Send`
    AwaitSend { reply: Message, stream: UploadStream },
}

/// Serves fetch requests on one connection.
#[derive(Clone)]
pub struct UploadSession {
    index: Arc<dyn LocalFileIndex>,
    slots: SharedSlotGate,
    chunk_size: usize,
    ops_per_second: u64,
}

impl UploadSession {
    pub fn new(
        index: Arc<dyn LocalFileIndex>,
        slots: SharedSlotGate,
        chunk_size: usize,
        ops_per_second: u64,
    ) -> Self {
        Self {
            index,
            slots,
            chunk_size: chunk_size.max(1),
            ops_per_second,
        }
    }

    /// Resolves a request into a reply and, if accepted, a stream.
    ///
    /// Catalog requests bypass the slot limit.
    pub async fn handle_request(&self, request: &UploadRequest) -> UploadReply {
        let Some(listing) = self.index.lookup(&request.identifier).await else {
            tracing::debug!("Requested file {} is not shared", request.identifier);
            return UploadReply::Reject(request.rejection(NOT_AVAILABLE));
        };
        if request.offset > listing.size {
            return UploadReply::Reject(request.rejection("Offset beyond end of file"));
        }

        let available = listing.size - request.offset;
        let size = request.size.map_or(available, |size| size.min(available));

        let permit = if is_catalog_name(&request.identifier) {
            None
        } else {
            match UploadSlotPermit::try_acquire(&self.slots) {
                Some(permit) => Some(permit),
                None => {
                    tracing::info!("No free upload slot for {}", request.identifier);
                    return UploadReply::Reject(Message::MaxedOut);
                }
            }
        };

        let file = match open_at(&listing.path, request.offset).await {
            Ok(file) => file,
            Err(e) => {
                tracing::warn!("Cannot open {}: {}", listing.path.display(), e);
                return UploadReply::Reject(request.rejection(NOT_AVAILABLE));
            }
        };

        let stream = UploadStream {
            file,
            name: request.identifier.clone(),
            size,
            remaining: size,
            chunk_size: self.chunk_size,
            compressor: request
                .zlib
                .then(|| Compress::new(Compression::default(), true)),
            finished: false,
            throttle: TokenBucket::per_second(self.ops_per_second),
            _permit: permit,
        };

        match &request.method {
            UploadMethod::Adc { kind } => UploadReply::Stream {
                reply: Message::AdcSnd(AdcTransfer {
                    kind: kind.clone(),
                    identifier: request.identifier.clone(),
                    offset: request.offset,
                    size: i64::try_from(size).unwrap_or(i64::MAX),
                    zlib: request.zlib,
                }),
                stream,
            },
            UploadMethod::Block | UploadMethod::ZBlock => UploadReply::Stream {
                reply: Message::Sending { size: Some(size) },
                stream,
            },
            UploadMethod::Legacy => UploadReply::AwaitSend {
                reply: Message::FileLength { size: listing.size },
                stream,
            },
        }
    }
}

async fn open_at(path: &std::path::Path, offset: u64) -> std::io::Result<File> {
    let mut file = File::open(path).await?;
    if offset > 0 {
        file.seek(SeekFrom::Start(offset)).await?;
    }
    Ok(file)
}

/// An accepted upload. Holds its slot until dropped.
#[derive(Debug)]
pub struct UploadStream {
    file: File,
    name: String,
    size: u64,
    remaining: u64,
    chunk_size: usize,
    compressor: Option<Compress>,
    finished: bool,
    throttle: TokenBucket,
    _permit: Option<UploadSlotPermit>,
}

impl UploadStream {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Uncompressed bytes this stream delivers.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Uncompressed bytes read so far.
    pub fn sent(&self) -> u64 {
        self.size - self.remaining
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Waits for the rate limiter to allow the next write.
    pub async fn pace(&mut self) {
        self.throttle.acquire().await;
    }

    /// Reads and encodes the next chunk. `None` once the stream is complete.
    ///
    /// # Errors
    ///
    /// - `SessionError::Io` - The file could not be read or is shorter than announced
    /// - `SessionError::Compression` - The deflate stream failed
    pub async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, SessionError> {
        if self.finished {
            return Ok(None);
        }

        let want = self.remaining.min(self.chunk_size as u64) as usize;
        let mut chunk = vec![0u8; want];
        if want > 0 {
            self.file.read_exact(&mut chunk).await?;
        }
        self.remaining -= want as u64;
        let last = self.remaining == 0;

        let chunk = match self.compressor.as_mut() {
            Some(compressor) => {
                deflate(compressor, &chunk, last).map_err(|e| SessionError::Compression {
                    reason: e.to_string(),
                })?
            }
            None => chunk,
        };
        self.finished = last;
        Ok(Some(chunk))
    }
}

/// Feeds `input` through a persistent zlib stream, finishing it on `last`.
fn deflate(compressor: &mut Compress, mut input: &[u8], last: bool) -> Result<Vec<u8>, flate2::CompressError> {
    let flush = if last {
        FlushCompress::Finish
    } else {
        FlushCompress::None
    };
    let mut output = Vec::with_capacity(input.len() / 2 + 64);
    loop {
        if output.capacity() - output.len() < 64 {
            output.reserve(output.capacity().max(64));
        }
        let before_in = compressor.total_in();
        let before_out = compressor.total_out();
        let status = compressor.compress_vec(input, &mut output, flush)?;
        let consumed = (compressor.total_in() - before_in) as usize;
        input = &input[consumed..];

        if status == Status::StreamEnd {
            return Ok(output);
        }
        let progressed = consumed > 0 || compressor.total_out() > before_out;
        if (!last && input.is_empty()) || !progressed {
            return Ok(output);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use flate2::read::ZlibDecoder;

    use super::*;
    use crate::protocol::types::XML_BZ_LIST;
    use crate::share::{Listing, MemoryIndex};
    use crate::slots::shared_gate;

    struct Fixture {
        _dir: tempfile::TempDir,
        index: Arc<dyn LocalFileIndex>,
    }

    async fn fixture(content: &[u8]) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.txt");
        let catalog = dir.path().join("files.xml.bz2");
        tokio::fs::write(&file, content).await.unwrap();
        tokio::fs::write(&catalog, b"catalog").await.unwrap();

        let mut index = MemoryIndex::new();
        index.add(Listing {
            name: "a.txt".to_string(),
            path: file,
            size: content.len() as u64,
            tth: Some("HASH".to_string()),
        });
        index.set_catalog(catalog, 7);
        Fixture {
            _dir: dir,
            index: Arc::new(index),
        }
    }

    fn get(file: &str) -> UploadRequest {
        UploadRequest::from_message(&Message::Get {
            file: file.to_string(),
            offset: 0,
        })
        .unwrap()
    }

    async fn drain(stream: &mut UploadStream) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(chunk) = stream.next_chunk().await.unwrap() {
            out.extend(chunk);
        }
        out
    }

    #[test]
    fn test_requests_from_messages() {
        let adc = UploadRequest::from_message(&Message::AdcGet(AdcTransfer {
            kind: "file".to_string(),
            identifier: "TTH/HASH".to_string(),
            offset: 3,
            size: -1,
            zlib: true,
        }))
        .unwrap();
        assert_eq!(adc.size, None);
        assert!(adc.zlib);

        let zblock = UploadRequest::from_message(&Message::UGetZBlock {
            offset: 0,
            size: 5,
            file: "a.txt".to_string(),
        })
        .unwrap();
        assert_eq!(zblock.method, UploadMethod::ZBlock);
        assert_eq!(zblock.size, Some(5));

        assert!(UploadRequest::from_message(&Message::Send).is_none());
    }

    #[tokio::test]
    async fn test_legacy_get_waits_for_send() {
        let fixture = fixture(b"0123456789").await;
        let session = UploadSession::new(fixture.index, shared_gate(1), 4, 1000);

        match session.handle_request(&get("a.txt")).await {
            UploadReply::AwaitSend { reply, mut stream } => {
                assert_eq!(reply, Message::FileLength { size: 10 });
                assert_eq!(drain(&mut stream).await, b"0123456789");
                assert_eq!(stream.sent(), 10);
            }
            other => panic!("unexpected reply {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_file_is_rejected() {
        let fixture = fixture(b"x").await;
        let session = UploadSession::new(fixture.index, shared_gate(1), 4, 1000);

        match session.handle_request(&get("missing.txt")).await {
            UploadReply::Reject(message) => assert_eq!(
                message,
                Message::Error {
                    message: "File Not Available".to_string(),
                }
            ),
            other => panic!("unexpected reply {other:?}"),
        }

        let block = UploadRequest::from_message(&Message::UGetBlock {
            offset: 0,
            size: -1,
            file: "missing.txt".to_string(),
        })
        .unwrap();
        assert!(matches!(
            session.handle_request(&block).await,
            UploadReply::Reject(Message::Failed { .. })
        ));
    }

    #[tokio::test]
    async fn test_maxed_out_except_for_catalog() {
        let fixture = fixture(b"0123456789").await;
        let slots = shared_gate(1);
        let session = UploadSession::new(fixture.index, slots.clone(), 4, 1000);

        let first = session.handle_request(&get("a.txt")).await;
        assert!(matches!(first, UploadReply::AwaitSend { .. }));
        assert_eq!(slots.lock().available(), 0);

        assert!(matches!(
            session.handle_request(&get("a.txt")).await,
            UploadReply::Reject(Message::MaxedOut)
        ));
        assert!(matches!(
            session.handle_request(&get(XML_BZ_LIST)).await,
            UploadReply::AwaitSend { .. }
        ));

        drop(first);
        assert_eq!(slots.lock().available(), 1);
    }

    #[tokio::test]
    async fn test_adc_request_by_hash_with_compression() {
        let content: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
        let fixture = fixture(&content).await;
        let session = UploadSession::new(fixture.index, shared_gate(1), 1024, 1000);

        let request = UploadRequest::from_message(&Message::AdcGet(AdcTransfer {
            kind: "file".to_string(),
            identifier: "TTH/HASH".to_string(),
            offset: 100,
            size: -1,
            zlib: true,
        }))
        .unwrap();

        match session.handle_request(&request).await {
            UploadReply::Stream { reply, mut stream } => {
                assert_eq!(
                    reply,
                    Message::AdcSnd(AdcTransfer {
                        kind: "file".to_string(),
                        identifier: "TTH/HASH".to_string(),
                        offset: 100,
                        size: 4900,
                        zlib: true,
                    })
                );
                let compressed = drain(&mut stream).await;
                let mut inflated = Vec::new();
                ZlibDecoder::new(compressed.as_slice())
                    .read_to_end(&mut inflated)
                    .unwrap();
                assert_eq!(inflated, content[100..]);
            }
            other => panic!("unexpected reply {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_block_request_is_bounded_by_size() {
        let fixture = fixture(b"0123456789").await;
        let session = UploadSession::new(fixture.index, shared_gate(1), 4, 1000);
        let request = UploadRequest::from_message(&Message::UGetBlock {
            offset: 2,
            size: 5,
            file: "a.txt".to_string(),
        })
        .unwrap();

        match session.handle_request(&request).await {
            UploadReply::Stream { reply, mut stream } => {
                assert_eq!(reply, Message::Sending { size: Some(5) });
                assert_eq!(drain(&mut stream).await, b"23456");
            }
            other => panic!("unexpected reply {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_empty_compressed_stream_is_still_terminated() {
        let fixture = fixture(b"").await;
        let session = UploadSession::new(fixture.index, shared_gate(1), 4, 1000);
        let request = UploadRequest::from_message(&Message::UGetZBlock {
            offset: 0,
            size: -1,
            file: "a.txt".to_string(),
        })
        .unwrap();

        let UploadReply::Stream { mut stream, .. } = session.handle_request(&request).await else {
            panic!("expected a stream");
        };
        let compressed = drain(&mut stream).await;
        assert!(!compressed.is_empty());
        let mut inflated = Vec::new();
        ZlibDecoder::new(compressed.as_slice())
            .read_to_end(&mut inflated)
            .unwrap();
        assert!(inflated.is_empty());
    }
}
