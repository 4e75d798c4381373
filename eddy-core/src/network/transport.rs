//! Byte-stream framing with text/raw mode switching.
//!
//! Hub and peer connections carry `|`-terminated text frames. File data on a
//! peer connection is sent inline on the same socket, so the reader must be
//! able to stop framing at a message boundary and hand every following byte,
//! including whatever is already buffered, to a binary consumer.

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::TransportError;
use crate::protocol::{Message, MessageCodec};

const FRAME_DELIMITER: u8 = b'|';
const READ_CHUNK: usize = 16 * 1024;

/// One unit of inbound data handed to a session.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// A decoded text frame
    Frame(Message),
    /// Binary payload received while in raw mode
    Raw(Bytes),
}

/// Incremental frame extractor.
///
/// Bytes are pushed in arbitrary fragments; complete frames are pulled out
/// one at a time so the consumer can switch to raw mode between frames.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buffer: BytesMut,
    raw: bool,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends received bytes.
    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Extracts the next complete frame, or all buffered bytes in raw mode.
    pub fn next_inbound(&mut self) -> Option<Inbound> {
        if self.raw {
            if self.buffer.is_empty() {
                return None;
            }
            return Some(Inbound::Raw(self.buffer.split().freeze()));
        }

        let end = self.buffer.iter().position(|&b| b == FRAME_DELIMITER)?;
        let frame = self.buffer.split_to(end);
        self.buffer.advance(1);
        Some(Inbound::Frame(MessageCodec::parse(&frame)))
    }

    /// Switches to raw mode; buffered bytes are delivered as raw data.
    pub fn enter_raw_mode(&mut self) {
        self.raw = true;
    }

    /// Resumes text framing.
    pub fn exit_raw_mode(&mut self) {
        self.raw = false;
    }

    pub fn is_raw(&self) -> bool {
        self.raw
    }

    /// Number of bytes not yet handed out.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Drops any partial frame.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

/// Framed connection over any async byte stream.
pub struct Connection<S> {
    stream: S,
    frames: FrameBuffer,
    read_buf: BytesMut,
    label: String,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wraps a stream; `label` identifies the remote end in logs.
    pub fn new(stream: S, label: impl Into<String>) -> Self {
        Self {
            stream,
            frames: FrameBuffer::new(),
            read_buf: BytesMut::with_capacity(READ_CHUNK),
            label: label.into(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn set_label(&mut self, label: impl Into<String>) {
        self.label = label.into();
    }

    /// Reads until a frame or raw chunk is available.
    ///
    /// Returns `Ok(None)` when the remote side closes the stream; a partial
    /// frame left in the buffer at that point is discarded. Cancel safe: no
    /// bytes are lost if the future is dropped while waiting for the socket.
    pub async fn next_inbound(&mut self) -> Result<Option<Inbound>, TransportError> {
        loop {
            if let Some(inbound) = self.frames.next_inbound() {
                if let Inbound::Frame(message) = &inbound {
                    tracing::trace!("{} -> {:?}", self.label, message);
                }
                return Ok(Some(inbound));
            }

            self.read_buf.clear();
            self.read_buf.reserve(READ_CHUNK);
            let read = self.stream.read_buf(&mut self.read_buf).await?;
            if read == 0 {
                if self.frames.buffered() > 0 {
                    tracing::debug!(
                        "{} closed with {} unframed bytes",
                        self.label,
                        self.frames.buffered()
                    );
                }
                self.frames.clear();
                return Ok(None);
            }
            self.frames.push(&self.read_buf);
        }
    }

    /// Serializes and writes one message.
    pub async fn send(&mut self, message: &Message) -> Result<(), TransportError> {
        tracing::trace!("{} <- {:?}", self.label, message);
        self.stream.write_all(&message.to_wire()).await?;
        Ok(())
    }

    /// Writes raw bytes without framing.
    pub async fn send_raw(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.stream.write_all(data).await?;
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<(), TransportError> {
        self.stream.flush().await?;
        Ok(())
    }

    pub fn enter_raw_mode(&mut self) {
        self.frames.enter_raw_mode();
    }

    pub fn exit_raw_mode(&mut self) {
        self.frames.exit_raw_mode();
    }

    pub fn is_raw(&self) -> bool {
        self.frames.is_raw()
    }

    /// Shuts down the write half.
    pub async fn shutdown(&mut self) -> Result<(), TransportError> {
        self.stream.shutdown().await?;
        Ok(())
    }
}
