use framing_length_prefixed::LengthPrefixedFraming;
use replay_api::{FrameError, Framing};
use tokio::io::{AsyncWrite, AsyncWriteExt};

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// Rejected before anything was written; the stream is still in sync.
    #[error("{0}")]
    Frame(#[from] FrameError),

    /// Write failed; part of the frame may be on the wire already.
    #[error("{0}")]
    Io(#[from] std::io::Error),
}

/// Framed byte-stream writer owning the consumer connection.
///
/// Each frame (length prefix and payload) is encoded into one buffer and
/// handed to a single `write_all`, so the sender never interleaves a
/// header with anything but its own payload. The connection is released
/// by [`FramedTransport::close`], which consumes the transport, or by
/// drop on any abrupt exit.
pub struct FramedTransport<W> {
    stream: W,
    framing: Box<dyn Framing>,
    buf: Vec<u8>,
}

impl<W: AsyncWrite + Unpin> FramedTransport<W> {
    /// Transport speaking `[u32 BE length][payload]`.
    pub fn new(stream: W) -> Self {
        Self::with_framing(stream, LengthPrefixedFraming::default())
    }

    pub fn with_framing(stream: W, framing: impl Framing + 'static) -> Self {
        Self {
            stream,
            framing: Box::new(framing),
            buf: Vec::with_capacity(8192),
        }
    }

    pub async fn send(&mut self, payload: &[u8]) -> Result<(), SendError> {
        self.buf.clear();
        self.framing.encode(payload, &mut self.buf)?;
        self.stream.write_all(&self.buf).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Shut the connection down. Runs at most once since it takes `self`.
    pub async fn close(mut self) -> std::io::Result<()> {
        self.stream.shutdown().await
    }
}
