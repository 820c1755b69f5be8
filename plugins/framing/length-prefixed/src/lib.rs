//! `[u32 big-endian length][payload]` framing.

use replay_api::{FrameError, Framing};
use tokio::io::{AsyncRead, AsyncReadExt};

const HEADER_LEN: usize = 4;

/// Largest payload the 4-byte header can describe.
pub const MAX_FRAME_PAYLOAD: usize = u32::MAX as usize;

#[derive(Debug, Clone, Copy)]
pub struct LengthPrefixedFraming {
    max_payload: usize,
}

impl Default for LengthPrefixedFraming {
    fn default() -> Self {
        Self { max_payload: MAX_FRAME_PAYLOAD }
    }
}

impl LengthPrefixedFraming {
    /// Framing with a lower payload cap. Values above the header capacity
    /// are clamped to it.
    pub fn with_max_payload(max_payload: usize) -> Self {
        Self { max_payload: max_payload.min(MAX_FRAME_PAYLOAD) }
    }

    pub fn max_payload(&self) -> usize {
        self.max_payload
    }
}

impl Framing for LengthPrefixedFraming {
    fn decode(&self, buf: &[u8]) -> Result<Option<(Vec<u8>, usize)>, FrameError> {
        if buf.len() < HEADER_LEN {
            return Ok(None);
        }

        let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        if len > self.max_payload {
            return Err(FrameError::PayloadTooLarge { len, max: self.max_payload });
        }

        let total = HEADER_LEN + len;
        if buf.len() < total {
            return Ok(None);
        }

        Ok(Some((buf[HEADER_LEN..total].to_vec(), total)))
    }

    fn encode(&self, data: &[u8], buf: &mut Vec<u8>) -> Result<(), FrameError> {
        let len = data.len();
        if len > self.max_payload {
            return Err(FrameError::PayloadTooLarge { len, max: self.max_payload });
        }
        buf.reserve(HEADER_LEN + len);
        buf.extend_from_slice(&(len as u32).to_be_bytes());
        buf.extend_from_slice(data);
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════
//  Frame reader
// ═══════════════════════════════════════════════════════════════

/// Pulls whole frames off an async byte stream.
pub struct FrameReader<R> {
    reader: R,
    framing: LengthPrefixedFraming,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R, framing: LengthPrefixedFraming) -> Self {
        Self {
            reader,
            framing,
            buf: Vec::with_capacity(8192),
        }
    }

    /// Next complete frame payload. `None` on a clean end of stream;
    /// a stream ending in the middle of a frame is `UnexpectedEof`.
    pub async fn next_frame(&mut self) -> std::io::Result<Option<Vec<u8>>> {
        let mut chunk = [0u8; 8192];
        loop {
            let decoded = self
                .framing
                .decode(&self.buf)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            if let Some((payload, consumed)) = decoded {
                self.buf.drain(..consumed);
                return Ok(Some(payload));
            }

            let n = self.reader.read(&mut chunk).await?;
            if n == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("stream closed inside a frame ({} bytes buffered)", self.buf.len()),
                ));
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}
