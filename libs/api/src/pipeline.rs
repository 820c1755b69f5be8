use std::future::Future;
use std::pin::Pin;

use crate::{FrameError, Record, SourceError};

// ════════════════════════════════════════════════════════════════
//  Pipeline Plugin Traits
// ════════════════════════════════════════════════════════════════

pub type SourceFuture<'a> = Pin<Box<dyn Future<Output = Result<Vec<Record>, SourceError>> + Send + 'a>>;

/// Producer of the ordered record sequence for one replay session.
///
/// Implementations: JSON file, InfluxDB query. The returned records are
/// sorted ascending by timestamp; the engine relies on this and never
/// re-sorts.
pub trait RecordSource: Send + Sync {
    /// Short description of the origin (for logging).
    fn describe(&self) -> String;

    /// Load the full sequence. Called once per session.
    fn load(&self) -> SourceFuture<'_>;
}

/// Framing — message boundaries inside a byte stream.
///
/// Implementations are stateless: buffering belongs to the caller, so
/// one instance can serve any number of connections.
pub trait Framing: Send + Sync {
    /// Extract one frame from the buffer.
    /// Returns (frame_data, bytes_consumed) or None if the frame is incomplete.
    fn decode(&self, buf: &[u8]) -> Result<Option<(Vec<u8>, usize)>, FrameError>;

    /// Append a framed payload to the output buffer. On error nothing is appended.
    fn encode(&self, data: &[u8], buf: &mut Vec<u8>) -> Result<(), FrameError>;
}
