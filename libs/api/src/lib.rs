//! Shared vocabulary of the replay workspace: the [`Record`] value type,
//! its wire payload, the plugin seams ([`RecordSource`], [`Framing`]) and
//! the error taxonomy every layer reports through.

pub mod error;
pub mod pipeline;
pub mod record;

pub use error::{FrameError, ReplayError, SourceError};
pub use pipeline::{Framing, RecordSource, SourceFuture};
pub use record::{Coordinates, Identifier, Record};
