mod engine;
mod pacing;
mod transport;

pub use engine::{OrderingPolicy, ReplayEngine, ReplayReport};
pub use pacing::inter_record_delay;
pub use transport::{FramedTransport, SendError};
