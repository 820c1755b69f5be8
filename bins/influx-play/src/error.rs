use replay_api::{ReplayError, SourceError};
use source_influxdb::WriteError;

#[derive(Debug, thiserror::Error)]
pub enum PlayError {
    #[error("config ({context}): {detail}")]
    Config { context: &'static str, detail: String },

    #[error("{0}")]
    Source(#[from] SourceError),

    #[error("connect: {0}")]
    Connect(#[source] std::io::Error),

    #[error("listen: {0}")]
    Listen(#[source] std::io::Error),

    #[error("{0}")]
    Replay(#[from] ReplayError),

    #[error("store: {0}")]
    Store(#[from] WriteError),

    #[error("signal: {0}")]
    Signal(#[source] std::io::Error),

    #[error("interrupted")]
    Interrupted,
}
