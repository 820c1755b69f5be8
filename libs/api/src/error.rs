// ════════════════════════════════════════════════════════════════
//  Source errors
// ════════════════════════════════════════════════════════════════

/// Failure of a [`RecordSource`](crate::RecordSource). Every variant is
/// fatal for the session and is raised before any network I/O towards
/// the consumer. Individually incomplete records are never errors.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// The input document (or store response) is not parseable.
    #[error("data format ({origin}): {detail}")]
    DataFormat { origin: String, detail: String },

    /// The input could not be read at all.
    #[error("read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The external store is unreachable or rejected the query.
    #[error("source unavailable: {0}")]
    Unavailable(String),
}

impl SourceError {
    pub fn data_format(origin: impl Into<String>, detail: impl std::fmt::Display) -> Self {
        Self::DataFormat {
            origin: origin.into(),
            detail: detail.to_string(),
        }
    }
}

// ════════════════════════════════════════════════════════════════
//  Framing errors
// ════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// Payload does not fit into the length prefix (or the configured cap).
    #[error("payload too large: {len} bytes (max {max})")]
    PayloadTooLarge { len: usize, max: usize },
}

// ════════════════════════════════════════════════════════════════
//  Replay errors
// ════════════════════════════════════════════════════════════════

/// Reasons a replay session aborts. Variants raised after transmission
/// started carry `sent`, the number of records the consumer received.
#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    /// Record `index` is timestamped before record `index - 1`.
    #[error("record {index} is {behind_ms} ms older than its predecessor")]
    OrderingViolation { index: usize, behind_ms: i64 },

    /// Record `index` encodes to more bytes than one frame can carry.
    /// Detected before anything of that frame is written.
    #[error("record {index}: {source}")]
    PayloadTooLarge {
        index: usize,
        sent: usize,
        #[source]
        source: FrameError,
    },

    #[error("record {index}: encode: {source}")]
    Encode {
        index: usize,
        sent: usize,
        #[source]
        source: serde_json::Error,
    },

    /// Connection-level failure. The stream may be desynchronized, no
    /// further frames are attempted.
    #[error("transport failed after {sent} records: {source}")]
    Transport {
        sent: usize,
        #[source]
        source: std::io::Error,
    },
}

impl ReplayError {
    /// Number of records delivered before the session aborted.
    pub fn sent(&self) -> usize {
        match self {
            ReplayError::OrderingViolation { .. } => 0,
            ReplayError::PayloadTooLarge { sent, .. }
            | ReplayError::Encode { sent, .. }
            | ReplayError::Transport { sent, .. } => *sent,
        }
    }

    /// Index of the last record the consumer received, if any.
    pub fn last_sent_index(&self) -> Option<usize> {
        self.sent().checked_sub(1)
    }
}
