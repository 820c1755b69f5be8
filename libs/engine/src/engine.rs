use std::time::Duration;

use replay_api::{Record, ReplayError};
use tokio::io::AsyncWrite;

use crate::pacing::{find_ordering_violation, inter_record_delay, suspend};
use crate::transport::{FramedTransport, SendError};

// ═══════════════════════════════════════════════════════════════
//  Ordering policy
// ═══════════════════════════════════════════════════════════════

/// What to do with a record timestamped before its predecessor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OrderingPolicy {
    /// Check the whole sequence up front and refuse to start.
    #[default]
    Reject,
    /// Send the record immediately (zero delay).
    Clamp,
}

impl std::str::FromStr for OrderingPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reject" => Ok(Self::Reject),
            "clamp" => Ok(Self::Clamp),
            other => Err(format!("ordering policy must be \"reject\" or \"clamp\", got {other:?}")),
        }
    }
}

impl std::fmt::Display for OrderingPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderingPolicy::Reject => f.write_str("reject"),
            OrderingPolicy::Clamp => f.write_str("clamp"),
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Engine
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayReport {
    pub sent: usize,
    pub elapsed: Duration,
}

/// Streams an ordered record sequence to one consumer, reproducing the
/// gaps between source timestamps.
#[derive(Debug, Clone)]
pub struct ReplayEngine {
    ordering: OrderingPolicy,
    progress_every: usize,
}

impl Default for ReplayEngine {
    fn default() -> Self {
        Self {
            ordering: OrderingPolicy::default(),
            progress_every: 500,
        }
    }
}

impl ReplayEngine {
    pub fn new(ordering: OrderingPolicy) -> Self {
        Self {
            ordering,
            ..Self::default()
        }
    }

    /// Log progress every `n` records (0 disables).
    pub fn with_progress_every(mut self, n: usize) -> Self {
        self.progress_every = n;
        self
    }

    pub fn ordering(&self) -> OrderingPolicy {
        self.ordering
    }

    /// Replay `records` through `transport`.
    ///
    /// The first record goes out immediately; each following one after
    /// the gap between its timestamp and its predecessor's. Any failure
    /// ends the session without retries. The connection is closed on
    /// every return path.
    pub async fn replay<W: AsyncWrite + Unpin>(
        &self,
        records: &[Record],
        mut transport: FramedTransport<W>,
    ) -> Result<ReplayReport, ReplayError> {
        let result = self.drive(records, &mut transport).await;

        if let Err(e) = transport.close().await {
            tracing::warn!(error = %e, "connection shutdown failed");
        }

        result
    }

    async fn drive<W: AsyncWrite + Unpin>(
        &self,
        records: &[Record],
        transport: &mut FramedTransport<W>,
    ) -> Result<ReplayReport, ReplayError> {
        let start = tokio::time::Instant::now();

        if records.is_empty() {
            tracing::info!("no records to replay");
            return Ok(ReplayReport { sent: 0, elapsed: start.elapsed() });
        }

        if self.ordering == OrderingPolicy::Reject {
            if let Some((index, delta)) = find_ordering_violation(records) {
                return Err(ReplayError::OrderingViolation {
                    index,
                    behind_ms: -delta.num_milliseconds(),
                });
            }
        }

        let total = records.len();
        let mut sent = 0usize;

        for (index, record) in records.iter().enumerate() {
            if index > 0 {
                let delta = inter_record_delay(records[index - 1].timestamp(), record.timestamp());
                let delay = match delta.to_std() {
                    Ok(d) => d,
                    Err(_) => {
                        tracing::warn!(
                            index,
                            behind_ms = -delta.num_milliseconds(),
                            "out-of-order record, sending without delay"
                        );
                        Duration::ZERO
                    }
                };
                tracing::debug!(index, delay_s = delay.as_secs_f64(), "waiting");
                suspend(delay).await;
            }

            let payload = record
                .to_payload()
                .map_err(|source| ReplayError::Encode { index, sent, source })?;

            match transport.send(&payload).await {
                Ok(()) => {}
                Err(SendError::Frame(source)) => {
                    return Err(ReplayError::PayloadTooLarge { index, sent, source });
                }
                Err(SendError::Io(source)) => {
                    tracing::error!(index, sent, error = %source, "send failed, aborting replay");
                    return Err(ReplayError::Transport { sent, source });
                }
            }
            sent += 1;

            tracing::debug!(
                index,
                source_id = %record.source_id(),
                object_type = record.object_type(),
                bytes = payload.len(),
                "record sent"
            );

            if self.progress_every > 0 && sent % self.progress_every == 0 {
                let elapsed = start.elapsed();
                tracing::info!(
                    sent,
                    total,
                    elapsed_s = format_args!("{:.1}", elapsed.as_secs_f64()),
                    "replay progress"
                );
            }
        }

        let elapsed = start.elapsed();
        tracing::info!(
            sent,
            elapsed_s = format_args!("{:.1}", elapsed.as_secs_f64()),
            "replay complete"
        );

        Ok(ReplayReport { sent, elapsed })
    }
}
