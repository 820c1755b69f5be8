use std::time::Duration;

use chrono::{DateTime, FixedOffset, TimeDelta};
use replay_api::Record;

/// Signed gap between two consecutive source timestamps.
pub fn inter_record_delay(prev: DateTime<FixedOffset>, next: DateTime<FixedOffset>) -> TimeDelta {
    next.signed_duration_since(prev)
}

/// First record whose timestamp precedes its predecessor's.
pub(crate) fn find_ordering_violation(records: &[Record]) -> Option<(usize, TimeDelta)> {
    records.windows(2).enumerate().find_map(|(i, pair)| {
        let delta = inter_record_delay(pair[0].timestamp(), pair[1].timestamp());
        (delta < TimeDelta::zero()).then_some((i + 1, delta))
    })
}

/// Wait `delay` on the runtime's monotonic clock.
///
/// Relative to the moment of the call: time spent encoding and writing
/// the previous frame is not subtracted.
pub(crate) async fn suspend(delay: Duration) {
    if delay.is_zero() {
        return;
    }
    let started = tokio::time::Instant::now();
    tokio::time::sleep(delay).await;
    tracing::trace!(
        requested_ms = delay.as_millis() as u64,
        waited_ms = started.elapsed().as_millis() as u64,
        "suspended"
    );
}
