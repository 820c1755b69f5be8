//! Replay sessions against in-memory connections.
//!
//! Timing tests run on tokio's paused clock: sleeps advance virtual time
//! to their deadline, so gaps between writes match the requested delays.

use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use chrono::{FixedOffset, TimeZone};
use framing_length_prefixed::LengthPrefixedFraming;
use replay_api::{Coordinates, Framing, Record, ReplayError};
use replay_engine::{FramedTransport, OrderingPolicy, ReplayEngine};
use tokio::io::AsyncWrite;
use tokio::time::Instant;

// ── Helpers ─────────────────────────────────────────────────────

fn record_at(millis: i64, source: i64) -> Record {
    let ts = FixedOffset::east_opt(0).unwrap().timestamp_millis_opt(millis).unwrap();
    Record::new(source.into(), "Pedestrian", Coordinates::new(source as f64, 1.0, 0.0), ts)
        .with_scenario("test")
}

fn frame_of(record: &Record) -> Vec<u8> {
    let mut buf = Vec::new();
    LengthPrefixedFraming::default()
        .encode(&record.to_payload().unwrap(), &mut buf)
        .unwrap();
    buf
}

#[derive(Default)]
struct Wire {
    writes: Vec<(Instant, Vec<u8>)>,
    shutdowns: usize,
}

/// Accepts every write whole and remembers when it happened.
#[derive(Clone, Default)]
struct RecordingWriter(Arc<Mutex<Wire>>);

impl RecordingWriter {
    fn writes(&self) -> Vec<(Instant, Vec<u8>)> {
        self.0.lock().unwrap().writes.clone()
    }

    fn shutdowns(&self) -> usize {
        self.0.lock().unwrap().shutdowns
    }

    fn decoded(&self) -> Vec<Record> {
        let bytes: Vec<u8> = self.writes().into_iter().flat_map(|(_, b)| b).collect();
        let framing = LengthPrefixedFraming::default();
        let mut rest = bytes.as_slice();
        let mut out = Vec::new();
        while let Some((payload, consumed)) = framing.decode(rest).unwrap() {
            out.push(Record::from_payload(&payload).unwrap());
            rest = &rest[consumed..];
        }
        assert!(rest.is_empty(), "trailing bytes on the wire");
        out
    }
}

impl AsyncWrite for RecordingWriter {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        self.0.lock().unwrap().writes.push((Instant::now(), buf.to_vec()));
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.0.lock().unwrap().shutdowns += 1;
        Poll::Ready(Ok(()))
    }
}

// ── Timing ──────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn reproduces_source_gaps() {
    let t0 = 1_688_234_705_000;
    let records = vec![record_at(t0, 1), record_at(t0 + 2_000, 2), record_at(t0 + 5_500, 3)];
    let writer = RecordingWriter::default();
    let started = Instant::now();

    let report = ReplayEngine::default()
        .replay(&records, FramedTransport::new(writer.clone()))
        .await
        .unwrap();

    assert_eq!(report.sent, 3);
    let writes = writer.writes();
    assert_eq!(writes.len(), 3);

    let tolerance = Duration::from_millis(5);
    let gaps = [
        writes[0].0 - started,
        writes[1].0 - writes[0].0,
        writes[2].0 - writes[1].0,
    ];
    let expected = [Duration::ZERO, Duration::from_secs(2), Duration::from_millis(3_500)];
    for (gap, want) in gaps.iter().zip(expected) {
        assert!(gap.abs_diff(want) <= tolerance, "gap {gap:?}, expected {want:?}");
    }
}

#[tokio::test(start_paused = true)]
async fn frames_arrive_in_order_and_parse_back() {
    let records: Vec<_> = (0..4).map(|i| record_at(i * 250, i)).collect();
    let writer = RecordingWriter::default();

    ReplayEngine::default()
        .replay(&records, FramedTransport::new(writer.clone()))
        .await
        .unwrap();

    assert_eq!(writer.decoded(), records);
    assert_eq!(writer.shutdowns(), 1);
}

#[tokio::test(start_paused = true)]
async fn equal_timestamps_go_out_back_to_back() {
    let records = vec![record_at(0, 1), record_at(0, 2), record_at(0, 3)];
    let writer = RecordingWriter::default();

    ReplayEngine::default()
        .replay(&records, FramedTransport::new(writer.clone()))
        .await
        .unwrap();

    let writes = writer.writes();
    assert!(writes.windows(2).all(|w| w[1].0 == w[0].0));
}

// ── Empty input ─────────────────────────────────────────────────

#[tokio::test]
async fn empty_sequence_sends_nothing_and_closes() {
    let writer = RecordingWriter::default();

    let report = ReplayEngine::default()
        .replay(&[], FramedTransport::new(writer.clone()))
        .await
        .unwrap();

    assert_eq!(report.sent, 0);
    assert!(writer.writes().is_empty());
    assert_eq!(writer.shutdowns(), 1);
}

// ── Failures ────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn aborts_on_third_write_failure() {
    let records: Vec<_> = (0..5).map(|i| record_at(i * 1_000, i)).collect();
    let mock = tokio_test::io::Builder::new()
        .write(&frame_of(&records[0]))
        .write(&frame_of(&records[1]))
        .write_error(io::Error::new(io::ErrorKind::BrokenPipe, "peer went away"))
        .build();

    let err = ReplayEngine::default()
        .replay(&records, FramedTransport::new(mock))
        .await
        .unwrap_err();

    match &err {
        ReplayError::Transport { sent, source } => {
            assert_eq!(*sent, 2);
            assert_eq!(source.kind(), io::ErrorKind::BrokenPipe);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(err.last_sent_index(), Some(1));
}

#[tokio::test]
async fn out_of_order_input_is_rejected_before_sending() {
    let records = vec![record_at(1_000, 1), record_at(3_000, 2), record_at(2_000, 3)];
    let writer = RecordingWriter::default();

    let err = ReplayEngine::new(OrderingPolicy::Reject)
        .replay(&records, FramedTransport::new(writer.clone()))
        .await
        .unwrap_err();

    assert!(matches!(err, ReplayError::OrderingViolation { index: 2, behind_ms: 1_000 }));
    assert_eq!(err.sent(), 0);
    assert!(writer.writes().is_empty());
    assert_eq!(writer.shutdowns(), 1);
}

#[tokio::test(start_paused = true)]
async fn clamp_policy_sends_late_records_immediately() {
    let records = vec![record_at(0, 1), record_at(4_000, 2), record_at(1_000, 3), record_at(2_000, 4)];
    let writer = RecordingWriter::default();

    let report = ReplayEngine::new(OrderingPolicy::Clamp)
        .replay(&records, FramedTransport::new(writer.clone()))
        .await
        .unwrap();

    assert_eq!(report.sent, 4);
    let writes = writer.writes();
    let tolerance = Duration::from_millis(5);
    assert!((writes[1].0 - writes[0].0).abs_diff(Duration::from_secs(4)) <= tolerance);
    assert_eq!(writes[2].0, writes[1].0);
    assert!((writes[3].0 - writes[2].0).abs_diff(Duration::from_secs(1)) <= tolerance);
    assert_eq!(writer.decoded(), records);
}

#[tokio::test]
async fn oversized_record_aborts_without_partial_frame() {
    let records = vec![record_at(0, 1)];
    let writer = RecordingWriter::default();
    let transport = FramedTransport::with_framing(writer.clone(), LengthPrefixedFraming::with_max_payload(16));

    let err = ReplayEngine::default().replay(&records, transport).await.unwrap_err();

    assert!(matches!(err, ReplayError::PayloadTooLarge { index: 0, sent: 0, .. }));
    assert!(writer.writes().is_empty());
    assert_eq!(writer.shutdowns(), 1);
}
