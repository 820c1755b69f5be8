use framing_length_prefixed::{FrameReader, LengthPrefixedFraming};
use replay_api::Record;
use replay_engine::FramedTransport;
use source_influxdb::InfluxWriter;
use tokio::io::{AsyncRead, AsyncWrite};
use transport_tcp_client::TcpClientTransport;
use transport_tcp_server::TcpServerTransport;

use crate::config::ListenArgs;
use crate::error::PlayError;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReceiveSummary {
    pub records: usize,
    pub undecodable: usize,
    /// Frames relayed downstream, the disconnect marker not included.
    pub forwarded: usize,
    pub stored: usize,
}

/// Where received frames go besides the log.
pub struct Relay<W> {
    /// Downstream consumer; gets every frame as received.
    pub forward: Option<FramedTransport<W>>,
    /// Decoded records are written here, one point each.
    pub store: Option<InfluxWriter>,
}

impl<W> Default for Relay<W> {
    fn default() -> Self {
        Self { forward: None, store: None }
    }
}

pub async fn run(args: ListenArgs) -> Result<(), PlayError> {
    let framing = match args.max_payload {
        Some(max) => LengthPrefixedFraming::with_max_payload(max),
        None => LengthPrefixedFraming::default(),
    };

    let store = args.store_config().map(InfluxWriter::new).transpose()?;
    let forward = match args.forward_target()? {
        Some((host, port)) => {
            let stream = TcpClientTransport::new(&host, port).connect().await.map_err(PlayError::Connect)?;
            Some(FramedTransport::new(stream))
        }
        None => None,
    };

    let mut server = TcpServerTransport::new(&args.host, args.port);
    server.start().await.map_err(PlayError::Listen)?;
    let (stream, peer) = server.next_connection().await.map_err(PlayError::Listen)?;

    let summary = receive(stream, framing, Relay { forward, store }).await.map_err(PlayError::Listen)?;
    tracing::info!(
        %peer,
        records = summary.records,
        undecodable = summary.undecodable,
        forwarded = summary.forwarded,
        stored = summary.stored,
        "connection closed"
    );

    server.stop();
    Ok(())
}

/// Read frames until end of stream or an empty frame (disconnect marker).
///
/// Frames are relayed before they are decoded, garbage included, and the
/// disconnect marker is passed on too. A failed relay or store write is
/// logged; relaying stops, storing is retried with the next record.
pub async fn receive<R, W>(
    reader: R,
    framing: LengthPrefixedFraming,
    relay: Relay<W>,
) -> std::io::Result<ReceiveSummary>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let Relay { mut forward, store } = relay;
    let mut frames = FrameReader::new(reader, framing);
    let mut summary = ReceiveSummary::default();

    while let Some(payload) = frames.next_frame().await? {
        if let Some(downstream) = forward.as_mut() {
            match downstream.send(&payload).await {
                Ok(()) if !payload.is_empty() => summary.forwarded += 1,
                Ok(()) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "relay failed, forwarding stopped");
                    forward = None;
                }
            }
        }

        if payload.is_empty() {
            tracing::info!("empty frame, sender disconnected");
            break;
        }

        match Record::from_payload(&payload) {
            Ok(record) => {
                summary.records += 1;
                let c = record.coordinates();
                tracing::info!(
                    source_id = %record.source_id(),
                    target_id = ?record.target_id().map(|t| t.to_string()),
                    object_type = record.object_type(),
                    x = c.x,
                    y = c.y,
                    z = c.z,
                    timestamp = %record.timestamp(),
                    scenario = record.scenario().unwrap_or(""),
                    "record"
                );
                if let Some(writer) = &store {
                    match writer.write(std::slice::from_ref(&record)).await {
                        Ok(n) => summary.stored += n,
                        Err(e) => tracing::warn!(error = %e, "store write failed"),
                    }
                }
            }
            Err(e) => {
                summary.undecodable += 1;
                tracing::warn!(error = %e, raw = %String::from_utf8_lossy(&payload), "undecodable frame");
            }
        }
    }

    if let Some(downstream) = forward {
        if let Err(e) = downstream.close().await {
            tracing::warn!(error = %e, "closing relay");
        }
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use axum::extract::Query;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::Router;
    use replay_api::{Coordinates, Framing};
    use source_influxdb::InfluxConfig;
    use tokio::io::DuplexStream;

    fn record(i: i64) -> Record {
        let ts = "2023-07-01T18:05:05Z".parse().unwrap();
        Record::new(i.into(), "Vehicle", Coordinates::new(0.0, 0.0, 0.0), ts)
    }

    fn wire(payloads: &[&[u8]]) -> Vec<u8> {
        let framing = LengthPrefixedFraming::default();
        let mut buf = Vec::new();
        for p in payloads {
            framing.encode(p, &mut buf).unwrap();
        }
        buf
    }

    fn log_only() -> Relay<DuplexStream> {
        Relay::default()
    }

    /// Accepts writes and keeps the line-protocol bodies.
    async fn fake_write_api() -> (String, Arc<Mutex<Vec<(HashMap<String, String>, String)>>>) {
        let writes = Arc::new(Mutex::new(Vec::new()));
        let captured = writes.clone();
        let app = Router::new().route(
            "/api/v2/write",
            post(move |Query(params): Query<HashMap<String, String>>, body: String| {
                let captured = captured.clone();
                async move {
                    captured.lock().unwrap().push((params, body));
                    StatusCode::NO_CONTENT
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), writes)
    }

    #[tokio::test]
    async fn counts_records_and_garbage() {
        let a = record(1).to_payload().unwrap();
        let b = record(2).to_payload().unwrap();
        let bytes = wire(&[&a, b"not json", &b]);

        let summary = receive(bytes.as_slice(), LengthPrefixedFraming::default(), log_only())
            .await
            .unwrap();
        assert_eq!(summary, ReceiveSummary { records: 2, undecodable: 1, ..Default::default() });
    }

    #[tokio::test]
    async fn empty_frame_ends_the_stream() {
        let a = record(1).to_payload().unwrap();
        let bytes = wire(&[&a, b"", &a]);

        let summary = receive(bytes.as_slice(), LengthPrefixedFraming::default(), log_only())
            .await
            .unwrap();
        assert_eq!(summary.records, 1);
    }

    #[tokio::test]
    async fn oversized_announcement_is_an_error() {
        let bytes = wire(&[b"0123456789"]);
        let err = receive(bytes.as_slice(), LengthPrefixedFraming::with_max_payload(4), log_only())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn relays_frames_and_disconnect_marker() {
        let a = record(1).to_payload().unwrap();
        let b = record(2).to_payload().unwrap();
        let bytes = wire(&[&a, b"not json", &b, b"", &a]);
        let (client, server) = tokio::io::duplex(4096);
        let relay = Relay { forward: Some(FramedTransport::new(client)), store: None };

        let summary = receive(bytes.as_slice(), LengthPrefixedFraming::default(), relay).await.unwrap();
        assert_eq!(summary.forwarded, 3);
        assert_eq!(summary.records, 2);

        let mut downstream = FrameReader::new(server, LengthPrefixedFraming::default());
        let mut got = Vec::new();
        while let Some(frame) = downstream.next_frame().await.unwrap() {
            got.push(frame);
        }
        assert_eq!(got, [a.clone(), b"not json".to_vec(), b.clone(), Vec::new()]);
    }

    #[tokio::test]
    async fn stores_decoded_records() {
        let (url, writes) = fake_write_api().await;
        let writer = InfluxWriter::new(InfluxConfig {
            url,
            bucket: "live".into(),
            scenario: "Freiheit".into(),
            ..InfluxConfig::default()
        })
        .unwrap();
        let a = record(1).to_payload().unwrap();
        let b = record(2).with_scenario("Marienplatz").to_payload().unwrap();
        let bytes = wire(&[&a, b"not json", &b]);
        let relay: Relay<DuplexStream> = Relay { forward: None, store: Some(writer) };

        let summary = receive(bytes.as_slice(), LengthPrefixedFraming::default(), relay).await.unwrap();
        assert_eq!(summary.stored, 2);

        let writes = writes.lock().unwrap();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0].0.get("bucket").map(String::as_str), Some("live"));
        assert!(writes[0].1.starts_with("omnet++,scenario=Freiheit SourceId=1i,"), "{}", writes[0].1);
        assert!(writes[1].1.starts_with("omnet++,scenario=Marienplatz SourceId=2i,"), "{}", writes[1].1);
    }

    #[tokio::test]
    async fn unreachable_store_does_not_stop_receiving() {
        let port = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let writer = InfluxWriter::new(InfluxConfig {
            url: format!("http://127.0.0.1:{port}"),
            ..InfluxConfig::default()
        })
        .unwrap();
        let a = record(1).to_payload().unwrap();
        let bytes = wire(&[&a, &a]);
        let relay: Relay<DuplexStream> = Relay { forward: None, store: Some(writer) };

        let summary = receive(bytes.as_slice(), LengthPrefixedFraming::default(), relay).await.unwrap();
        assert_eq!(summary.records, 2);
        assert_eq!(summary.stored, 0);
    }
}
