use std::time::Duration;

use replay_api::RecordSource;
use replay_engine::{FramedTransport, ReplayEngine, ReplayReport};
use source_influxdb::InfluxSource;
use source_json_file::JsonFileSource;
use transport_tcp_client::TcpClientTransport;

use crate::config::{Effective, ReplayArgs, SourceSelection};
use crate::error::PlayError;

pub async fn run(args: ReplayArgs) -> Result<(), PlayError> {
    let eff = Effective::new(&args)?;

    tokio::select! {
        result = run_session(&eff) => {
            let report = result?;
            tracing::info!(
                sent = report.sent,
                elapsed_s = format_args!("{:.1}", report.elapsed.as_secs_f64()),
                "session finished"
            );
        }
        signal = tokio::signal::ctrl_c() => {
            signal.map_err(PlayError::Signal)?;
            // Dropping the session future drops the connection with it.
            tracing::warn!("interrupted, connection closed");
            return Err(PlayError::Interrupted);
        }
    }

    Ok(())
}

fn build_source(selection: &SourceSelection) -> Result<Box<dyn RecordSource>, PlayError> {
    Ok(match selection {
        SourceSelection::File(path) => Box::new(JsonFileSource::new(path)),
        SourceSelection::Store(cfg) => Box::new(InfluxSource::new(cfg.clone())?),
    })
}

/// Load → connect → replay. Source failures end the session before the
/// consumer connection is opened; an empty load never opens it.
pub async fn run_session(eff: &Effective) -> Result<ReplayReport, PlayError> {
    let source = build_source(&eff.source)?;
    tracing::info!(source = %source.describe(), "loading records");
    let records = source.load().await?;
    tracing::info!(count = records.len(), "records loaded");

    if records.is_empty() {
        tracing::info!("nothing to replay");
        return Ok(ReplayReport { sent: 0, elapsed: Duration::ZERO });
    }

    let client = TcpClientTransport::new(&eff.host, eff.port);
    let stream = client.connect().await.map_err(PlayError::Connect)?;

    let engine = ReplayEngine::new(eff.ordering);
    Ok(engine.replay(&records, FramedTransport::new(stream)).await?)
}
