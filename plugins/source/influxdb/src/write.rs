//! Records into a bucket through the v2 write API, in the shape the query
//! side reads back: one point per record, `scenario` as the only tag.

use replay_api::{Identifier, Record};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};

use crate::InfluxConfig;

#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("influx write {url}: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("influx write rejected ({status}): {body}")]
    Rejected { status: reqwest::StatusCode, body: String },
}

/// Measurement names escape commas and spaces.
fn escape_measurement(s: &str) -> String {
    s.replace('\\', "\\\\").replace(',', "\\,").replace(' ', "\\ ")
}

/// Tag keys and values additionally escape `=`.
fn escape_tag(s: &str) -> String {
    escape_measurement(s).replace('=', "\\=")
}

fn string_field(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

fn id_field(id: &Identifier) -> String {
    match id {
        Identifier::Int(v) => format!("{v}i"),
        Identifier::Text(s) => string_field(s),
    }
}

/// One line-protocol point with nanosecond timestamp. The record's own
/// scenario wins over `scenario`. `None` when the timestamp is outside
/// the nanosecond range or a coordinate is not finite.
pub fn line_protocol(record: &Record, measurement: &str, scenario: &str) -> Option<String> {
    let ts = record.timestamp().timestamp_nanos_opt()?;
    let c = record.coordinates();
    if ![c.x, c.y, c.z].iter().all(|v| v.is_finite()) {
        return None;
    }

    let mut fields = vec![format!("SourceId={}", id_field(record.source_id()))];
    if let Some(target) = record.target_id() {
        fields.push(format!("TargetId={}", id_field(target)));
    }
    fields.push(format!("ObjectType={}", string_field(record.object_type())));
    fields.push(format!("X={:?},Y={:?},Z={:?}", c.x, c.y, c.z));

    Some(format!(
        "{},scenario={} {} {ts}",
        escape_measurement(measurement),
        escape_tag(record.scenario().unwrap_or(scenario)),
        fields.join(","),
    ))
}

pub struct InfluxWriter {
    http: reqwest::Client,
    cfg: InfluxConfig,
}

impl InfluxWriter {
    pub fn new(cfg: InfluxConfig) -> Result<Self, WriteError> {
        let http = reqwest::Client::builder().build().map_err(WriteError::Client)?;
        Ok(Self { http, cfg })
    }

    pub fn config(&self) -> &InfluxConfig {
        &self.cfg
    }

    /// Write a batch; returns how many points went out. Records that have
    /// no line-protocol form are skipped with a warning.
    pub async fn write(&self, records: &[Record]) -> Result<usize, WriteError> {
        let lines: Vec<String> = records
            .iter()
            .filter_map(|r| {
                let line = line_protocol(r, &self.cfg.measurement, &self.cfg.scenario);
                if line.is_none() {
                    tracing::warn!(source_id = %r.source_id(), timestamp = %r.timestamp(), "record not writable");
                }
                line
            })
            .collect();
        if lines.is_empty() {
            return Ok(0);
        }

        let url = format!("{}/api/v2/write", self.cfg.url.trim_end_matches('/'));
        let resp = self
            .http
            .post(&url)
            .query(&[
                ("org", self.cfg.org.as_str()),
                ("bucket", self.cfg.bucket.as_str()),
                ("precision", "ns"),
            ])
            .header(AUTHORIZATION, format!("Token {}", self.cfg.token))
            .header(CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(lines.join("\n"))
            .send()
            .await
            .map_err(|source| WriteError::Request { url: url.clone(), source })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(WriteError::Rejected { status, body: body.trim().to_string() });
        }

        tracing::debug!(points = lines.len(), bucket = %self.cfg.bucket, "influx write");
        Ok(lines.len())
    }
}
