//! Records from an InfluxDB 2.x bucket via the Flux HTTP query API, and
//! the line-protocol writer that fills that bucket.

mod csv;
mod write;

pub use csv::{parse_annotated_csv, CsvError, FieldValue, Row, Table};
pub use write::{line_protocol, InfluxWriter, WriteError};

use replay_api::{Coordinates, Record, RecordSource, SourceError, SourceFuture};
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};

/// Escape a value for use inside a Flux double-quoted string literal.
fn escape_flux_string(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"").replace("${", "\\${")
}

// ═══════════════════════════════════════════════════════════════
//  Config
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct InfluxConfig {
    pub url: String,
    pub token: String,
    pub org: String,
    pub bucket: String,
    pub measurement: String,
    pub scenario: String,
    /// Range start, Unix seconds.
    pub range_start: i64,
}

impl Default for InfluxConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8086".into(),
            token: "secret-token".into(),
            org: "rovernet".into(),
            bucket: "crownet".into(),
            measurement: "omnet++".into(),
            scenario: "default".into(),
            range_start: 1688234705,
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Source
// ═══════════════════════════════════════════════════════════════

/// Loads one scenario, pivoted to a row per timestamp and sorted by time.
pub struct InfluxSource {
    http: reqwest::Client,
    cfg: InfluxConfig,
}

impl InfluxSource {
    pub fn new(cfg: InfluxConfig) -> Result<Self, SourceError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| SourceError::Unavailable(format!("HTTP client: {e}")))?;
        Ok(Self { http, cfg })
    }

    pub fn config(&self) -> &InfluxConfig {
        &self.cfg
    }

    pub fn flux_query(&self) -> String {
        format!(
            "from(bucket: \"{bucket}\")\n\
             \x20 |> range(start: {start})\n\
             \x20 |> filter(fn: (r) => r._measurement == \"{measurement}\" and r.scenario == \"{scenario}\")\n\
             \x20 |> pivot(rowKey: [\"_time\"], columnKey: [\"_field\"], valueColumn: \"_value\")\n\
             \x20 |> sort(columns: [\"_time\"])",
            bucket = escape_flux_string(&self.cfg.bucket),
            start = self.cfg.range_start,
            measurement = escape_flux_string(&self.cfg.measurement),
            scenario = escape_flux_string(&self.cfg.scenario),
        )
    }

    /// Query request body. The dialect asks for annotations, without which
    /// the server returns untyped cells.
    pub fn query_body(&self) -> String {
        serde_json::json!({
            "query": self.flux_query(),
            "type": "flux",
            "dialect": {
                "header": true,
                "delimiter": ",",
                "annotations": ["datatype", "group", "default"]
            }
        })
        .to_string()
    }

    async fn exec(&self, body: String) -> Result<String, SourceError> {
        let url = format!("{}/api/v2/query", self.cfg.url.trim_end_matches('/'));
        let resp = self
            .http
            .post(&url)
            .query(&[("org", self.cfg.org.as_str())])
            .header(AUTHORIZATION, format!("Token {}", self.cfg.token))
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/csv")
            .body(body)
            .send()
            .await
            .map_err(|e| SourceError::Unavailable(format!("influx request {url}: {e}")))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| SourceError::Unavailable(format!("influx read: {e}")))?;

        if status.is_success() {
            Ok(body)
        } else {
            Err(SourceError::Unavailable(format!("influx query rejected ({status}): {}", body.trim())))
        }
    }

    pub async fn fetch(&self) -> Result<Vec<Record>, SourceError> {
        let body = self.exec(self.query_body()).await?;
        let tables = parse_annotated_csv(&body).map_err(|e| match e {
            CsvError::InBand(msg) => SourceError::Unavailable(format!("influx query failed: {msg}")),
            other => SourceError::data_format(format!("influx {}", self.cfg.url), other),
        })?;

        tracing::info!(tables = tables.len(), scenario = %self.cfg.scenario, "influx query returned");

        let mut records = Vec::new();
        let mut skipped = 0usize;
        for table in &tables {
            tracing::info!(table = %table.id, rows = table.rows.len(), "influx table");
            for row in &table.rows {
                match record_from_row(row, &self.cfg.scenario) {
                    Some(record) => records.push(record),
                    None => skipped += 1,
                }
            }
        }

        // sort() orders rows within each table only.
        if tables.len() > 1 {
            records.sort_by_key(|r| r.timestamp());
        }
        if let Some(index) = first_unsorted(&records) {
            tracing::warn!(index, scenario = %self.cfg.scenario, "influx result is not sorted by time");
        }

        tracing::info!(loaded = records.len(), skipped, "influx source loaded");
        Ok(records)
    }
}

impl RecordSource for InfluxSource {
    fn describe(&self) -> String {
        format!(
            "influx {} bucket={} scenario={}",
            self.cfg.url, self.cfg.bucket, self.cfg.scenario
        )
    }

    fn load(&self) -> SourceFuture<'_> {
        Box::pin(self.fetch())
    }
}

/// Index of the first record older than its predecessor.
pub fn first_unsorted(records: &[Record]) -> Option<usize> {
    records
        .windows(2)
        .position(|w| w[1].timestamp() < w[0].timestamp())
        .map(|i| i + 1)
}

/// Map a pivoted row into a record. `None` when any required column is absent.
pub fn record_from_row(row: &Row, scenario: &str) -> Option<Record> {
    let source_id = row.get("SourceId")?.as_identifier()?;
    let target_id = row.get("TargetId").and_then(FieldValue::as_identifier);
    let object_type = row.get("ObjectType")?.as_text()?;
    let coordinates = Coordinates::new(
        row.get("X")?.as_f64()?,
        row.get("Y")?.as_f64()?,
        row.get("Z")?.as_f64()?,
    );
    let timestamp = row.get("_time")?.as_time()?;

    Some(
        Record::new(source_id, object_type, coordinates, timestamp)
            .with_target(target_id)
            .with_scenario(scenario),
    )
}
