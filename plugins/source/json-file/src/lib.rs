//! Records from a JSON document: an array of
//! `{SourceId, TargetId?, ObjectType, Coordinates{X,Y,Z}, Timestamp}` objects
//! with `Timestamp` in (possibly fractional) epoch seconds.

use std::path::{Path, PathBuf};

use chrono::{DateTime, FixedOffset, Local, TimeZone};
use replay_api::{Coordinates, Identifier, Record, RecordSource, SourceError, SourceFuture};
use serde::Deserialize;
use serde_json::Value;

pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn read(&self) -> Result<Vec<Record>, SourceError> {
        let origin = self.path.display().to_string();
        let bytes = tokio::fs::read(&self.path).await.map_err(|source| SourceError::Io {
            path: origin.clone(),
            source,
        })?;

        let parsed = parse_document(&origin, &bytes)?;
        tracing::info!(
            path = %origin,
            loaded = parsed.records.len(),
            skipped = parsed.skipped,
            "json source loaded"
        );
        Ok(parsed.records)
    }
}

impl RecordSource for JsonFileSource {
    fn describe(&self) -> String {
        format!("file {}", self.path.display())
    }

    fn load(&self) -> SourceFuture<'_> {
        Box::pin(self.read())
    }
}

// ═══════════════════════════════════════════════════════════════
//  Document parsing
// ═══════════════════════════════════════════════════════════════

#[derive(Debug)]
pub struct ParsedDocument {
    pub records: Vec<Record>,
    /// Entries dropped for missing or unusable required fields.
    pub skipped: usize,
}

/// Parse a whole document. Input order is kept as is.
pub fn parse_document(origin: &str, bytes: &[u8]) -> Result<ParsedDocument, SourceError> {
    let doc: Value = serde_json::from_slice(bytes).map_err(|e| SourceError::data_format(origin, e))?;
    let Value::Array(entries) = doc else {
        return Err(SourceError::data_format(origin, "top-level value is not an array"));
    };

    let mut records = Vec::with_capacity(entries.len());
    let mut skipped = 0;
    for (index, value) in entries.iter().enumerate() {
        match Entry::deserialize(value) {
            Ok(entry) => match entry.into_record() {
                Some(record) => records.push(record),
                None => {
                    skipped += 1;
                    tracing::debug!(origin, index, "entry skipped: incomplete");
                }
            },
            Err(e) => {
                skipped += 1;
                tracing::debug!(origin, index, error = %e, "entry skipped");
            }
        }
    }

    if let Some(i) = records.windows(2).position(|w| w[1].timestamp() < w[0].timestamp()) {
        tracing::warn!(origin, index = i + 1, "input is not sorted by timestamp");
    }

    Ok(ParsedDocument { records, skipped })
}

/// One array element. Every field is optional here so that an incomplete
/// entry is dropped on its own instead of failing the document.
#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Entry {
    source_id: Option<RawId>,
    target_id: Option<RawId>,
    object_type: Option<String>,
    coordinates: Option<RawCoordinates>,
    timestamp: Option<EpochSeconds>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Int(i64),
    Float(f64),
    Text(String),
}

#[derive(Deserialize)]
#[serde(rename_all = "UPPERCASE")]
struct RawCoordinates {
    x: Option<f64>,
    y: Option<f64>,
    z: Option<f64>,
}

/// Numbers, or strings holding a number.
#[derive(Deserialize)]
#[serde(untagged)]
enum EpochSeconds {
    Number(f64),
    Text(String),
}

impl From<RawId> for Identifier {
    fn from(raw: RawId) -> Self {
        match raw {
            RawId::Int(i) => Identifier::Int(i),
            RawId::Float(f) => Identifier::from_f64(f),
            RawId::Text(s) => Identifier::Text(s),
        }
    }
}

impl EpochSeconds {
    fn seconds(&self) -> Option<f64> {
        let secs = match self {
            EpochSeconds::Number(n) => *n,
            EpochSeconds::Text(s) => s.trim().parse().ok()?,
        };
        secs.is_finite().then_some(secs)
    }
}

impl Entry {
    /// `None` when a required field is missing or null.
    fn into_record(self) -> Option<Record> {
        let c = self.coordinates?;
        let coordinates = Coordinates::new(c.x?, c.y?, c.z?);
        let timestamp = local_time(self.timestamp?.seconds()?)?;

        Some(
            Record::new(self.source_id?.into(), self.object_type?, coordinates, timestamp)
                .with_target(self.target_id.map(Identifier::from)),
        )
    }
}

/// Epoch seconds → local wall-clock time, microsecond precision.
fn local_time(secs: f64) -> Option<DateTime<FixedOffset>> {
    let micros = (secs * 1_000_000.0).round();
    if micros.abs() >= i64::MAX as f64 {
        return None;
    }
    let micros = micros as i64;
    let nanos = (micros.rem_euclid(1_000_000) * 1_000) as u32;
    Local
        .timestamp_opt(micros.div_euclid(1_000_000), nanos)
        .single()
        .map(|t| t.fixed_offset())
}
