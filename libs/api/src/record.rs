use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

// ════════════════════════════════════════════════════════════════
//  Identifier
// ════════════════════════════════════════════════════════════════

/// Identifier of a simulated object. Sources carry either numeric or
/// textual ids, and the consumer receives them in the same shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Identifier {
    Int(i64),
    Text(String),
}

impl Identifier {
    /// Normalize a floating value read from a store column.
    /// Integral floats become `Int`, everything else keeps its decimal text.
    pub fn from_f64(v: f64) -> Self {
        if v.is_finite() && v.fract() == 0.0 && v.abs() < i64::MAX as f64 {
            Identifier::Int(v as i64)
        } else {
            Identifier::Text(v.to_string())
        }
    }
}

impl std::fmt::Display for Identifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Identifier::Int(v) => write!(f, "{v}"),
            Identifier::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for Identifier {
    fn from(v: i64) -> Self {
        Identifier::Int(v)
    }
}

impl From<&str> for Identifier {
    fn from(s: &str) -> Self {
        Identifier::Text(s.to_string())
    }
}

impl From<String> for Identifier {
    fn from(s: String) -> Self {
        Identifier::Text(s)
    }
}

// ════════════════════════════════════════════════════════════════
//  Coordinates
// ════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    #[serde(rename = "X")]
    pub x: f64,
    #[serde(rename = "Y")]
    pub y: f64,
    #[serde(rename = "Z")]
    pub z: f64,
}

impl Coordinates {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

// ════════════════════════════════════════════════════════════════
//  Record
// ════════════════════════════════════════════════════════════════

/// One timestamped spatial event, ready for transmission.
///
/// Only constructed once every required value is known; the optional
/// target and scenario are attached with the `with_*` builders. There are
/// no setters, a record is never changed after a source produced it.
///
/// The serde shape is the wire payload shared with the consumer:
/// `SourceId`, `TargetId` (null when absent), `ObjectType`,
/// `Coordinates{X,Y,Z}`, `Timestamp` (ISO-8601) and `Scenario` (omitted
/// when absent).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Record {
    source_id: Identifier,
    #[serde(default)]
    target_id: Option<Identifier>,
    object_type: String,
    coordinates: Coordinates,
    timestamp: DateTime<FixedOffset>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    scenario: Option<String>,
}

impl Record {
    pub fn new(
        source_id: Identifier,
        object_type: impl Into<String>,
        coordinates: Coordinates,
        timestamp: DateTime<FixedOffset>,
    ) -> Self {
        Self {
            source_id,
            target_id: None,
            object_type: object_type.into(),
            coordinates,
            timestamp,
            scenario: None,
        }
    }

    pub fn with_target(mut self, target_id: Option<Identifier>) -> Self {
        self.target_id = target_id;
        self
    }

    pub fn with_scenario(mut self, scenario: impl Into<String>) -> Self {
        self.scenario = Some(scenario.into());
        self
    }

    pub fn source_id(&self) -> &Identifier {
        &self.source_id
    }

    pub fn target_id(&self) -> Option<&Identifier> {
        self.target_id.as_ref()
    }

    pub fn object_type(&self) -> &str {
        &self.object_type
    }

    pub fn coordinates(&self) -> Coordinates {
        self.coordinates
    }

    pub fn timestamp(&self) -> DateTime<FixedOffset> {
        self.timestamp
    }

    pub fn scenario(&self) -> Option<&str> {
        self.scenario.as_deref()
    }

    /// Encode the record into its wire payload (UTF-8 JSON).
    pub fn to_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Parse a payload produced by [`Record::to_payload`].
    pub fn from_payload(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }
}
