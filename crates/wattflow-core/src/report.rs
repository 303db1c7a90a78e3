//! Report data model
//!
//! TigerStyle: Reports are plain values, validated once when decoded.
//!
//! A report is the unit of measurement flowing through a pipeline. Only the
//! fields needed for routing and storage are modeled here: the concrete
//! business meaning of event counters is left to formulas.

use crate::error::{Error, Result};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Event counters of one core: event name → value
pub type EventCounters = BTreeMap<String, u64>;

/// Hardware counter groups: group → socket → core → events
pub type HwpcGroups = BTreeMap<String, BTreeMap<String, BTreeMap<String, EventCounters>>>;

/// Concrete family of a report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportKind {
    /// Hardware performance counters sampled by a sensor
    Hwpc,
    /// Power estimation produced by a formula
    Power,
    /// Process usage sampled from procfs
    Procfs,
}

impl fmt::Display for ReportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hwpc => write!(f, "HWPCReport"),
            Self::Power => write!(f, "PowerReport"),
            Self::Procfs => write!(f, "ProcfsReport"),
        }
    }
}

/// A measurement report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub kind: ReportKind,
    pub timestamp: DateTime<Utc>,
    pub sensor: String,
    pub target: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub groups: HwpcGroups,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub power: Option<f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub usage: BTreeMap<String, f64>,
    /// Per-formula sequence tag set by the dispatcher, never persisted
    #[serde(skip)]
    pub dispatch_seq: Option<u32>,
}

impl Report {
    fn new(kind: ReportKind, timestamp: DateTime<Utc>, sensor: &str, target: &str) -> Self {
        Self {
            kind,
            timestamp,
            sensor: sensor.to_string(),
            target: target.to_string(),
            metadata: BTreeMap::new(),
            groups: BTreeMap::new(),
            power: None,
            usage: BTreeMap::new(),
            dispatch_seq: None,
        }
    }

    /// Create an empty hardware counter report
    pub fn hwpc(timestamp: DateTime<Utc>, sensor: &str, target: &str) -> Self {
        Self::new(ReportKind::Hwpc, timestamp, sensor, target)
    }

    /// Create a power report
    pub fn power(timestamp: DateTime<Utc>, sensor: &str, target: &str, power: f64) -> Self {
        let mut report = Self::new(ReportKind::Power, timestamp, sensor, target);
        report.power = Some(power);
        report
    }

    /// Create a procfs usage report
    pub fn procfs(
        timestamp: DateTime<Utc>,
        sensor: &str,
        target: &str,
        usage: BTreeMap<String, f64>,
    ) -> Self {
        let mut report = Self::new(ReportKind::Procfs, timestamp, sensor, target);
        report.usage = usage;
        report
    }

    /// Add an event counter to a hardware counter report
    pub fn with_event(
        mut self,
        group: &str,
        socket: &str,
        core: &str,
        event: &str,
        value: u64,
    ) -> Self {
        debug_assert_eq!(self.kind, ReportKind::Hwpc);
        self.groups
            .entry(group.to_string())
            .or_default()
            .entry(socket.to_string())
            .or_default()
            .entry(core.to_string())
            .or_default()
            .insert(event.to_string(), value);
        self
    }

    /// Attach a metadata entry
    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// Decode a raw database record into a report of the given kind
    ///
    /// # Errors
    /// Returns `BadInputData` if a required field is missing or malformed.
    pub fn from_record(kind: ReportKind, record: &Value) -> Result<Self> {
        let object = record
            .as_object()
            .ok_or_else(|| Error::bad_input("record is not an object"))?;

        let timestamp = parse_timestamp(
            object
                .get("timestamp")
                .ok_or_else(|| missing_field("timestamp"))?,
        )?;
        let sensor = required_str(object.get("sensor"), "sensor")?;
        let target = required_str(object.get("target"), "target")?;

        let mut report = Self::new(kind, timestamp, sensor, target);

        if let Some(metadata) = object.get("metadata") {
            let metadata = metadata
                .as_object()
                .ok_or_else(|| Error::bad_input("metadata is not an object"))?;
            report.metadata = metadata
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
        }

        match kind {
            ReportKind::Hwpc => {
                let groups = object.get("groups").ok_or_else(|| missing_field("groups"))?;
                report.groups = serde_json::from_value(groups.clone())
                    .map_err(|e| Error::bad_input(format!("invalid groups: {}", e)))?;
            }
            ReportKind::Power => {
                let power = object
                    .get("power")
                    .and_then(Value::as_f64)
                    .ok_or_else(|| missing_field("power"))?;
                report.power = Some(power);
            }
            ReportKind::Procfs => {
                let usage = object.get("usage").ok_or_else(|| missing_field("usage"))?;
                report.usage = serde_json::from_value(usage.clone())
                    .map_err(|e| Error::bad_input(format!("invalid usage: {}", e)))?;
            }
        }

        Ok(report)
    }

    /// Encode the report as a database record
    pub fn to_record(&self) -> Result<Value> {
        serde_json::to_value(self).map_err(|e| Error::bad_input(e.to_string()))
    }

    /// Get a routing field by name (`sensor`, `target`)
    pub fn field(&self, name: &str) -> Option<&str> {
        match name {
            "sensor" => Some(&self.sensor),
            "target" => Some(&self.target),
            _ => None,
        }
    }
}

fn missing_field(field: &str) -> Error {
    Error::bad_input(format!(
        "Missing required field \"{}\" from input document",
        field
    ))
}

fn required_str<'a>(value: Option<&'a Value>, field: &str) -> Result<&'a str> {
    value
        .ok_or_else(|| missing_field(field))?
        .as_str()
        .ok_or_else(|| Error::bad_input(format!("field \"{}\" is not a string", field)))
}

/// Accepts unix milliseconds (number or numeric string) or an ISO 8601 date
fn parse_timestamp(value: &Value) -> Result<DateTime<Utc>> {
    let from_millis = |ms: i64| {
        Utc.timestamp_millis_opt(ms)
            .single()
            .ok_or_else(|| Error::bad_input(format!("timestamp out of range: {}", ms)))
    };

    match value {
        Value::Number(n) => {
            let ms = n
                .as_i64()
                .ok_or_else(|| Error::bad_input("timestamp is not an integer"))?;
            from_millis(ms)
        }
        Value::String(s) => {
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Ok(dt.with_timezone(&Utc));
            }
            if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
                return Ok(naive.and_utc());
            }
            let ms = s
                .parse::<i64>()
                .map_err(|_| Error::bad_input(format!("invalid timestamp format: {}", s)))?;
            from_millis(ms)
        }
        _ => Err(Error::bad_input("invalid timestamp format")),
    }
}
