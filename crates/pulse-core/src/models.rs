use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{PulseError, Result};

/// Device label assigned to records that do not name one.
pub const UNKNOWN_DEVICE: &str = "Unknown Device";

/// Activities the wearable exports are expected to use.
pub const KNOWN_ACTIVITIES: [&str; 4] = ["resting", "walking", "exercise", "sleeping"];

/// Heart rate (bpm) above which a reading counts as a high-HR event.
pub const HIGH_HEART_RATE_BPM: f64 = 100.0;

/// Maximum heart rate (bpm) above which a device is flagged `alert`.
pub const ALERT_HEART_RATE_BPM: f64 = 110.0;

/// Maximum heart rate (bpm) above which a device is flagged `watch`.
pub const WATCH_HEART_RATE_BPM: f64 = 90.0;

// ── FileKind ──────────────────────────────────────────────────────────────────

/// Declared type of an uploaded file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Csv,
    Json,
}

impl FileKind {
    /// Resolve the kind from a file name's extension (case-insensitive).
    ///
    /// Anything other than `.csv` / `.json` is an [`PulseError::UnsupportedType`].
    pub fn from_file_name(file_name: &str) -> Result<Self> {
        let ext = std::path::Path::new(file_name)
            .extension()
            .and_then(|e| e.to_str())
            .ok_or_else(|| PulseError::UnsupportedType(file_name.to_string()))?;
        ext.parse()
            .map_err(|_| PulseError::UnsupportedType(file_name.to_string()))
    }
}

impl std::str::FromStr for FileKind {
    type Err = PulseError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(FileKind::Csv),
            "json" => Ok(FileKind::Json),
            other => Err(PulseError::UnsupportedType(other.to_string())),
        }
    }
}

impl std::fmt::Display for FileKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileKind::Csv => write!(f, "csv"),
            FileKind::Json => write!(f, "json"),
        }
    }
}

// ── HealthRecord ──────────────────────────────────────────────────────────────

/// One normalized device reading.
///
/// Fields the normalizer does not recognise are kept verbatim in `extra` and
/// flattened back into the record when serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthRecord {
    /// ISO-8601 timestamp as supplied by the device export (not validated).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    /// Heart rate in beats per minute.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heart_rate: Option<f64>,
    /// Heart-rate variability in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hrv: Option<f64>,
    /// Activity label, usually one of [`KNOWN_ACTIVITIES`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity: Option<String>,
    /// Device label; [`UNKNOWN_DEVICE`] when the source row had none.
    #[serde(default = "unknown_device")]
    pub device: String,
    /// Skin/body temperature in °C.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Any additional fields of the source row.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn unknown_device() -> String {
    UNKNOWN_DEVICE.to_string()
}

impl Default for HealthRecord {
    fn default() -> Self {
        Self {
            timestamp: None,
            heart_rate: None,
            hrv: None,
            activity: None,
            device: unknown_device(),
            temperature: None,
            extra: Map::new(),
        }
    }
}

// ── Row warnings ──────────────────────────────────────────────────────────────

/// Category of a non-fatal, row-level normalization problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WarningKind {
    /// A numeric field was present but could not be coerced; it was dropped.
    #[serde(rename = "RowCoercionWarning")]
    Coercion,
    /// The row was not a mapping and was dropped.
    NotAMapping,
    /// The row has no timestamp; it was kept.
    MissingTimestamp,
    /// A numeric value lies outside its plausible physiological range.
    OutOfRange,
    /// The activity label is not one of [`KNOWN_ACTIVITIES`].
    UnknownActivity,
}

/// A warning attached to one input row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowWarning {
    /// Zero-based position of the row in the parsed input.
    pub row: usize,
    pub kind: WarningKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub message: String,
}

// ── UploadBatch ───────────────────────────────────────────────────────────────

/// Metadata describing one stored upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadBatch {
    /// Store-assigned identifier; lexicographic order equals ingestion order.
    pub id: String,
    /// Source file name.
    pub name: String,
    /// Human-readable byte count of the uploaded file, e.g. `"1.25 KB"`.
    pub size: String,
    /// When the batch was ingested.
    pub time: DateTime<Utc>,
    /// Number of normalized records in the batch.
    pub record_count: usize,
}

// ── Aggregate view ────────────────────────────────────────────────────────────

/// One summary statistic card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reading {
    pub label: String,
    pub value: String,
    pub unit: String,
    /// Sample-size annotation, e.g. `"From 12 readings"`.
    pub detail: String,
}

/// Risk tier derived from a device group's maximum heart rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatientStatus {
    Stable,
    Watch,
    Alert,
}

impl PatientStatus {
    /// `alert` above 110 bpm, `watch` above 90 bpm, otherwise `stable`.
    pub fn from_max_heart_rate(max_hr: f64) -> Self {
        if max_hr > ALERT_HEART_RATE_BPM {
            PatientStatus::Alert
        } else if max_hr > WATCH_HEART_RATE_BPM {
            PatientStatus::Watch
        } else {
            PatientStatus::Stable
        }
    }
}

impl std::fmt::Display for PatientStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PatientStatus::Stable => write!(f, "stable"),
            PatientStatus::Watch => write!(f, "watch"),
            PatientStatus::Alert => write!(f, "alert"),
        }
    }
}

/// Per-device status row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientRow {
    pub device: String,
    /// Rounded average heart rate over the group's readings.
    pub hr: i64,
    /// Highest heart rate seen for the device.
    pub max_hr: f64,
    /// Number of records in the group.
    pub records: usize,
    pub status: PatientStatus,
}

/// Summary cards and device rows, recomputed from the full record set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateView {
    pub readings: Vec<Reading>,
    pub patients: Vec<PatientRow>,
}
