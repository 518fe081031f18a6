//! Coercion of parsed rows into [`HealthRecord`]s.
//!
//! Numeric fields are coerced when they can be; anything that cannot is
//! dropped from its record and reported as a [`RowWarning`]. Text fields
//! holding an object or array keep that value in `extra` under `<field>Raw`.
//! Rows are never rejected for bad field values, only for not being a
//! mapping at all.

use pulse_core::models::{
    HealthRecord, RowWarning, WarningKind, KNOWN_ACTIVITIES, UNKNOWN_DEVICE,
};
use serde_json::{Map, Value};
use tracing::{debug, warn};

/// Plausible heart-rate range in bpm.
const HEART_RATE_RANGE: (f64, f64) = (30.0, 220.0);

/// Plausible temperature range in °C.
const TEMPERATURE_RANGE: (f64, f64) = (30.0, 45.0);

/// Output of [`normalize`].
#[derive(Debug, Clone, Default)]
pub struct Normalized {
    pub records: Vec<HealthRecord>,
    pub warnings: Vec<RowWarning>,
}

/// Normalize `rows` in order. Output order always matches input order.
pub fn normalize(rows: Vec<Value>) -> Normalized {
    let mut out = Normalized {
        records: Vec::with_capacity(rows.len()),
        warnings: Vec::new(),
    };

    for (idx, row) in rows.into_iter().enumerate() {
        match row {
            Value::Object(map) => {
                let record = normalize_row(idx, map, &mut out.warnings);
                out.records.push(record);
            }
            other => {
                warn!(row = idx, "dropping non-object row");
                out.warnings.push(RowWarning {
                    row: idx,
                    kind: WarningKind::NotAMapping,
                    field: None,
                    message: format!("row is not an object: {}", other),
                });
            }
        }
    }

    debug!(
        records = out.records.len(),
        warnings = out.warnings.len(),
        "normalized rows"
    );
    out
}

fn normalize_row(row: usize, mut map: Map<String, Value>, warnings: &mut Vec<RowWarning>) -> HealthRecord {
    let non_scalar_timestamp = matches!(
        map.get("timestamp"),
        Some(Value::Object(_) | Value::Array(_))
    );
    let timestamp = take_text(&mut map, "timestamp", row, warnings);
    if timestamp.is_none() && !non_scalar_timestamp {
        warnings.push(RowWarning {
            row,
            kind: WarningKind::MissingTimestamp,
            field: Some("timestamp".to_string()),
            message: "row has no timestamp".to_string(),
        });
    }

    let heart_rate = take_number(&mut map, "heartRate", row, warnings);
    let hrv = take_number(&mut map, "hrv", row, warnings);
    let temperature = take_number(&mut map, "temperature", row, warnings);

    let activity = take_text(&mut map, "activity", row, warnings);
    let device = take_text(&mut map, "device", row, warnings)
        .unwrap_or_else(|| UNKNOWN_DEVICE.to_string());

    let record = HealthRecord {
        timestamp,
        heart_rate,
        hrv,
        activity,
        device,
        temperature,
        extra: map,
    };
    check_ranges(row, &record, warnings);
    record
}

/// Remove `field` and coerce it to a finite number.
///
/// `null` and blank strings count as absent. Anything else that fails to
/// coerce is dropped with a [`WarningKind::Coercion`] warning.
fn take_number(
    map: &mut Map<String, Value>,
    field: &str,
    row: usize,
    warnings: &mut Vec<RowWarning>,
) -> Option<f64> {
    let value = map.remove(field)?;
    let coerced = match &value {
        Value::Null => return None,
        Value::String(s) if s.trim().is_empty() => return None,
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    match coerced {
        Some(n) if n.is_finite() => Some(n),
        _ => {
            warnings.push(RowWarning {
                row,
                kind: WarningKind::Coercion,
                field: Some(field.to_string()),
                message: format!("{} is not a number: {}", field, value),
            });
            None
        }
    }
}

/// Remove `field` and render it as text.
///
/// `null` and blank strings count as absent. An object or array is moved to
/// `<field>Raw` with a [`WarningKind::Coercion`] warning.
fn take_text(
    map: &mut Map<String, Value>,
    field: &str,
    row: usize,
    warnings: &mut Vec<RowWarning>,
) -> Option<String> {
    match map.remove(field)? {
        Value::Null => None,
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        raw => {
            let raw_key = format!("{}Raw", field);
            warnings.push(RowWarning {
                row,
                kind: WarningKind::Coercion,
                field: Some(field.to_string()),
                message: format!("{} is not a scalar, kept as {}: {}", field, raw_key, raw),
            });
            map.insert(raw_key, raw);
            None
        }
    }
}

/// Advisory checks; they flag but never alter the record.
fn check_ranges(row: usize, record: &HealthRecord, warnings: &mut Vec<RowWarning>) {
    let mut flag = |field: &str, message: String| {
        warnings.push(RowWarning {
            row,
            kind: WarningKind::OutOfRange,
            field: Some(field.to_string()),
            message,
        });
    };

    if let Some(hr) = record.heart_rate {
        if hr < HEART_RATE_RANGE.0 || hr > HEART_RATE_RANGE.1 {
            flag("heartRate", format!("heart rate out of range (30-220): {}", hr));
        }
    }
    if let Some(hrv) = record.hrv {
        if hrv < 0.0 {
            flag("hrv", format!("negative HRV: {}", hrv));
        }
    }
    if let Some(temp) = record.temperature {
        if temp < TEMPERATURE_RANGE.0 || temp > TEMPERATURE_RANGE.1 {
            flag("temperature", format!("temperature out of range (30-45): {}", temp));
        }
    }

    if let Some(activity) = &record.activity {
        if !KNOWN_ACTIVITIES.contains(&activity.as_str()) {
            warnings.push(RowWarning {
                row,
                kind: WarningKind::UnknownActivity,
                field: Some("activity".to_string()),
                message: format!("unrecognised activity: {}", activity),
            });
        }
    }
}
