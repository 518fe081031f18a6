//! Raw upload decoding.
//!
//! Turns the bytes of an uploaded CSV or JSON export into untyped rows. The
//! normalizer decides which of those rows become [`HealthRecord`]s.
//!
//! [`HealthRecord`]: pulse_core::models::HealthRecord

use pulse_core::models::FileKind;
use pulse_core::{PulseError, Result};
use serde_json::{Map, Value};
use tracing::debug;

/// Decode `content` according to `kind`.
///
/// JSON must be a single object or an array; CSV is split on `\n` and `,`
/// without quote handling, so a field containing a comma shifts the rest of
/// its row.
pub fn parse(content: &[u8], kind: FileKind) -> Result<Vec<Value>> {
    let rows = match kind {
        FileKind::Json => parse_json(content)?,
        FileKind::Csv => parse_csv(content)?,
    };
    debug!(kind = %kind, rows = rows.len(), "parsed upload");
    Ok(rows)
}

fn parse_json(content: &[u8]) -> Result<Vec<Value>> {
    let value: Value = serde_json::from_slice(content)
        .map_err(|e| PulseError::MalformedInput(format!("invalid JSON: {}", e)))?;

    match value {
        Value::Array(items) => Ok(items),
        Value::Object(_) => Ok(vec![value]),
        other => Err(PulseError::MalformedInput(format!(
            "expected a JSON object or array, found {}",
            json_type_name(&other)
        ))),
    }
}

fn parse_csv(content: &[u8]) -> Result<Vec<Value>> {
    let text = std::str::from_utf8(content)
        .map_err(|e| PulseError::MalformedInput(format!("CSV is not valid UTF-8: {}", e)))?;

    let mut lines = text
        .split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .filter(|line| !line.trim().is_empty());

    let Some(header_line) = lines.next() else {
        return Ok(Vec::new());
    };
    let headers: Vec<&str> = header_line.split(',').map(str::trim).collect();

    let rows = lines
        .map(|line| {
            let mut values = line.split(',').map(str::trim);
            let row: Map<String, Value> = headers
                .iter()
                .map(|header| {
                    let value = values.next().unwrap_or_default();
                    (header.to_string(), Value::String(value.to_string()))
                })
                .collect();
            Value::Object(row)
        })
        .collect();

    Ok(rows)
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
