//! Summary readings and per-device status over the full record set.
//!
//! Everything here is recomputed from scratch on each call; nothing is cached.

use std::collections::HashMap;

use pulse_core::formatting::{format_number, round_half_up};
use pulse_core::models::{
    AggregateView, HealthRecord, PatientRow, PatientStatus, Reading, HIGH_HEART_RATE_BPM,
};

// ── RunningMean ───────────────────────────────────────────────────────────────

/// Sum/count/max accumulator over the values that are present.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunningMean {
    pub sum: f64,
    pub count: usize,
    pub max: Option<f64>,
}

impl RunningMean {
    pub fn add(&mut self, value: Option<f64>) {
        if let Some(v) = value {
            self.sum += v;
            self.count += 1;
            self.max = Some(self.max.map_or(v, |m| m.max(v)));
        }
    }

    /// Mean rounded to the nearest integer; `0` when nothing was added.
    pub fn rounded_mean(&self) -> i64 {
        if self.count == 0 {
            0
        } else {
            round_half_up(self.sum / self.count as f64)
        }
    }
}

// ── DeviceGroup ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct DeviceGroup {
    device: String,
    heart_rate: RunningMean,
    records: usize,
}

impl DeviceGroup {
    fn into_row(self) -> PatientRow {
        let max_hr = self.heart_rate.max.unwrap_or(0.0);
        PatientRow {
            device: self.device,
            hr: self.heart_rate.rounded_mean(),
            max_hr,
            records: self.records,
            status: PatientStatus::from_max_heart_rate(max_hr),
        }
    }
}

// ── Aggregator ────────────────────────────────────────────────────────────────

/// Build the [`AggregateView`] for `records`.
///
/// Devices appear in the order they are first seen, so repeated calls on the
/// same records yield identical output.
pub fn summarize(records: &[HealthRecord]) -> AggregateView {
    AggregateView {
        readings: readings(records),
        patients: patients(records),
    }
}

fn readings(records: &[HealthRecord]) -> Vec<Reading> {
    let mut heart_rate = RunningMean::default();
    let mut hrv = RunningMean::default();
    let mut high_hr_events = 0usize;

    for record in records {
        heart_rate.add(record.heart_rate);
        hrv.add(record.hrv);
        if record.heart_rate.is_some_and(|hr| hr > HIGH_HEART_RATE_BPM) {
            high_hr_events += 1;
        }
    }

    vec![
        average_reading("Avg Heart Rate", "bpm", &heart_rate, "No heart rate data"),
        average_reading("Avg HRV", "ms", &hrv, "No HRV data"),
        Reading {
            label: "High HR Events".to_string(),
            value: high_hr_events.to_string(),
            unit: "events".to_string(),
            detail: format!("Above 100 bpm in {} readings", heart_rate.count),
        },
        Reading {
            label: "Total Records".to_string(),
            value: format_number(records.len() as f64, 0),
            unit: "records".to_string(),
            detail: format!("Across {} devices", distinct_devices(records)),
        },
    ]
}

fn average_reading(label: &str, unit: &str, stats: &RunningMean, empty_detail: &str) -> Reading {
    let detail = if stats.count == 0 {
        empty_detail.to_string()
    } else {
        format!("From {} readings", stats.count)
    };
    Reading {
        label: label.to_string(),
        value: stats.rounded_mean().to_string(),
        unit: unit.to_string(),
        detail,
    }
}

fn patients(records: &[HealthRecord]) -> Vec<PatientRow> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut groups: Vec<DeviceGroup> = Vec::new();

    for record in records {
        let slot = *index.entry(record.device.as_str()).or_insert_with(|| {
            groups.push(DeviceGroup {
                device: record.device.clone(),
                heart_rate: RunningMean::default(),
                records: 0,
            });
            groups.len() - 1
        });
        let group = &mut groups[slot];
        group.heart_rate.add(record.heart_rate);
        group.records += 1;
    }

    groups.into_iter().map(DeviceGroup::into_row).collect()
}

fn distinct_devices(records: &[HealthRecord]) -> usize {
    records
        .iter()
        .map(|r| r.device.as_str())
        .collect::<std::collections::HashSet<_>>()
        .len()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
