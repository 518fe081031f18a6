//! Statistical report over stored records.
//!
//! Descriptive statistics per numeric field, heart-rate anomaly detection by
//! z-score, activity breakdowns and rapid heart-rate changes. Rendered as JSON
//! by the API and as plain text by the CLI.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, Utc};
use pulse_core::formatting::{format_number, percentage};
use pulse_core::models::HealthRecord;
use serde::Serialize;

/// Heart-rate z-score above which a reading is reported as an anomaly.
pub const ANOMALY_Z_THRESHOLD: f64 = 2.0;

/// Heart-rate jump between consecutive readings that counts as rapid (bpm).
pub const RAPID_CHANGE_BPM: f64 = 20.0;

// ── Public types ──────────────────────────────────────────────────────────────

/// Earliest and latest parseable timestamps.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub duration_hours: f64,
}

/// Descriptive statistics for one numeric field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldStats {
    pub count: usize,
    pub mean: f64,
    pub median: f64,
    /// Sample standard deviation; `0` with fewer than two values.
    pub std: f64,
    pub min: f64,
    pub max: f64,
    pub q25: f64,
    pub q75: f64,
}

/// One heart-rate reading flagged by z-score.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Anomaly {
    pub timestamp: Option<String>,
    pub heart_rate: f64,
    pub z_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnomalySummary {
    pub count: usize,
    pub percentage: f64,
    pub threshold: f64,
    pub records: Vec<Anomaly>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivityShare {
    pub count: usize,
    pub percentage: f64,
}

/// Heart-rate statistics for one activity.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityHeartRate {
    pub mean_hr: f64,
    pub std_hr: f64,
    pub min_hr: f64,
    pub max_hr: f64,
}

/// The complete output of [`analyze`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisReport {
    pub generated_at: DateTime<Utc>,
    pub total_records: usize,
    /// Field names seen across all records, in first-seen order.
    pub columns: Vec<String>,
    pub date_range: Option<DateRange>,
    /// Keyed by field name (`heartRate`, `hrv`, `temperature`).
    pub statistics: BTreeMap<String, FieldStats>,
    pub anomalies: Option<AnomalySummary>,
    pub activity_breakdown: BTreeMap<String, ActivityShare>,
    pub activity_stats: BTreeMap<String, ActivityHeartRate>,
    pub rapid_changes: usize,
}

// ── Public functions ──────────────────────────────────────────────────────────

/// Run the full analysis over `records`.
pub fn analyze(records: &[HealthRecord]) -> AnalysisReport {
    let mut statistics = BTreeMap::new();
    let numeric: [(&str, fn(&HealthRecord) -> Option<f64>); 3] = [
        ("heartRate", |r| r.heart_rate),
        ("hrv", |r| r.hrv),
        ("temperature", |r| r.temperature),
    ];
    for (name, get) in numeric {
        let values: Vec<f64> = records.iter().filter_map(get).collect();
        if let Some(stats) = field_stats(&values) {
            statistics.insert(name.to_string(), stats);
        }
    }

    let (activity_breakdown, activity_stats) = activity_tables(records);

    AnalysisReport {
        generated_at: Utc::now(),
        total_records: records.len(),
        columns: columns(records),
        date_range: date_range(records),
        statistics,
        anomalies: anomalies(records),
        activity_breakdown,
        activity_stats,
        rapid_changes: rapid_changes(records),
    }
}

/// Parse the timestamp formats wearable exports commonly use.
///
/// RFC 3339 values keep their offset; naive values are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Render `report` as the plain-text report printed by the CLI.
pub fn render_text(report: &AnalysisReport) -> String {
    let rule = "=".repeat(60);
    let thin = "-".repeat(60);
    let mut lines = vec![
        rule.clone(),
        "HEART RATE DATA ANALYSIS REPORT".to_string(),
        rule.clone(),
        format!("Generated: {}", report.generated_at.format("%Y-%m-%d %H:%M:%S")),
        String::new(),
        "SUMMARY".to_string(),
        thin.clone(),
        format!("Total Records: {}", format_number(report.total_records as f64, 0)),
        format!("Columns: {}", report.columns.join(", ")),
    ];

    if let Some(range) = &report.date_range {
        lines.push(format!("Date Range: {} to {}", range.start, range.end));
        lines.push(format!("Duration: {} hours", format_number(range.duration_hours, 1)));
    }
    lines.push(String::new());

    if !report.statistics.is_empty() {
        lines.push("STATISTICS".to_string());
        lines.push(thin.clone());
        for (field, s) in &report.statistics {
            lines.push(format!("{}:", field));
            lines.push(format!("  Mean: {}", format_number(s.mean, 2)));
            lines.push(format!("  Median: {}", format_number(s.median, 2)));
            lines.push(format!("  Std Dev: {}", format_number(s.std, 2)));
            lines.push(format!("  Range: {} - {}", format_number(s.min, 2), format_number(s.max, 2)));
            lines.push(format!("  IQR: {} - {}", format_number(s.q25, 2), format_number(s.q75, 2)));
            lines.push(String::new());
        }
    }

    if let Some(a) = &report.anomalies {
        lines.push("ANOMALY DETECTION".to_string());
        lines.push(thin.clone());
        lines.push(format!(
            "Detected: {} anomalies ({}%)",
            a.count,
            format_number(a.percentage, 1)
        ));
        lines.push(format!("Threshold: Z-score > {}", a.threshold));
        lines.push(format!("Rapid changes (> {} bpm): {}", RAPID_CHANGE_BPM, report.rapid_changes));
        lines.push(String::new());
    }

    if !report.activity_breakdown.is_empty() {
        lines.push("ACTIVITY BREAKDOWN".to_string());
        lines.push(thin.clone());
        for (activity, share) in &report.activity_breakdown {
            lines.push(format!(
                "{}: {} records ({}%)",
                activity,
                share.count,
                format_number(share.percentage, 1)
            ));
        }
        lines.push(String::new());
    }

    if !report.activity_stats.is_empty() {
        lines.push("ACTIVITY-SPECIFIC HEART RATE".to_string());
        lines.push(thin);
        for (activity, s) in &report.activity_stats {
            lines.push(format!("{}:", activity));
            lines.push(format!("  Mean: {} bpm", format_number(s.mean_hr, 1)));
            lines.push(format!("  Std: {} bpm", format_number(s.std_hr, 1)));
            lines.push(format!(
                "  Range: {} - {} bpm",
                format_number(s.min_hr, 1),
                format_number(s.max_hr, 1)
            ));
        }
        lines.push(String::new());
    }

    lines.push(rule);
    lines.join("\n")
}

// ── Internal helpers ──────────────────────────────────────────────────────────

fn columns(records: &[HealthRecord]) -> Vec<String> {
    let mut seen: Vec<String> = Vec::new();
    let mut note = |key: &str| {
        if !seen.iter().any(|k| k == key) {
            seen.push(key.to_string());
        }
    };
    for record in records {
        let present = [
            ("timestamp", record.timestamp.is_some()),
            ("heartRate", record.heart_rate.is_some()),
            ("hrv", record.hrv.is_some()),
            ("activity", record.activity.is_some()),
            ("device", true),
            ("temperature", record.temperature.is_some()),
        ];
        for (key, _) in present.iter().filter(|(_, p)| *p) {
            note(key);
        }
        for key in record.extra.keys() {
            note(key);
        }
    }
    seen
}

fn date_range(records: &[HealthRecord]) -> Option<DateRange> {
    let mut parsed = records
        .iter()
        .filter_map(|r| r.timestamp.as_deref())
        .filter_map(parse_timestamp);

    let first = parsed.next()?;
    let (start, end) = parsed.fold((first, first), |(lo, hi), ts| (lo.min(ts), hi.max(ts)));
    Some(DateRange {
        start,
        end,
        duration_hours: (end - start).num_seconds() as f64 / 3600.0,
    })
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Standard deviation with `ddof` delta degrees of freedom.
fn std_dev(values: &[f64], ddof: usize) -> f64 {
    if values.len() <= ddof {
        return 0.0;
    }
    let m = mean(values);
    let ss: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    (ss / (values.len() - ddof) as f64).sqrt()
}

/// Linear-interpolated quantile of an ascending slice.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

fn field_stats(values: &[f64]) -> Option<FieldStats> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    Some(FieldStats {
        count: values.len(),
        mean: mean(values),
        median: quantile(&sorted, 0.5),
        std: std_dev(values, 1),
        min: sorted[0],
        max: sorted[sorted.len() - 1],
        q25: quantile(&sorted, 0.25),
        q75: quantile(&sorted, 0.75),
    })
}

fn anomalies(records: &[HealthRecord]) -> Option<AnomalySummary> {
    let readings: Vec<(&HealthRecord, f64)> = records
        .iter()
        .filter_map(|r| r.heart_rate.map(|hr| (r, hr)))
        .collect();
    if readings.is_empty() {
        return None;
    }

    let values: Vec<f64> = readings.iter().map(|(_, hr)| *hr).collect();
    let m = mean(&values);
    let sd = std_dev(&values, 0);

    let flagged: Vec<Anomaly> = if sd == 0.0 {
        Vec::new()
    } else {
        readings
            .iter()
            .filter_map(|(r, hr)| {
                let z = ((hr - m) / sd).abs();
                (z > ANOMALY_Z_THRESHOLD).then(|| Anomaly {
                    timestamp: r.timestamp.clone(),
                    heart_rate: *hr,
                    z_score: z,
                })
            })
            .collect()
    };

    Some(AnomalySummary {
        count: flagged.len(),
        percentage: percentage(flagged.len() as f64, records.len() as f64, 2),
        threshold: ANOMALY_Z_THRESHOLD,
        records: flagged,
    })
}

fn activity_tables(
    records: &[HealthRecord],
) -> (
    BTreeMap<String, ActivityShare>,
    BTreeMap<String, ActivityHeartRate>,
) {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut heart_rates: BTreeMap<String, Vec<f64>> = BTreeMap::new();

    for record in records {
        let Some(activity) = &record.activity else {
            continue;
        };
        *counts.entry(activity.clone()).or_default() += 1;
        if let Some(hr) = record.heart_rate {
            heart_rates.entry(activity.clone()).or_default().push(hr);
        }
    }

    let total = records.len() as f64;
    let breakdown = counts
        .into_iter()
        .map(|(activity, count)| {
            let share = ActivityShare {
                count,
                percentage: percentage(count as f64, total, 2),
            };
            (activity, share)
        })
        .collect();

    let stats = heart_rates
        .into_iter()
        .map(|(activity, values)| {
            let hr = ActivityHeartRate {
                mean_hr: mean(&values),
                std_hr: std_dev(&values, 1),
                min_hr: values.iter().copied().fold(f64::INFINITY, f64::min),
                max_hr: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            };
            (activity, hr)
        })
        .collect();

    (breakdown, stats)
}

/// Count consecutive heart-rate readings that differ by more than
/// [`RAPID_CHANGE_BPM`]. Readings are ordered by timestamp (stable, with
/// unparseable timestamps kept in input order at the end).
fn rapid_changes(records: &[HealthRecord]) -> usize {
    let mut series: Vec<(Option<DateTime<Utc>>, f64)> = records
        .iter()
        .filter_map(|r| {
            let hr = r.heart_rate?;
            Some((r.timestamp.as_deref().and_then(parse_timestamp), hr))
        })
        .collect();
    series.sort_by_key(|(ts, _)| (ts.is_none(), *ts));

    series
        .windows(2)
        .filter(|w| (w[1].1 - w[0].1).abs() > RAPID_CHANGE_BPM)
        .count()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(ts: &str, hr: Option<f64>, activity: Option<&str>) -> HealthRecord {
        HealthRecord {
            timestamp: Some(ts.to_string()),
            heart_rate: hr,
            activity: activity.map(str::to_string),
            device: "Test".to_string(),
            ..Default::default()
        }
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = DateTime::parse_from_rfc3339("2024-01-01T08:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(parse_timestamp("2024-01-01T08:30:00Z"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-01T10:30:00+02:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-01T08:30:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-01 08:30:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-01T08:30:00.000"), Some(expected));
        assert_eq!(parse_timestamp("last tuesday"), None);
    }

    #[test]
    fn test_field_stats_matches_linear_interpolation() {
        let stats = field_stats(&[4.0, 1.0, 3.0, 2.0]).unwrap();
        assert_eq!(stats.count, 4);
        assert!(approx(stats.mean, 2.5));
        assert!(approx(stats.median, 2.5));
        assert!(approx(stats.min, 1.0));
        assert!(approx(stats.max, 4.0));
        assert!(approx(stats.q25, 1.75));
        assert!(approx(stats.q75, 3.25));
        // Sample std of 1..4 = sqrt(5/3).
        assert!(approx(stats.std, (5.0_f64 / 3.0).sqrt()));
    }

    #[test]
    fn test_field_stats_single_value() {
        let stats = field_stats(&[72.0]).unwrap();
        assert!(approx(stats.median, 72.0));
        assert_eq!(stats.std, 0.0);
        assert!(field_stats(&[]).is_none());
    }

    #[test]
    fn test_analyze_empty() {
        let report = analyze(&[]);
        assert_eq!(report.total_records, 0);
        assert!(report.columns.is_empty());
        assert!(report.date_range.is_none());
        assert!(report.statistics.is_empty());
        assert!(report.anomalies.is_none());
        assert_eq!(report.rapid_changes, 0);
    }

    #[test]
    fn test_date_range_ignores_unparseable() {
        let records = vec![
            rec("2024-01-01T06:00:00Z", None, None),
            rec("not a time", None, None),
            rec("2024-01-01T00:00:00Z", None, None),
            rec("2024-01-01T12:30:00Z", None, None),
        ];
        let range = analyze(&records).date_range.unwrap();
        assert_eq!(range.start.to_rfc3339(), "2024-01-01T00:00:00+00:00");
        assert_eq!(range.end.to_rfc3339(), "2024-01-01T12:30:00+00:00");
        assert!(approx(range.duration_hours, 12.5));
    }

    #[test]
    fn test_anomaly_detection_flags_outlier() {
        let mut records: Vec<HealthRecord> = (0..10)
            .map(|i| rec(&format!("2024-01-01T00:{:02}:00Z", i), Some(70.0), None))
            .collect();
        records.push(rec("2024-01-01T00:10:00Z", Some(150.0), None));

        let summary = analyze(&records).anomalies.unwrap();
        assert_eq!(summary.count, 1);
        assert_eq!(summary.records[0].heart_rate, 150.0);
        assert_eq!(summary.records[0].timestamp.as_deref(), Some("2024-01-01T00:10:00Z"));
        assert!(summary.records[0].z_score > ANOMALY_Z_THRESHOLD);
        assert!(approx(summary.percentage, 9.09));
    }

    #[test]
    fn test_anomalies_none_flagged_for_constant_series() {
        let records = vec![rec("a", Some(60.0), None), rec("b", Some(60.0), None)];
        let summary = analyze(&records).anomalies.unwrap();
        assert_eq!(summary.count, 0);
    }

    #[test]
    fn test_activity_breakdown_and_stats() {
        let records = vec![
            rec("a", Some(60.0), Some("sleeping")),
            rec("b", Some(64.0), Some("sleeping")),
            rec("c", Some(110.0), Some("exercise")),
            rec("d", None, Some("walking")),
            rec("e", Some(80.0), None),
        ];
        let report = analyze(&records);

        let keys: Vec<&str> = report.activity_breakdown.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["exercise", "sleeping", "walking"]);
        assert_eq!(report.activity_breakdown["sleeping"].count, 2);
        assert!(approx(report.activity_breakdown["sleeping"].percentage, 40.0));

        let sleeping = &report.activity_stats["sleeping"];
        assert!(approx(sleeping.mean_hr, 62.0));
        assert!(approx(sleeping.min_hr, 60.0));
        assert!(approx(sleeping.max_hr, 64.0));
        assert!(!report.activity_stats.contains_key("walking"));
    }

    #[test]
    fn test_rapid_changes_ordered_by_timestamp() {
        // In input order the jumps are 60→100→65; sorted by time they are
        // 60→65→100, which has a single jump above 20 bpm.
        let records = vec![
            rec("2024-01-01T00:00:00Z", Some(60.0), None),
            rec("2024-01-01T00:10:00Z", Some(100.0), None),
            rec("2024-01-01T00:05:00Z", Some(65.0), None),
        ];
        assert_eq!(analyze(&records).rapid_changes, 1);
    }

    #[test]
    fn test_columns_first_seen_order() {
        let mut extra = serde_json::Map::new();
        extra.insert("spo2".to_string(), serde_json::json!(98));
        let records = vec![
            rec("a", Some(60.0), None),
            HealthRecord {
                timestamp: Some("b".to_string()),
                extra,
                ..Default::default()
            },
        ];
        let columns = analyze(&records).columns;
        assert_eq!(columns, vec!["timestamp", "heartRate", "device", "spo2"]);
    }

    #[test]
    fn test_render_text_sections() {
        let records = vec![
            rec("2024-01-01T00:00:00Z", Some(60.0), Some("resting")),
            rec("2024-01-01T01:00:00Z", Some(90.0), Some("walking")),
        ];
        let text = render_text(&analyze(&records));
        assert!(text.contains("HEART RATE DATA ANALYSIS REPORT"));
        assert!(text.contains("Total Records: 2"));
        assert!(text.contains("Duration: 1.0 hours"));
        assert!(text.contains("heartRate:"));
        assert!(text.contains("  Mean: 75.00"));
        assert!(text.contains("walking: 1 records (50.0%)"));
        assert!(text.contains("Rapid changes (> 20 bpm): 1"));
    }
}
