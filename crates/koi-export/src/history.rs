//! Appraisal history CSV.
//!
//! One row per appraisal, timestamp first. Files are append-only: write
//! [`HISTORY_HEADER`] once when the file is created, then one
//! [`history_row`] per appraisal.
//!
//! Timestamps are RFC 3339 in UTC with second precision
//! (`2026-10-18T09:30:00Z`). Floats use the shortest representation that
//! round-trips.

use std::fmt::Write;

use chrono::{DateTime, SecondsFormat, Utc};
use koi_metrics::AppraisalMetrics;

/// Column names, in order.
pub const HISTORY_COLUMNS: [&str; 11] = [
    "timestamp",
    "size_cm",
    "pattern",
    "pattern_confidence",
    "pattern_low_confidence",
    "color_white_pct",
    "color_red_pct",
    "color_black_pct",
    "color_quality",
    "symmetry_score",
    "predicted_price",
];

/// Header line, without trailing newline.
pub const HISTORY_HEADER: &str = "timestamp,size_cm,pattern,pattern_confidence,pattern_low_confidence,color_white_pct,color_red_pct,color_black_pct,color_quality,symmetry_score,predicted_price";

/// Flatten one appraisal into a CSV line (with trailing newline).
#[must_use]
pub fn history_row(timestamp: DateTime<Utc>, metrics: &AppraisalMetrics) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{},{},{},{},{},{},{},{},{},{},{}",
        timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
        metrics.size_cm,
        metrics.pattern.as_str(),
        metrics.pattern_confidence,
        metrics.pattern_low_confidence,
        metrics.color.white_pct,
        metrics.color.red_pct,
        metrics.color.black_pct,
        metrics.color_quality,
        metrics.symmetry_score,
        metrics.predicted_price,
    );
    out
}

/// A complete CSV document: header plus one row per entry.
#[must_use]
pub fn to_history_csv(entries: &[(DateTime<Utc>, &AppraisalMetrics)]) -> String {
    let mut out = String::with_capacity(HISTORY_HEADER.len() + 1 + entries.len() * 128);
    out.push_str(HISTORY_HEADER);
    out.push('\n');
    for (timestamp, metrics) in entries {
        out.push_str(&history_row(*timestamp, metrics));
    }
    out
}

/// Whether `existing` (the current contents of a history file) still
/// needs a header before rows are appended.
#[must_use]
pub fn needs_header(existing: &str) -> bool {
    existing.lines().next().is_none_or(|first| first.trim().is_empty())
}
