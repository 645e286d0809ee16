//! Indicator completeness validation for backfill batches.
//!
//! Nulls are expected in two places: outside the requested window (the
//! lookback that feeds an indicator's first value) and inside the window
//! before the indicator produces its first value. Anywhere else a null is a
//! gap, and the whole batch is rejected.

use crate::error::ValidationError;
use csync_core::{HistoricalBatch, IndicatorFields, TimeRange, TimeSeriesPoint};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// Validate `batch` against the requested `[from_ts, to_ts]` window.
///
/// An unusable window fails unconditionally: without it, warm-up and gaps
/// cannot be told apart.
pub fn validate(
    batch: &HistoricalBatch,
    from_ts: &str,
    to_ts: &str,
) -> Result<(), ValidationError> {
    let range = TimeRange::parse(from_ts, to_ts)
        .map_err(|e| ValidationError::InvalidRange(e.to_string()))?;
    validate_range(batch, range)
}

/// Validate `batch` against an already parsed window.
///
/// Warm-up ends per field: a multi-field indicator such as MACD produces
/// its line before its signal, and each field is only required from its
/// own first value on.
pub fn validate_range(batch: &HistoricalBatch, range: TimeRange) -> Result<(), ValidationError> {
    let mut in_window: Vec<&TimeSeriesPoint> = batch
        .points
        .iter()
        .filter(|p| range.contains(p.time))
        .collect();
    in_window.sort_by_key(|p| p.time);

    // Indicator id -> fields that have produced a value.
    let mut started: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();

    for point in &in_window {
        for (id, fields) in &point.indicators {
            for (field, value) in fields {
                if value.is_none() {
                    continue;
                }
                let seen = started.entry(id.as_str()).or_default();
                if seen.insert(field.as_str()) {
                    debug!(indicator = %id, %field, time = point.time, "Indicator warm-up complete");
                }
            }
        }

        for (id, expected) in &started {
            match point.indicators.get(*id) {
                Some(fields) => check_fields(point.time, id, fields, expected)?,
                None => {
                    warn!(indicator = %id, time = point.time, "Indicator missing after warm-up");
                    return Err(ValidationError::MissingIndicator {
                        time: point.time,
                        indicator: id.to_string(),
                    });
                }
            }
        }
    }

    Ok(())
}

fn check_fields(
    time: i64,
    indicator: &str,
    fields: &IndicatorFields,
    expected: &BTreeSet<&str>,
) -> Result<(), ValidationError> {
    for field in expected {
        if fields.get(*field).copied().flatten().is_none() {
            warn!(%indicator, %field, time, "Null indicator value after warm-up");
            return Err(ValidationError::NullAfterWarmup {
                time,
                indicator: indicator.to_string(),
                field: field.to_string(),
            });
        }
    }
    Ok(())
}
