//! Pure aggregation helpers.

use chrono::{DateTime, Duration, Utc};
use flagline_core::types::{MetricAggregation, TimeRange};
use flagline_core::{FlagError, FlagResult};
use std::collections::BTreeMap;

/// Concrete `[start, end]` for a range. `end` defaults to `now`; `start`
/// defaults to `end` minus the range length (a month is 30 days).
/// `Custom` has no length, so it needs an explicit `start`.
pub fn resolve_window(
    time_range: TimeRange,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> FlagResult<(DateTime<Utc>, DateTime<Utc>)> {
    let end = end.unwrap_or(now);
    let start = match (start, time_range) {
        (Some(start), _) => start,
        (None, TimeRange::Hour) => end - Duration::hours(1),
        (None, TimeRange::Day) => end - Duration::days(1),
        (None, TimeRange::Week) => end - Duration::weeks(1),
        (None, TimeRange::Month) => end - Duration::days(30),
        (None, TimeRange::Custom) => {
            return Err(FlagError::Validation(
                "a custom time range needs an explicit start time".into(),
            ))
        }
    };
    if start > end {
        return Err(FlagError::Validation(format!(
            "time range starts at {start} after it ends at {end}"
        )));
    }
    Ok((start, end))
}

/// Summarise `values`. An empty slice yields zeros across the board.
pub fn aggregate(
    metric_name: &str,
    time_range: TimeRange,
    (start_time, end_time): (DateTime<Utc>, DateTime<Utc>),
    labels: BTreeMap<String, String>,
    values: Vec<f64>,
) -> MetricAggregation {
    let count = values.len() as u64;
    let (sum, min, max, avg) = if values.is_empty() {
        (0.0, 0.0, 0.0, 0.0)
    } else {
        let sum: f64 = values.iter().sum();
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        (sum, min, max, sum / values.len() as f64)
    };
    MetricAggregation {
        metric_name: metric_name.to_string(),
        time_range,
        start_time,
        end_time,
        values,
        labels,
        count,
        sum,
        min,
        max,
        avg,
    }
}
