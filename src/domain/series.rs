// Raw weather series and window aggregation
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::timeline::TimeWindow;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSeries {
    pub latitude: f64,
    pub longitude: f64,
    /// Upstream field the values belong to
    pub field: String,
    pub timestamps: Vec<DateTime<Utc>>,
    pub values: Vec<Option<f64>>,
}

impl RawSeries {
    pub fn new(
        latitude: f64,
        longitude: f64,
        field: String,
        timestamps: Vec<DateTime<Utc>>,
        values: Vec<Option<f64>>,
    ) -> Self {
        Self {
            latitude,
            longitude,
            field,
            timestamps,
            values,
        }
    }

    pub fn average_over(&self, window: &TimeWindow) -> f64 {
        average(&self.values, &self.timestamps, window.start, window.end)
    }
}

/// Mean of the present values whose timestamp lies in `[start, end]`.
///
/// When nothing falls inside the window the last present value of the whole
/// series is returned instead, and 0 when the series has no values at all.
pub fn average(
    values: &[Option<f64>],
    timestamps: &[DateTime<Utc>],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> f64 {
    let (sum, count) = timestamps
        .iter()
        .zip(values)
        .filter(|(ts, _)| start <= **ts && **ts <= end)
        .filter_map(|(_, v)| *v)
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));

    if count > 0 {
        return sum / count as f64;
    }

    values.iter().rev().find_map(|v| *v).unwrap_or(0.0)
}
