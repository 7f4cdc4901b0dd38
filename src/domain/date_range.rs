// Date-range validation against the archive's constraints
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::fmt;

pub const MAX_SPAN_DAYS: i64 = 30;

/// Days between 1940-01-01 and the Unix epoch.
const EARLIEST_SUPPORTED_DAYS_BEFORE_EPOCH: i64 = 10_958;

/// First instant the archive has data for (1940-01-01T00:00Z).
pub fn earliest_supported() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH - Duration::days(EARLIEST_SUPPORTED_DAYS_BEFORE_EPOCH)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RangeAdjustment {
    FutureStartClamped,
    SpanTooLarge,
    StartBeforeEarliest,
}

impl fmt::Display for RangeAdjustment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            RangeAdjustment::FutureStartClamped => "future start clamped",
            RangeAdjustment::SpanTooLarge => "span too large, clamped to max",
            RangeAdjustment::StartBeforeEarliest => "start before earliest supported date",
        };
        f.write_str(reason)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidatedRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub adjustment: Option<RangeAdjustment>,
}

impl ValidatedRange {
    pub fn was_adjusted(&self) -> bool {
        self.adjustment.is_some()
    }
}

/// Clamps a requested window. The first matching rule wins, so a future
/// start resolves to the last 24h before span length is considered.
pub fn validate(start: DateTime<Utc>, end: DateTime<Utc>, now: DateTime<Utc>) -> ValidatedRange {
    let max_span = Duration::days(MAX_SPAN_DAYS);
    let earliest = earliest_supported();

    if start > now {
        ValidatedRange {
            start: now - Duration::hours(24),
            end: now,
            adjustment: Some(RangeAdjustment::FutureStartClamped),
        }
    } else if end - start > max_span {
        ValidatedRange {
            start: end - max_span,
            end,
            adjustment: Some(RangeAdjustment::SpanTooLarge),
        }
    } else if start < earliest {
        ValidatedRange {
            start: earliest,
            end,
            adjustment: Some(RangeAdjustment::StartBeforeEarliest),
        }
    } else {
        ValidatedRange {
            start,
            end,
            adjustment: None,
        }
    }
}
