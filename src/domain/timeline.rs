// Time windows and the timeline selection
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

const DEFAULT_BOUNDS_DAYS: i64 = 30;
const DEFAULT_SELECTION_HOURS: i64 = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// Returns `None` when `start > end`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Option<Self> {
        (start <= end).then_some(Self { start, end })
    }

    pub fn instant(at: DateTime<Utc>) -> Self {
        Self { start: at, end: at }
    }

    pub fn ending_at(end: DateTime<Utc>, length: Duration) -> Self {
        Self {
            start: end - length,
            end,
        }
    }

    fn clamp_into(&self, bounds: &TimeWindow) -> TimeWindow {
        let start = self.start.clamp(bounds.start, bounds.end);
        let end = self.end.clamp(bounds.start, bounds.end);
        TimeWindow { start, end }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuickRange {
    #[serde(rename = "1h")]
    LastHour,
    #[serde(rename = "6h")]
    Last6Hours,
    #[serde(rename = "24h")]
    Last24Hours,
}

impl QuickRange {
    pub fn duration(&self) -> Duration {
        match self {
            QuickRange::LastHour => Duration::hours(1),
            QuickRange::Last6Hours => Duration::hours(6),
            QuickRange::Last24Hours => Duration::hours(24),
        }
    }
}

/// Outer selectable range plus the sub-window used for aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timeline {
    pub bounds: TimeWindow,
    pub selected: TimeWindow,
    pub range_mode: bool,
}

impl Timeline {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            bounds: TimeWindow::ending_at(now, Duration::days(DEFAULT_BOUNDS_DAYS)),
            selected: TimeWindow::ending_at(now, Duration::hours(DEFAULT_SELECTION_HOURS)),
            range_mode: true,
        }
    }

    /// Slide the bounds so they end at `now`. A selection that ended at the
    /// old bounds' end keeps its length and follows `now`; any other
    /// selection is clamped into the new bounds. Returns whether anything moved.
    pub fn roll_forward(&mut self, now: DateTime<Utc>) -> bool {
        if now <= self.bounds.end {
            return false;
        }
        let follows_now = self.selected.end == self.bounds.end;
        self.bounds = TimeWindow::ending_at(now, Duration::days(DEFAULT_BOUNDS_DAYS));
        self.selected = if follows_now {
            TimeWindow::ending_at(now, self.selected.end - self.selected.start)
        } else {
            self.selected.clamp_into(&self.bounds)
        };
        true
    }

    pub fn select(&mut self, window: TimeWindow, now: DateTime<Utc>) {
        self.roll_forward(now);
        let clamped = window.clamp_into(&self.bounds);
        self.selected = if self.range_mode {
            clamped
        } else {
            TimeWindow::instant(clamped.end)
        };
    }

    pub fn set_range_mode(&mut self, range_mode: bool, now: DateTime<Utc>) {
        self.roll_forward(now);
        self.range_mode = range_mode;
        if !range_mode {
            self.selected = TimeWindow::instant(self.selected.end);
        }
    }

    pub fn quick_select(&mut self, range: QuickRange, now: DateTime<Utc>) {
        self.range_mode = true;
        self.roll_forward(now);
        self.selected = TimeWindow::ending_at(now, range.duration()).clamp_into(&self.bounds);
    }
}
