use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Inclusive calendar-day range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} to {}", self.start, self.end)
    }
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        DateRange { start, end }
    }

    pub fn contains(self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }

    /// Extends both ends by `days`, clamping at the calendar limits.
    pub fn widen(self, days: u64) -> Self {
        let d = Days::new(days);
        DateRange {
            start: self.start.checked_sub_days(d).unwrap_or(NaiveDate::MIN),
            end: self.end.checked_add_days(d).unwrap_or(NaiveDate::MAX),
        }
    }

    pub fn is_empty(self) -> bool {
        self.end < self.start
    }
}

/// Whole days between two dates, ignoring order.
pub fn days_apart(a: NaiveDate, b: NaiveDate) -> i64 {
    (a - b).num_days().abs()
}
