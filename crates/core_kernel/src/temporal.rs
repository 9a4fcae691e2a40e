//! Billing periods and statement ranges
//!
//! Two kinds of time windows exist in ride billing:
//! - [`BillingPeriod`]: a half-open calendar date range `[start, end)` used to
//!   select charges for an invoice
//! - [`StatementRange`]: a closed instant range `[start, end]` used for
//!   account statements

use chrono::{DateTime, Datelike, Days, Months, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors related to temporal operations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemporalError {
    #[error("Invalid period: end {end} is before start {start}")]
    InvalidPeriod {
        start: String,
        end: String,
    },

    #[error("Date out of supported range: {0}")]
    OutOfRange(String),
}

/// A half-open billing period `[start, end)` in UTC calendar dates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BillingPeriod {
    start: NaiveDate,
    end: NaiveDate,
}

impl BillingPeriod {
    /// Creates a billing period, rejecting `end < start`
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, TemporalError> {
        if end < start {
            return Err(TemporalError::InvalidPeriod {
                start: start.to_string(),
                end: end.to_string(),
            });
        }
        Ok(Self { start, end })
    }

    /// A period covering exactly one calendar day
    pub fn single_day(day: NaiveDate) -> Result<Self, TemporalError> {
        let end = day
            .checked_add_days(Days::new(1))
            .ok_or_else(|| TemporalError::OutOfRange(day.to_string()))?;
        Self::new(day, end)
    }

    /// The calendar day before `today`
    pub fn previous_day(today: NaiveDate) -> Result<Self, TemporalError> {
        let start = today
            .checked_sub_days(Days::new(1))
            .ok_or_else(|| TemporalError::OutOfRange(today.to_string()))?;
        Self::new(start, today)
    }

    /// The seven days ending yesterday
    pub fn trailing_week(today: NaiveDate) -> Result<Self, TemporalError> {
        let start = today
            .checked_sub_days(Days::new(7))
            .ok_or_else(|| TemporalError::OutOfRange(today.to_string()))?;
        Self::new(start, today)
    }

    /// The calendar month before the month containing `today`
    pub fn previous_month(today: NaiveDate) -> Result<Self, TemporalError> {
        let this_month = today
            .with_day(1)
            .ok_or_else(|| TemporalError::OutOfRange(today.to_string()))?;
        let previous = this_month
            .checked_sub_months(Months::new(1))
            .ok_or_else(|| TemporalError::OutOfRange(today.to_string()))?;
        Self::new(previous, this_month)
    }

    /// Inclusive start date
    pub fn start(&self) -> NaiveDate {
        self.start
    }

    /// Exclusive end date
    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// Start of the period as a UTC instant (inclusive)
    pub fn start_instant(&self) -> DateTime<Utc> {
        self.start.and_time(NaiveTime::MIN).and_utc()
    }

    /// End of the period as a UTC instant (exclusive)
    pub fn end_instant(&self) -> DateTime<Utc> {
        self.end.and_time(NaiveTime::MIN).and_utc()
    }

    /// Returns true when the instant falls inside `[start, end)`
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start_instant() && instant < self.end_instant()
    }

    /// Returns true when no instant can fall inside the period
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Number of days covered
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days()
    }
}

/// A closed statement range `[start, end]` of UTC instants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementRange {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl StatementRange {
    /// Creates a range, rejecting `end < start`
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, TemporalError> {
        if end < start {
            return Err(TemporalError::InvalidPeriod {
                start: start.to_rfc3339(),
                end: end.to_rfc3339(),
            });
        }
        Ok(Self { start, end })
    }

    /// Inclusive start
    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    /// Inclusive end
    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    /// Returns true when the instant falls inside `[start, end]`
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && instant <= self.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_period_rejects_inverted_range() {
        let result = BillingPeriod::new(date(2024, 3, 2), date(2024, 3, 1));
        assert!(matches!(result, Err(TemporalError::InvalidPeriod { .. })));
    }

    #[test]
    fn test_previous_month_across_year_boundary() {
        let period = BillingPeriod::previous_month(date(2024, 1, 15)).unwrap();
        assert_eq!(period.start(), date(2023, 12, 1));
        assert_eq!(period.end(), date(2024, 1, 1));
    }

    #[test]
    fn test_half_open_containment() {
        let period = BillingPeriod::single_day(date(2024, 3, 1)).unwrap();
        assert!(period.contains(period.start_instant()));
        assert!(!period.contains(period.end_instant()));
    }
}
