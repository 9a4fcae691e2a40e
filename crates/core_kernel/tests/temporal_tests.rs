//! Unit tests for billing periods and statement ranges

use chrono::{NaiveDate, TimeZone, Utc};
use core_kernel::{BillingPeriod, StatementRange, TemporalError};

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

mod billing_period {
    use super::*;

    #[test]
    fn test_equal_bounds_are_allowed_but_empty() {
        let period = BillingPeriod::new(date(2024, 3, 1), date(2024, 3, 1)).unwrap();
        assert!(period.is_empty());
        assert_eq!(period.days(), 0);
    }

    #[test]
    fn test_previous_day() {
        let period = BillingPeriod::previous_day(date(2024, 3, 1)).unwrap();
        assert_eq!(period.start(), date(2024, 2, 29));
        assert_eq!(period.end(), date(2024, 3, 1));
        assert_eq!(period.days(), 1);
    }

    #[test]
    fn test_trailing_week_ends_yesterday() {
        let period = BillingPeriod::trailing_week(date(2024, 3, 11)).unwrap();
        assert_eq!(period.start(), date(2024, 3, 4));
        assert_eq!(period.end(), date(2024, 3, 11));
        assert_eq!(period.days(), 7);
    }

    #[test]
    fn test_previous_month_handles_short_months() {
        let period = BillingPeriod::previous_month(date(2024, 3, 31)).unwrap();
        assert_eq!(period.start(), date(2024, 2, 1));
        assert_eq!(period.end(), date(2024, 3, 1));
        assert_eq!(period.days(), 29);
    }

    #[test]
    fn test_instants_are_utc_midnight() {
        let period = BillingPeriod::single_day(date(2024, 3, 1)).unwrap();
        assert_eq!(period.start_instant(), Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap());
        assert_eq!(period.end_instant(), Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap());
    }
}

mod statement_range {
    use super::*;

    #[test]
    fn test_closed_range_contains_both_ends() {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 3, 31, 23, 59, 59).unwrap();
        let range = StatementRange::new(start, end).unwrap();

        assert!(range.contains(start));
        assert!(range.contains(end));
    }

    #[test]
    fn test_inverted_range_is_rejected() {
        let start = Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        assert!(matches!(
            StatementRange::new(start, end),
            Err(TemporalError::InvalidPeriod { .. })
        ));
    }
}
