//! Calendar helpers for daily time axes.
//!
//! Time coordinates are stored as `int32` days since 1970-01-01 on the
//! proleptic Gregorian calendar.

use chrono::{Datelike, NaiveDate};

use crate::error::{Result, StoreError};

/// Units attribute written on every time coordinate.
pub const TIME_UNITS: &str = "days since 1970-01-01";

/// Calendar attribute written on every time coordinate.
pub const TIME_CALENDAR: &str = "proleptic_gregorian";

/// Number of day-of-year slots, including the leap day.
pub const DAYS_IN_LEAP_YEAR: usize = 366;

/// 1970-01-01.
fn epoch() -> NaiveDate {
    NaiveDate::default()
}

/// Convert a date to days since the epoch.
pub fn date_to_epoch_days(date: NaiveDate) -> i32 {
    (date - epoch()).num_days() as i32
}

/// Convert days since the epoch to a date.
pub fn epoch_days_to_date(days: i32) -> Result<NaiveDate> {
    epoch()
        .checked_add_signed(chrono::Duration::days(days as i64))
        .ok_or_else(|| StoreError::invalid_metadata(format!("time value {days} out of range")))
}

/// First day of a year.
pub fn year_start(year: i32) -> Result<NaiveDate> {
    NaiveDate::from_ymd_opt(year, 1, 1)
        .ok_or_else(|| StoreError::ConfigError(format!("invalid year {year}")))
}

/// Last day of a year.
pub fn year_end(year: i32) -> Result<NaiveDate> {
    NaiveDate::from_ymd_opt(year, 12, 31)
        .ok_or_else(|| StoreError::ConfigError(format!("invalid year {year}")))
}

/// Every day from `start` to `end`, inclusive.
pub fn daily_range(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    start.iter_days().take_while(|d| *d <= end).collect()
}

/// Every day of the years `start_year..=end_year`.
pub fn daily_dates(start_year: i32, end_year: i32) -> Result<Vec<NaiveDate>> {
    Ok(daily_range(year_start(start_year)?, year_end(end_year)?))
}

/// 1-based ordinal day of the year (1..=366).
pub fn day_of_year(date: NaiveDate) -> usize {
    date.ordinal() as usize
}

/// Inclusive year span of a date sequence.
pub fn year_span(dates: &[NaiveDate]) -> Option<(i32, i32)> {
    Some((dates.first()?.year(), dates.last()?.year()))
}

/// Check that a time axis is strictly increasing.
pub fn is_strictly_increasing(dates: &[NaiveDate]) -> bool {
    dates.windows(2).all(|w| w[0] < w[1])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epoch_round_trip() {
        let date = NaiveDate::from_ymd_opt(2001, 3, 15).unwrap();
        let days = date_to_epoch_days(date);
        assert_eq!(epoch_days_to_date(days).unwrap(), date);
        assert_eq!(date_to_epoch_days(epoch()), 0);
    }

    #[test]
    fn test_daily_dates_handles_leap_years() {
        assert_eq!(daily_dates(2001, 2001).unwrap().len(), 365);
        assert_eq!(daily_dates(2004, 2004).unwrap().len(), 366);
        assert_eq!(daily_dates(2001, 2004).unwrap().len(), 365 * 3 + 366);
    }

    #[test]
    fn test_day_of_year() {
        let d = NaiveDate::from_ymd_opt(2004, 12, 31).unwrap();
        assert_eq!(day_of_year(d), 366);
        let d = NaiveDate::from_ymd_opt(2003, 12, 31).unwrap();
        assert_eq!(day_of_year(d), 365);
    }

    #[test]
    fn test_strictly_increasing() {
        let dates = daily_dates(2001, 2001).unwrap();
        assert!(is_strictly_increasing(&dates));
        let mut dup = dates.clone();
        dup.push(*dates.last().unwrap());
        assert!(!is_strictly_increasing(&dup));
    }
}
