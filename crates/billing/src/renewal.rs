//! Annual renewal calculator
//!
//! A monthly subscription that may only end on its yearly anniversary needs to
//! keep billing for the months left between the cancellation request and that
//! anniversary. This module sizes that remainder.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::calendar::{shift_months, start_of_day, whole_months_between};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenewalError {
    #[error("Cancellation date cannot be before the start date.")]
    InvalidRange {
        start: DateTime<Utc>,
        cancel: DateTime<Utc>,
    },

    #[error("Date out of range while computing the annual renewal for {0}")]
    OutOfRange(DateTime<Utc>),
}

/// Months left between a cancellation request and the next annual renewal
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenewalWindow {
    pub start: DateTime<Utc>,
    pub cancel: DateTime<Utc>,
    /// `start` plus one calendar year, time of day preserved
    pub annual_renewal_date: DateTime<Utc>,
    /// Completed months from `cancel` up to the renewal, truncated toward zero.
    /// Negative once the cancellation is a whole month or more past the renewal.
    pub remaining_months: i32,
}

impl RenewalWindow {
    /// Iterations an exhaustion phase should bill for; never negative.
    pub fn billable_months(&self) -> u32 {
        u32::try_from(self.remaining_months).unwrap_or(0)
    }
}

/// Compute the annual renewal date and the whole months left before it.
///
/// Both dates are compared at day precision for the month count, so a
/// cancellation later on the anniversary day still yields zero.
pub fn calculate_remaining_months(
    start: DateTime<Utc>,
    cancel: DateTime<Utc>,
) -> Result<RenewalWindow, RenewalError> {
    if cancel < start {
        return Err(RenewalError::InvalidRange { start, cancel });
    }

    let annual_renewal_date =
        shift_months(start, 12).ok_or(RenewalError::OutOfRange(start))?;

    let months = whole_months_between(start_of_day(annual_renewal_date), start_of_day(cancel))
        .ok_or(RenewalError::OutOfRange(cancel))?;
    let remaining_months =
        i32::try_from(months).map_err(|_| RenewalError::OutOfRange(cancel))?;

    Ok(RenewalWindow {
        start,
        cancel,
        annual_renewal_date,
        remaining_months,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn utc(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    fn assert_window(
        start: DateTime<Utc>,
        cancel: DateTime<Utc>,
        months: i32,
        renewal: DateTime<Utc>,
    ) {
        let window = calculate_remaining_months(start, cancel).unwrap();
        assert_eq!(
            window.remaining_months, months,
            "start={} cancel={}",
            start, cancel
        );
        assert_eq!(window.annual_renewal_date, renewal);
    }

    // =========================================================================
    // Fixed scenarios
    // =========================================================================

    #[test]
    fn test_cancel_on_same_day_of_month() {
        assert_window(utc(2021, 1, 1), utc(2021, 3, 1), 10, utc(2022, 1, 1));
    }

    #[test]
    fn test_cancel_shortly_after_renewal_rounds_to_zero() {
        // Nine days past the anniversary is not a completed month either way.
        assert_window(utc(2021, 1, 1), utc(2022, 1, 10), 0, utc(2022, 1, 1));
    }

    #[test]
    fn test_cancel_mid_month() {
        assert_window(utc(2024, 6, 3), utc(2024, 7, 21), 10, utc(2025, 6, 3));
    }

    #[test]
    fn test_cancel_on_renewal_date() {
        assert_window(utc(2021, 1, 1), utc(2022, 1, 1), 0, utc(2022, 1, 1));
    }

    #[test]
    fn test_cancel_on_start_date() {
        assert_window(utc(2021, 1, 1), utc(2021, 1, 1), 12, utc(2022, 1, 1));
    }

    #[test]
    fn test_cancel_before_start_is_error() {
        let err = calculate_remaining_months(utc(2021, 1, 1), utc(2020, 1, 1)).unwrap_err();
        assert!(matches!(err, RenewalError::InvalidRange { .. }));
        assert_eq!(
            err.to_string(),
            "Cancellation date cannot be before the start date."
        );
    }

    #[test]
    fn test_cancel_one_second_before_start_is_error() {
        let start = utc(2021, 1, 1);
        let result = calculate_remaining_months(start, start - Duration::seconds(1));
        assert!(result.is_err());
    }

    // =========================================================================
    // Calendar edge cases
    // =========================================================================

    #[test]
    fn test_leap_day_start_clamps_renewal() {
        assert_window(utc(2024, 2, 29), utc(2024, 4, 10), 10, utc(2025, 2, 28));
    }

    #[test]
    fn test_time_of_day_is_ignored_for_month_count() {
        let start = Utc.with_ymd_and_hms(2021, 1, 1, 18, 30, 0).unwrap();
        let cancel = Utc.with_ymd_and_hms(2021, 3, 1, 6, 0, 0).unwrap();
        let window = calculate_remaining_months(start, cancel).unwrap();

        assert_eq!(window.remaining_months, 10);
        assert_eq!(
            window.annual_renewal_date,
            Utc.with_ymd_and_hms(2022, 1, 1, 18, 30, 0).unwrap()
        );
    }

    #[test]
    fn test_cancel_long_after_renewal_goes_negative() {
        let window = calculate_remaining_months(utc(2021, 1, 1), utc(2022, 3, 15)).unwrap();
        assert_eq!(window.remaining_months, -2);
        assert_eq!(window.billable_months(), 0);
    }

    // =========================================================================
    // Properties over a sweep of dates
    // =========================================================================

    #[test]
    fn test_renewal_is_independent_of_cancel_date() {
        let start = utc(2023, 5, 31);
        for offset in [0, 1, 45, 200, 364, 400] {
            let cancel = start + Duration::days(offset);
            let window = calculate_remaining_months(start, cancel).unwrap();
            assert_eq!(window.annual_renewal_date, utc(2024, 5, 31));
        }
    }

    #[test]
    fn test_remaining_months_within_bounds_before_renewal() {
        let start = utc(2023, 1, 31);
        let renewal = utc(2024, 1, 31);
        let mut cancel = start;
        let mut previous = i32::MAX;

        while cancel <= renewal {
            let window = calculate_remaining_months(start, cancel).unwrap();
            assert!(
                (0..=12).contains(&window.remaining_months),
                "cancel={} months={}",
                cancel,
                window.remaining_months
            );
            // never increases as the cancellation moves later
            assert!(window.remaining_months <= previous);
            previous = window.remaining_months;
            cancel += Duration::days(3);
        }
    }
}
