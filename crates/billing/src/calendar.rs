//! Calendar arithmetic matching the platform's billing-cycle semantics
//!
//! Month arithmetic advances the year/month/day triple and clamps to the last
//! day of the target month (Jan 31 + 1 month = Feb 28/29). Month differences
//! count completed months: the fractional part is measured against the length
//! of the surrounding month and then truncated toward zero.

use chrono::{DateTime, Datelike, Duration, Months, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// Shift an instant by a signed number of calendar months, clamping the day.
///
/// Returns `None` only when the result leaves chrono's representable range.
pub fn shift_months(at: DateTime<Utc>, months: i64) -> Option<DateTime<Utc>> {
    let magnitude = Months::new(u32::try_from(months.unsigned_abs()).ok()?);
    if months >= 0 {
        at.checked_add_months(magnitude)
    } else {
        at.checked_sub_months(magnitude)
    }
}

/// Fractional month difference `a - b`.
pub fn month_diff(a: DateTime<Utc>, b: DateTime<Utc>) -> Option<f64> {
    // Anchor on the later day-of-month so end-of-month clamping stays correct.
    if a.day() < b.day() {
        return month_diff(b, a).map(|diff| -diff);
    }

    let whole = i64::from(b.year() - a.year()) * 12 + i64::from(b.month()) - i64::from(a.month());
    let anchor = shift_months(a, whole)?;
    let offset = (b - anchor).num_milliseconds() as f64;

    let adjust = if b < anchor {
        let previous = shift_months(a, whole - 1)?;
        offset / (anchor - previous).num_milliseconds() as f64
    } else {
        let next = shift_months(a, whole + 1)?;
        offset / (next - anchor).num_milliseconds() as f64
    };

    Some(-(whole as f64 + adjust))
}

/// Completed months between `a` and `b` (`a - b`), truncated toward zero.
pub fn whole_months_between(a: DateTime<Utc>, b: DateTime<Utc>) -> Option<i64> {
    month_diff(a, b).map(|diff| diff.trunc() as i64)
}

/// Drop the time of day, keeping the calendar date in UTC.
pub fn start_of_day(at: DateTime<Utc>) -> DateTime<Utc> {
    at.date_naive().and_time(NaiveTime::MIN).and_utc()
}

/// Convert a platform unix timestamp (seconds) into an instant.
pub fn from_unix(seconds: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(seconds, 0)
}

/// Smallest billing interval a test clock may be advanced by in one step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClockInterval {
    Day,
    Week,
    #[default]
    Month,
    Year,
}

impl ClockInterval {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClockInterval::Day => "day",
            ClockInterval::Week => "week",
            ClockInterval::Month => "month",
            ClockInterval::Year => "year",
        }
    }

    /// Whole units from `from` up to `to`, truncated toward zero.
    pub fn units_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Option<i64> {
        match self {
            ClockInterval::Day => Some((to - from).num_days()),
            ClockInterval::Week => Some((to - from).num_weeks()),
            ClockInterval::Month => whole_months_between(to, from),
            ClockInterval::Year => {
                month_diff(to, from).map(|diff| (diff / 12.0).trunc() as i64)
            }
        }
    }

    /// Advance `at` by exactly one unit.
    pub fn step(&self, at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            ClockInterval::Day => at.checked_add_signed(Duration::days(1)),
            ClockInterval::Week => at.checked_add_signed(Duration::weeks(1)),
            ClockInterval::Month => shift_months(at, 1),
            ClockInterval::Year => shift_months(at, 12),
        }
    }
}

impl std::fmt::Display for ClockInterval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ClockInterval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "day" => Ok(ClockInterval::Day),
            "week" => Ok(ClockInterval::Week),
            "month" => Ok(ClockInterval::Month),
            "year" => Ok(ClockInterval::Year),
            other => Err(format!(
                "Invalid interval '{}'. Valid intervals are: day, week, month, year",
                other
            )),
        }
    }
}

/// Relative offset applied to a clock's frozen time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClockOffset {
    pub years: u32,
    pub months: u32,
    pub days: u32,
}

impl ClockOffset {
    pub fn months(months: u32) -> Self {
        Self {
            months,
            ..Default::default()
        }
    }

    pub fn days(days: u32) -> Self {
        Self {
            days,
            ..Default::default()
        }
    }

    /// Years first, then months, then days.
    pub fn apply(&self, at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let months = i64::from(self.years) * 12 + i64::from(self.months);
        shift_months(at, months)?.checked_add_signed(Duration::days(i64::from(self.days)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_shift_months_clamps_end_of_month() {
        assert_eq!(shift_months(utc(2024, 1, 31), 1), Some(utc(2024, 2, 29)));
        assert_eq!(shift_months(utc(2023, 1, 31), 1), Some(utc(2023, 2, 28)));
        assert_eq!(shift_months(utc(2024, 3, 31), -1), Some(utc(2024, 2, 29)));
        assert_eq!(shift_months(utc(2024, 2, 29), 12), Some(utc(2025, 2, 28)));
    }

    #[test]
    fn test_month_diff_exact_months() {
        assert_eq!(month_diff(utc(2022, 1, 1), utc(2021, 3, 1)), Some(10.0));
        assert_eq!(month_diff(utc(2021, 3, 1), utc(2022, 1, 1)), Some(-10.0));
        assert_eq!(month_diff(utc(2022, 1, 1), utc(2022, 1, 1)), Some(0.0));
    }

    #[test]
    fn test_whole_months_truncates_toward_zero() {
        // 10 months and 13 days
        assert_eq!(
            whole_months_between(utc(2025, 6, 3), utc(2024, 7, 21)),
            Some(10)
        );
        // 9 days past the anchor counts as zero, not minus one
        assert_eq!(
            whole_months_between(utc(2022, 1, 1), utc(2022, 1, 10)),
            Some(0)
        );
        // a full month and a bit past the anchor
        assert_eq!(
            whole_months_between(utc(2022, 1, 1), utc(2022, 2, 10)),
            Some(-1)
        );
    }

    #[test]
    fn test_units_between_for_each_interval() {
        let from = utc(2024, 1, 1);
        let to = utc(2025, 3, 1) + Duration::minutes(5);

        assert_eq!(ClockInterval::Month.units_between(from, to), Some(14));
        assert_eq!(ClockInterval::Year.units_between(from, to), Some(1));
        assert_eq!(ClockInterval::Day.units_between(from, to), Some(425));
        assert_eq!(ClockInterval::Week.units_between(from, to), Some(60));
    }

    #[test]
    fn test_interval_step() {
        assert_eq!(ClockInterval::Day.step(utc(2024, 2, 28)), Some(utc(2024, 2, 29)));
        assert_eq!(ClockInterval::Week.step(utc(2024, 2, 28)), Some(utc(2024, 3, 6)));
        assert_eq!(ClockInterval::Month.step(utc(2024, 1, 31)), Some(utc(2024, 2, 29)));
        assert_eq!(ClockInterval::Year.step(utc(2024, 2, 29)), Some(utc(2025, 2, 28)));
    }

    #[test]
    fn test_interval_parsing() {
        assert_eq!("Month".parse::<ClockInterval>(), Ok(ClockInterval::Month));
        assert_eq!(" week ".parse::<ClockInterval>(), Ok(ClockInterval::Week));
        assert!("fortnight".parse::<ClockInterval>().is_err());
        assert_eq!(ClockInterval::default(), ClockInterval::Month);
    }

    #[test]
    fn test_clock_offset_apply() {
        let offset = ClockOffset {
            years: 0,
            months: 1,
            days: 15,
        };
        assert_eq!(offset.apply(utc(2024, 1, 31)), Some(utc(2024, 3, 15)));
        assert_eq!(ClockOffset::days(2).apply(utc(2024, 1, 1)), Some(utc(2024, 1, 3)));
    }

    #[test]
    fn test_start_of_day() {
        let at = Utc.with_ymd_and_hms(2024, 6, 3, 17, 45, 12).unwrap();
        assert_eq!(start_of_day(at), utc(2024, 6, 3));
    }
}
