//! Calendar periods used for trend comparison and cohort roll-ups

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Calendar period granularity (UTC)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalendarPeriod {
    /// ISO week starting Monday 00:00
    Week,
    /// Calendar month starting on the 1st at 00:00
    Month,
}

impl CalendarPeriod {
    /// Start of the period containing `at`
    pub fn start_of(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        let date = at.date_naive();
        let start = match self {
            CalendarPeriod::Week => {
                date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
            }
            CalendarPeriod::Month => first_of_month(date.year(), date.month()),
        };
        midnight(start)
    }

    /// Start of the period after the one starting at `start`
    pub fn next_start(&self, start: DateTime<Utc>) -> DateTime<Utc> {
        let start = self.start_of(start);
        match self {
            CalendarPeriod::Week => start + Duration::days(7),
            CalendarPeriod::Month => {
                let date = start.date_naive();
                let (year, month) = if date.month() == 12 {
                    (date.year() + 1, 1)
                } else {
                    (date.year(), date.month() + 1)
                };
                midnight(first_of_month(year, month))
            }
        }
    }

    /// Start of the period before the one containing `at`
    pub fn previous_start(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        let start = self.start_of(at);
        self.start_of(start - Duration::milliseconds(1))
    }

    /// `[start, end)` bounds of every period overlapping `[from, to]`, ascending
    pub fn periods_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
        let mut periods = Vec::new();
        if to < from {
            return periods;
        }

        let mut start = self.start_of(from);
        while start <= to {
            let end = self.next_start(start);
            periods.push((start, end));
            start = end;
        }
        periods
    }
}

fn first_of_month(year: i32, month: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(NaiveDate::MIN)
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(chrono::NaiveTime::MIN))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn test_month_boundaries() {
        let p = CalendarPeriod::Month;
        assert_eq!(p.start_of(at(2024, 3, 17, 9)), at(2024, 3, 1, 0));
        assert_eq!(p.next_start(at(2024, 12, 1, 0)), at(2025, 1, 1, 0));
        assert_eq!(p.previous_start(at(2024, 1, 10, 0)), at(2023, 12, 1, 0));
    }

    #[test]
    fn test_week_boundaries() {
        let p = CalendarPeriod::Week;
        // 2024-03-14 is a Thursday
        assert_eq!(p.start_of(at(2024, 3, 14, 12)), at(2024, 3, 11, 0));
        assert_eq!(p.next_start(at(2024, 3, 11, 0)), at(2024, 3, 18, 0));
    }

    #[test]
    fn test_periods_between_is_ascending_and_contiguous() {
        let periods = CalendarPeriod::Month.periods_between(at(2024, 1, 15, 0), at(2024, 4, 2, 0));
        assert_eq!(periods.len(), 4);
        assert_eq!(periods[0].0, at(2024, 1, 1, 0));
        assert_eq!(periods[3].1, at(2024, 5, 1, 0));
        for pair in periods.windows(2) {
            assert_eq!(pair[0].1, pair[1].0);
        }
    }

    #[test]
    fn test_periods_between_empty_when_reversed() {
        assert!(CalendarPeriod::Month
            .periods_between(at(2024, 4, 1, 0), at(2024, 1, 1, 0))
            .is_empty());
    }
}
