//! Period buckets
//!
//! Calendar arithmetic for weekly (ISO, Monday to Sunday) and monthly buckets.
//! A bucket is closed once `today` is past its end date; only closed buckets
//! are planned for aggregation.

use chrono::{Datelike, Days, Months, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::client_metric::PeriodType;

/// Inclusive date range aggregated as one client-facing row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub struct PeriodBucket {
    pub period_type: PeriodType,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl PeriodBucket {
    /// Whether every day of the bucket lies before `today`.
    pub fn is_closed(&self, today: NaiveDate) -> bool {
        self.end < today
    }
}

/// ISO week containing `date`.
pub fn week_bucket(date: NaiveDate) -> PeriodBucket {
    let start = date.week(Weekday::Mon).first_day();
    PeriodBucket {
        period_type: PeriodType::Weekly,
        start,
        end: start + Days::new(6),
    }
}

/// Calendar month containing `date`.
pub fn month_bucket(date: NaiveDate) -> PeriodBucket {
    let start = date.with_day(1).unwrap_or(date);
    let end = start
        .checked_add_months(Months::new(1))
        .and_then(|next| next.pred_opt())
        .unwrap_or(start);
    PeriodBucket {
        period_type: PeriodType::Monthly,
        start,
        end,
    }
}

/// Most recent ISO week that ended before `today`.
pub fn previous_completed_week(today: NaiveDate) -> PeriodBucket {
    week_bucket(week_bucket(today).start - Days::new(1))
}

/// Most recent calendar month that ended before `today`.
pub fn previous_completed_month(today: NaiveDate) -> PeriodBucket {
    month_bucket(month_bucket(today).start - Days::new(1))
}

/// `days` calendar days ending yesterday.
pub fn trailing_window(today: NaiveDate, days: u32) -> (NaiveDate, NaiveDate) {
    let to = today - Days::new(1);
    let from = to - Days::new(u64::from(days.max(1)) - 1);
    (from, to)
}

/// Buckets the daily aggregation run processes on `today`.
///
/// The previous week is always planned. The previous month is planned while
/// the trailing sync window still re-fetches days inside it.
pub fn plan_aggregation(today: NaiveDate, sync_window_days: u32) -> Vec<PeriodBucket> {
    let mut plan = vec![previous_completed_week(today)];
    if today.day() <= sync_window_days.max(1) {
        plan.push(previous_completed_month(today));
    }
    plan
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn week_bucket_runs_monday_to_sunday() {
        // 2024-05-15 is a Wednesday.
        let bucket = week_bucket(date(2024, 5, 15));
        assert_eq!(bucket.start, date(2024, 5, 13));
        assert_eq!(bucket.end, date(2024, 5, 19));
        assert_eq!(week_bucket(date(2024, 5, 19)), bucket);
        assert_eq!(week_bucket(date(2024, 5, 13)), bucket);
    }

    #[test]
    fn week_bucket_crosses_year_boundary() {
        let bucket = week_bucket(date(2025, 1, 1));
        assert_eq!(bucket.start, date(2024, 12, 30));
        assert_eq!(bucket.end, date(2025, 1, 5));
    }

    #[test]
    fn month_bucket_handles_leap_february() {
        let bucket = month_bucket(date(2024, 2, 10));
        assert_eq!(bucket.start, date(2024, 2, 1));
        assert_eq!(bucket.end, date(2024, 2, 29));
        assert_eq!(month_bucket(date(2023, 12, 31)).end, date(2023, 12, 31));
    }

    #[test]
    fn previous_completed_week_on_monday_is_last_week() {
        let bucket = previous_completed_week(date(2024, 5, 13));
        assert_eq!(bucket.start, date(2024, 5, 6));
        assert_eq!(bucket.end, date(2024, 5, 12));
    }

    #[test]
    fn previous_completed_week_on_sunday_skips_current_week() {
        let bucket = previous_completed_week(date(2024, 5, 19));
        assert_eq!(bucket.end, date(2024, 5, 12));
        assert!(bucket.is_closed(date(2024, 5, 19)));
        assert!(!week_bucket(date(2024, 5, 19)).is_closed(date(2024, 5, 19)));
    }

    #[test]
    fn previous_completed_month_on_first_of_month() {
        let bucket = previous_completed_month(date(2024, 3, 1));
        assert_eq!(bucket.start, date(2024, 2, 1));
        assert_eq!(bucket.end, date(2024, 2, 29));
    }

    #[test]
    fn trailing_window_ends_yesterday() {
        assert_eq!(
            trailing_window(date(2024, 3, 3), 7),
            (date(2024, 2, 25), date(2024, 3, 2))
        );
        assert_eq!(
            trailing_window(date(2024, 3, 3), 1),
            (date(2024, 3, 2), date(2024, 3, 2))
        );
    }

    #[test]
    fn plan_includes_month_only_early_in_month() {
        let early = plan_aggregation(date(2024, 6, 3), 7);
        assert_eq!(early.len(), 2);
        assert_eq!(early[1].period_type, PeriodType::Monthly);
        assert_eq!(early[1].start, date(2024, 5, 1));

        let late = plan_aggregation(date(2024, 6, 20), 7);
        assert_eq!(late.len(), 1);
        assert_eq!(late[0].period_type, PeriodType::Weekly);
    }

    #[test]
    fn planned_buckets_are_always_closed() {
        let mut today = date(2023, 12, 1);
        let end = date(2025, 2, 1);
        while today <= end {
            for bucket in plan_aggregation(today, 7) {
                assert!(bucket.is_closed(today), "{bucket:?} open on {today}");
                assert!(bucket.start <= bucket.end);
            }
            today = today.succ_opt().unwrap();
        }
    }
}
