use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::Serialize;

/// Window opened by a user's first confirmed report.
pub fn window_from_first_report(measured_at: NaiveDateTime, days: i64) -> (NaiveDate, NaiveDate) {
    let start = measured_at.date();
    (start, start + Duration::days(days))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CompetitionProgress {
    pub total_days: i64,
    pub elapsed_days: i64,
    pub remaining_days: i64,
    pub percent: i64,
    pub finished: bool,
}

impl CompetitionProgress {
    pub fn at(start: NaiveDate, end: NaiveDate, today: NaiveDate) -> Self {
        let total_days = (end - start).num_days().max(1);
        let elapsed_days = (today - start).num_days();
        let remaining_days = (end - today).num_days().max(0);
        let percent = ((elapsed_days as f64 / total_days as f64) * 100.0).round() as i64;

        Self {
            total_days,
            elapsed_days,
            remaining_days,
            percent: percent.clamp(0, 100),
            finished: today > end,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(value: &str) -> NaiveDate {
        NaiveDate::parse_from_str(value, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn first_report_opens_sixty_day_window() {
        let measured = date("2026-01-15").and_hms_opt(9, 30, 0).unwrap();
        let (start, end) = window_from_first_report(measured, 60);
        assert_eq!(start, date("2026-01-15"));
        assert_eq!(end, date("2026-03-16"));
    }

    #[test]
    fn progress_midway() {
        let progress = CompetitionProgress::at(date("2026-01-15"), date("2026-03-16"), date("2026-02-14"));
        assert_eq!(progress.total_days, 60);
        assert_eq!(progress.elapsed_days, 30);
        assert_eq!(progress.remaining_days, 30);
        assert_eq!(progress.percent, 50);
        assert!(!progress.finished);
    }

    #[test]
    fn progress_is_clamped() {
        let before = CompetitionProgress::at(date("2026-01-15"), date("2026-03-16"), date("2026-01-01"));
        assert_eq!(before.percent, 0);

        let after = CompetitionProgress::at(date("2026-01-15"), date("2026-03-16"), date("2026-04-01"));
        assert_eq!(after.percent, 100);
        assert_eq!(after.remaining_days, 0);
        assert!(after.finished);

        let same_day = CompetitionProgress::at(date("2026-01-15"), date("2026-01-15"), date("2026-01-15"));
        assert_eq!(same_day.total_days, 1);
        assert!(!same_day.finished);
    }
}
