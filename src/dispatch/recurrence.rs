use chrono::{DateTime, Datelike, Days, NaiveDate, NaiveTime, TimeZone, Utc};

use crate::error::RecurrenceError;
use crate::models::{RecurrenceKind, RecurrencePattern};

/// Compute the first occurrence of `pattern` strictly after `after`.
///
/// All arithmetic happens in the store's single reference zone (UTC
/// here); daylight-saving transitions are out of scope for this core
/// and intentionally not modeled.
pub fn next_occurrence(
    pattern: &RecurrencePattern,
    after: DateTime<Utc>,
) -> Result<DateTime<Utc>, RecurrenceError> {
    let time = NaiveTime::from_hms_opt(pattern.time_of_day.hour, pattern.time_of_day.minute, 0)
        .ok_or_else(|| {
            RecurrenceError::Malformed(format!(
                "invalid time of day {:02}:{:02}",
                pattern.time_of_day.hour, pattern.time_of_day.minute
            ))
        })?;

    match pattern.kind {
        RecurrenceKind::Daily => next_daily(after, time),
        RecurrenceKind::Weekly => next_weekly(after, time, &pattern.days_of_week),
        RecurrenceKind::Monthly => next_monthly(after, time, pattern.day_of_month),
    }
}

fn at_time(date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(time))
}

fn add_days(date: NaiveDate, days: u64) -> Result<NaiveDate, RecurrenceError> {
    date.checked_add_days(Days::new(days))
        .ok_or_else(|| RecurrenceError::OutOfRange(format!("{date} + {days} days")))
}

fn next_daily(after: DateTime<Utc>, time: NaiveTime) -> Result<DateTime<Utc>, RecurrenceError> {
    let candidate = at_time(after.date_naive(), time);
    if candidate > after {
        Ok(candidate)
    } else {
        Ok(at_time(add_days(after.date_naive(), 1)?, time))
    }
}

fn next_weekly(
    after: DateTime<Utc>,
    time: NaiveTime,
    days_of_week: &[u32],
) -> Result<DateTime<Utc>, RecurrenceError> {
    if let Some(&bad) = days_of_week.iter().find(|&&d| d > 6) {
        return Err(RecurrenceError::Malformed(format!(
            "weekday {bad} out of range 0..=6"
        )));
    }

    // No explicit days: the same weekday one week out.
    if days_of_week.is_empty() {
        return Ok(at_time(add_days(after.date_naive(), 7)?, time));
    }

    for offset in 1..=7 {
        let date = add_days(after.date_naive(), offset)?;
        if days_of_week.contains(&date.weekday().num_days_from_sunday()) {
            return Ok(at_time(date, time));
        }
    }

    // A non-empty set always matches within seven days; guard anyway by
    // falling back to the smallest listed weekday in the following week.
    let earliest = days_of_week
        .iter()
        .min()
        .copied()
        .ok_or_else(|| RecurrenceError::Malformed("empty weekday set".into()))?;
    for offset in 8..=14 {
        let date = add_days(after.date_naive(), offset)?;
        if date.weekday().num_days_from_sunday() == earliest {
            return Ok(at_time(date, time));
        }
    }

    Err(RecurrenceError::OutOfRange(format!(
        "no occurrence within two weeks of {after}"
    )))
}

fn next_monthly(
    after: DateTime<Utc>,
    time: NaiveTime,
    day_of_month: u32,
) -> Result<DateTime<Utc>, RecurrenceError> {
    if !(1..=31).contains(&day_of_month) {
        return Err(RecurrenceError::Malformed(format!(
            "day of month {day_of_month} out of range 1..=31"
        )));
    }

    let candidate = at_time(
        clamped_day(after.year(), after.month(), day_of_month)?,
        time,
    );
    if candidate > after {
        return Ok(candidate);
    }

    let (year, month) = if after.month() == 12 {
        (after.year() + 1, 1)
    } else {
        (after.year(), after.month() + 1)
    };
    Ok(at_time(clamped_day(year, month, day_of_month)?, time))
}

/// The requested day in the given month, clamped to the month's last
/// day (day 31 in a 30-day month yields day 30, not an error).
fn clamped_day(year: i32, month: u32, day_of_month: u32) -> Result<NaiveDate, RecurrenceError> {
    let last = days_in_month(year, month)?;
    NaiveDate::from_ymd_opt(year, month, day_of_month.min(last))
        .ok_or_else(|| RecurrenceError::OutOfRange(format!("{year}-{month:02}-{day_of_month:02}")))
}

fn days_in_month(year: i32, month: u32) -> Result<u32, RecurrenceError> {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|first| first.pred_opt())
        .map(|last| last.day())
        .ok_or_else(|| RecurrenceError::OutOfRange(format!("{year}-{month:02}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RecurrenceKind, TimeOfDay};

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    fn pattern(kind: RecurrenceKind, hour: u32, minute: u32) -> RecurrencePattern {
        RecurrencePattern {
            kind,
            time_of_day: TimeOfDay { hour, minute },
            days_of_week: Vec::new(),
            day_of_month: 1,
        }
    }

    #[test]
    fn daily_moves_to_tomorrow_when_time_already_passed() {
        let p = pattern(RecurrenceKind::Daily, 9, 0);
        let next = next_occurrence(&p, utc(2024, 1, 1, 10, 0)).unwrap();
        assert_eq!(next, utc(2024, 1, 2, 9, 0));
    }

    #[test]
    fn daily_stays_today_when_time_still_ahead() {
        let p = pattern(RecurrenceKind::Daily, 9, 30);
        let next = next_occurrence(&p, utc(2024, 1, 1, 8, 0)).unwrap();
        assert_eq!(next, utc(2024, 1, 1, 9, 30));
    }

    #[test]
    fn daily_at_exact_trigger_instant_moves_a_full_day() {
        let p = pattern(RecurrenceKind::Daily, 9, 0);
        let next = next_occurrence(&p, utc(2024, 1, 1, 9, 0)).unwrap();
        assert_eq!(next, utc(2024, 1, 2, 9, 0));
    }

    #[test]
    fn weekly_finds_the_next_listed_weekday() {
        // 2024-01-03 is a Wednesday; Monday = 1, Thursday = 4.
        let mut p = pattern(RecurrenceKind::Weekly, 9, 0);
        p.days_of_week = vec![1, 4];
        let next = next_occurrence(&p, utc(2024, 1, 3, 9, 0)).unwrap();
        assert_eq!(next, utc(2024, 1, 4, 9, 0));
    }

    #[test]
    fn weekly_wraps_around_the_week() {
        // 2024-01-05 is a Friday; only Monday listed.
        let mut p = pattern(RecurrenceKind::Weekly, 9, 0);
        p.days_of_week = vec![1];
        let next = next_occurrence(&p, utc(2024, 1, 5, 9, 0)).unwrap();
        assert_eq!(next, utc(2024, 1, 8, 9, 0));
    }

    #[test]
    fn weekly_same_listed_day_moves_a_full_week() {
        // 2024-01-01 is a Monday; scanning starts the next day, so a due
        // time later today still lands on next Monday.
        let mut p = pattern(RecurrenceKind::Weekly, 23, 0);
        p.days_of_week = vec![1];
        let next = next_occurrence(&p, utc(2024, 1, 1, 9, 0)).unwrap();
        assert_eq!(next, utc(2024, 1, 8, 23, 0));
    }

    #[test]
    fn weekly_empty_set_repeats_same_weekday_next_week() {
        let p = pattern(RecurrenceKind::Weekly, 10, 0);
        let next = next_occurrence(&p, utc(2024, 1, 3, 9, 0)).unwrap();
        assert_eq!(next, utc(2024, 1, 10, 10, 0));
    }

    #[test]
    fn weekly_rejects_invalid_weekday_numbers() {
        let mut p = pattern(RecurrenceKind::Weekly, 9, 0);
        p.days_of_week = vec![7];
        let err = next_occurrence(&p, utc(2024, 1, 3, 9, 0)).unwrap_err();
        assert!(matches!(err, RecurrenceError::Malformed(_)));
    }

    #[test]
    fn monthly_later_this_month_when_still_ahead() {
        let mut p = pattern(RecurrenceKind::Monthly, 9, 0);
        p.day_of_month = 15;
        let next = next_occurrence(&p, utc(2024, 1, 10, 9, 0)).unwrap();
        assert_eq!(next, utc(2024, 1, 15, 9, 0));
    }

    #[test]
    fn monthly_day_31_clamps_to_leap_february() {
        let mut p = pattern(RecurrenceKind::Monthly, 9, 0);
        p.day_of_month = 31;
        let next = next_occurrence(&p, utc(2024, 1, 31, 9, 0)).unwrap();
        assert_eq!(next, utc(2024, 2, 29, 9, 0));
    }

    #[test]
    fn monthly_day_31_clamps_in_thirty_day_months() {
        let mut p = pattern(RecurrenceKind::Monthly, 9, 0);
        p.day_of_month = 31;
        let next = next_occurrence(&p, utc(2024, 4, 1, 0, 0)).unwrap();
        assert_eq!(next, utc(2024, 4, 30, 9, 0));
    }

    #[test]
    fn monthly_wraps_december_into_january() {
        let mut p = pattern(RecurrenceKind::Monthly, 9, 0);
        p.day_of_month = 5;
        let next = next_occurrence(&p, utc(2024, 12, 20, 9, 0)).unwrap();
        assert_eq!(next, utc(2025, 1, 5, 9, 0));
    }

    #[test]
    fn monthly_rejects_day_out_of_range() {
        let mut p = pattern(RecurrenceKind::Monthly, 9, 0);
        p.day_of_month = 32;
        assert!(matches!(
            next_occurrence(&p, utc(2024, 1, 1, 0, 0)),
            Err(RecurrenceError::Malformed(_))
        ));

        p.day_of_month = 0;
        assert!(matches!(
            next_occurrence(&p, utc(2024, 1, 1, 0, 0)),
            Err(RecurrenceError::Malformed(_))
        ));
    }

    #[test]
    fn invalid_time_of_day_is_malformed() {
        let p = pattern(RecurrenceKind::Daily, 24, 0);
        assert!(matches!(
            next_occurrence(&p, utc(2024, 1, 1, 0, 0)),
            Err(RecurrenceError::Malformed(_))
        ));
    }

    #[test]
    fn next_occurrence_is_always_strictly_after() {
        let after = utc(2024, 6, 15, 12, 0);
        let cases = vec![
            pattern(RecurrenceKind::Daily, 12, 0),
            {
                let mut p = pattern(RecurrenceKind::Weekly, 12, 0);
                p.days_of_week = vec![0, 1, 2, 3, 4, 5, 6];
                p
            },
            {
                let mut p = pattern(RecurrenceKind::Monthly, 12, 0);
                p.day_of_month = 15;
                p
            },
        ];

        for p in cases {
            let next = next_occurrence(&p, after).unwrap();
            assert!(next > after, "{p:?} produced {next} not after {after}");
        }
    }
}
