//! Five-field cron expression parsing and next-fire-time math.
//!
//! Supported dialect: `minute hour day-of-month month day-of-week`, where
//! each field is `*`, a value, a range `a-b`, a step `*/s` or `a-b/s`, or a
//! comma-separated list of those. Day-of-week runs 0-7 with both 0 and 7
//! meaning Sunday. When day-of-month and day-of-week are both restricted
//! (neither is `*`), a date matches if either field matches.

use chrono::{
    DateTime, Datelike, Duration, Local, LocalResult, NaiveDate, NaiveDateTime, NaiveTime,
    TimeZone, Timelike,
};
use std::collections::BTreeSet;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CronError {
    #[error("Invalid cron expression: {0}")]
    Invalid(String),
}

/// A parsed cron expression.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    minutes: FieldSet,
    hours: FieldSet,
    days_of_month: FieldSet,
    months: FieldSet,
    days_of_week: FieldSet,
}

/// The admissible values of one cron field.
#[derive(Debug, Clone)]
struct FieldSet {
    allowed: BTreeSet<u32>,
    /// False when the field was written as a bare `*`.
    restricted: bool,
}

impl CronSchedule {
    /// Parse a five-field cron expression.
    pub fn parse(expression: &str) -> Result<Self, CronError> {
        let fields: Vec<&str> = expression.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(CronError::Invalid(format!(
                "expected 5 fields (minute hour day month weekday), found {}",
                fields.len()
            )));
        }

        Ok(Self {
            minutes: FieldSet::parse(fields[0], "minute", 0, 59)?,
            hours: FieldSet::parse(fields[1], "hour", 0, 23)?,
            days_of_month: FieldSet::parse(fields[2], "day", 1, 31)?,
            months: FieldSet::parse(fields[3], "month", 1, 12)?,
            days_of_week: FieldSet::parse(fields[4], "weekday", 0, 7)?.normalize_sunday(),
        })
    }

    /// The next local fire time strictly after `after`, or `None` if the
    /// expression never matches (e.g. February 30th).
    pub fn next_after(&self, after: DateTime<Local>) -> Option<DateTime<Local>> {
        // Start at the next whole minute
        let mut t = (after.naive_local() + Duration::minutes(1))
            .with_second(0)?
            .with_nanosecond(0)?;

        // Four years covers every reachable date, leap days included
        let limit = t + Duration::days(4 * 366);

        while t < limit {
            if !self.months.contains(t.month()) {
                t = start_of_next_month(t)?;
                continue;
            }
            if !self.day_matches(t.date()) {
                t = t.date().succ_opt()?.and_time(NaiveTime::MIN);
                continue;
            }
            if !self.hours.contains(t.hour()) {
                t = (t + Duration::hours(1)).with_minute(0)?;
                continue;
            }
            if !self.minutes.contains(t.minute()) {
                t += Duration::minutes(1);
                continue;
            }

            match Local.from_local_datetime(&t) {
                LocalResult::Single(dt) => return Some(dt),
                LocalResult::Ambiguous(dt, _) => return Some(dt),
                // The wall-clock minute does not exist (DST gap); keep going
                LocalResult::None => t += Duration::minutes(1),
            }
        }

        None
    }

    fn day_matches(&self, date: NaiveDate) -> bool {
        let dom = self.days_of_month.contains(date.day());
        let dow = self
            .days_of_week
            .contains(date.weekday().num_days_from_sunday());

        match (self.days_of_month.restricted, self.days_of_week.restricted) {
            (true, true) => dom || dow,
            (true, false) => dom,
            (false, true) => dow,
            (false, false) => true,
        }
    }
}

impl FieldSet {
    fn parse(text: &str, name: &str, min: u32, max: u32) -> Result<Self, CronError> {
        let mut allowed = BTreeSet::new();

        for part in text.split(',') {
            let (range, step) = match part.split_once('/') {
                Some((range, step)) => {
                    let step: u32 = step.parse().map_err(|_| {
                        CronError::Invalid(format!("invalid step in {name} field \"{part}\""))
                    })?;
                    if step == 0 {
                        return Err(CronError::Invalid(format!(
                            "zero step in {name} field \"{part}\""
                        )));
                    }
                    (range, step)
                }
                None => (part, 1),
            };

            let (start, end) = if range == "*" {
                (min, max)
            } else if let Some((a, b)) = range.split_once('-') {
                (
                    parse_value(a, name, min, max)?,
                    parse_value(b, name, min, max)?,
                )
            } else {
                let value = parse_value(range, name, min, max)?;
                if step != 1 {
                    return Err(CronError::Invalid(format!(
                        "step requires a range in {name} field \"{part}\""
                    )));
                }
                (value, value)
            };

            if start > end {
                return Err(CronError::Invalid(format!(
                    "descending range in {name} field \"{part}\""
                )));
            }

            let mut value = start;
            while value <= end {
                allowed.insert(value);
                value += step;
            }
        }

        Ok(Self {
            allowed,
            restricted: text != "*",
        })
    }

    /// Fold 7 into 0 so both spellings of Sunday compare equal.
    fn normalize_sunday(mut self) -> Self {
        if self.allowed.remove(&7) {
            self.allowed.insert(0);
        }
        self
    }

    fn contains(&self, value: u32) -> bool {
        self.allowed.contains(&value)
    }
}

fn parse_value(text: &str, name: &str, min: u32, max: u32) -> Result<u32, CronError> {
    let value: u32 = text
        .parse()
        .map_err(|_| CronError::Invalid(format!("invalid {name} value \"{text}\"")))?;
    if value < min || value > max {
        return Err(CronError::Invalid(format!(
            "{name} value {value} out of range {min}-{max}"
        )));
    }
    Ok(value)
}

fn start_of_next_month(t: NaiveDateTime) -> Option<NaiveDateTime> {
    let (year, month) = if t.month() == 12 {
        (t.year() + 1, 1)
    } else {
        (t.year(), t.month() + 1)
    };
    Some(NaiveDate::from_ymd_opt(year, month, 1)?.and_time(NaiveTime::MIN))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Local> {
        Local
            .with_ymd_and_hms(y, mo, d, h, mi, 0)
            .single()
            .expect("test datetime should be unambiguous")
    }

    #[test]
    fn test_daily_at_seven() {
        let cron = CronSchedule::parse("0 7 * * *").unwrap();

        // Past 07:00 today fires tomorrow
        let next = cron.next_after(local(2024, 1, 15, 12, 30)).unwrap();
        assert_eq!(next, local(2024, 1, 16, 7, 0));

        // Before 07:00 fires the same day
        let next = cron.next_after(local(2024, 1, 15, 6, 59)).unwrap();
        assert_eq!(next, local(2024, 1, 15, 7, 0));
    }

    #[test]
    fn test_strictly_after() {
        let cron = CronSchedule::parse("0 7 * * *").unwrap();
        // An exact match never fires again in the same minute
        let next = cron.next_after(local(2024, 1, 15, 7, 0)).unwrap();
        assert_eq!(next, local(2024, 1, 16, 7, 0));
    }

    #[test]
    fn test_minute_steps() {
        let cron = CronSchedule::parse("*/15 * * * *").unwrap();

        let next = cron.next_after(local(2024, 1, 15, 12, 7)).unwrap();
        assert_eq!(next, local(2024, 1, 15, 12, 15));

        let next = cron.next_after(local(2024, 1, 15, 12, 45)).unwrap();
        assert_eq!(next, local(2024, 1, 15, 13, 0));
    }

    #[test]
    fn test_hour_list() {
        let cron = CronSchedule::parse("0 8,12,18 * * *").unwrap();

        let next = cron.next_after(local(2024, 1, 15, 9, 30)).unwrap();
        assert_eq!(next, local(2024, 1, 15, 12, 0));

        let next = cron.next_after(local(2024, 1, 15, 19, 0)).unwrap();
        assert_eq!(next, local(2024, 1, 16, 8, 0));
    }

    #[test]
    fn test_range_with_step() {
        let cron = CronSchedule::parse("0 9-17/4 * * *").unwrap();
        // Admissible hours are 9, 13, 17
        let next = cron.next_after(local(2024, 1, 15, 10, 0)).unwrap();
        assert_eq!(next, local(2024, 1, 15, 13, 0));
    }

    #[test]
    fn test_weekday_only() {
        // 2024-01-15 is a Monday
        let cron = CronSchedule::parse("30 6 * * 1").unwrap();
        let next = cron.next_after(local(2024, 1, 15, 7, 0)).unwrap();
        assert_eq!(next, local(2024, 1, 22, 6, 30));
    }

    #[test]
    fn test_seven_means_sunday() {
        // 2024-01-13 is a Saturday
        let cron = CronSchedule::parse("0 9 * * 7").unwrap();
        let next = cron.next_after(local(2024, 1, 13, 10, 0)).unwrap();
        assert_eq!(next, local(2024, 1, 14, 9, 0));
    }

    #[test]
    fn test_dom_dow_either_matches() {
        // Both day fields restricted: fires on the 13th OR on Fridays
        let cron = CronSchedule::parse("0 0 13 * 5").unwrap();

        // From Monday 2024-01-15 the next Friday (Jan 19) comes before Feb 13
        let next = cron.next_after(local(2024, 1, 15, 1, 0)).unwrap();
        assert_eq!(next, local(2024, 1, 19, 0, 0));

        // From Saturday 2024-02-10 the 13th (Tuesday) comes before Friday the 16th
        let next = cron.next_after(local(2024, 2, 10, 1, 0)).unwrap();
        assert_eq!(next, local(2024, 2, 13, 0, 0));
    }

    #[test]
    fn test_month_restriction() {
        let cron = CronSchedule::parse("0 0 1 6 *").unwrap();
        let next = cron.next_after(local(2024, 1, 15, 0, 0)).unwrap();
        assert_eq!(next, local(2024, 6, 1, 0, 0));
    }

    #[test]
    fn test_impossible_date_never_fires() {
        let cron = CronSchedule::parse("0 0 30 2 *").unwrap();
        assert!(cron.next_after(local(2024, 1, 1, 0, 0)).is_none());
    }

    #[test]
    fn test_rejects_out_of_range() {
        assert!(CronSchedule::parse("61 * * * *").is_err());
        assert!(CronSchedule::parse("* 24 * * *").is_err());
        assert!(CronSchedule::parse("* * 0 * *").is_err());
        assert!(CronSchedule::parse("* * * 13 *").is_err());
        assert!(CronSchedule::parse("* * * * 8").is_err());
    }

    #[test]
    fn test_rejects_malformed() {
        assert!(CronSchedule::parse("* * * *").is_err());
        assert!(CronSchedule::parse("* * * * * *").is_err());
        assert!(CronSchedule::parse("a b c d e").is_err());
        assert!(CronSchedule::parse("*/0 * * * *").is_err());
        assert!(CronSchedule::parse("10-5 * * * *").is_err());
        assert!(CronSchedule::parse("3/2 * * * *").is_err());
        assert!(CronSchedule::parse("").is_err());
    }
}
