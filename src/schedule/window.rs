use chrono::{DateTime, Datelike, NaiveTime, Utc};
use chrono_tz::Tz;

use crate::database::task_groups::{self, GroupStatus, ManualOverride};
use crate::database::tasks::ScheduleConfig;
use crate::error::{ObserverError, Result};
use crate::schedule::evaluator;

pub fn parse_hhmm(value: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(value, "%H:%M")
        .map_err(|_| ObserverError::Validation(format!("Invalid time '{value}': expected HH:MM")))
}

/// Whether `at` falls inside the daily [start, end) window expressed as local
/// wall-clock time in `tz`. A window whose end precedes its start wraps past
/// midnight.
pub fn window_contains(start: &str, end: &str, tz: &Tz, at: DateTime<Utc>) -> Result<bool> {
    let start = parse_hhmm(start)?;
    let end = parse_hhmm(end)?;
    let local = at.with_timezone(tz).time();

    Ok(if start <= end {
        local >= start && local < end
    } else {
        local >= start || local < end
    })
}

/// System-computed group state: RUNNING iff the group is ACTIVE and either a
/// manual override says so or the current instant falls inside the window.
/// The window only applies when both bounds are set.
pub fn group_is_running(group: &task_groups::Model, at: DateTime<Utc>) -> Result<bool> {
    if GroupStatus::from(group.status.clone()) != GroupStatus::Active {
        return Ok(false);
    }

    match ManualOverride::from_column(&group.manual_override) {
        Some(ManualOverride::Started) => return Ok(true),
        Some(ManualOverride::Stopped) => return Ok(false),
        None => {}
    }

    match (&group.start_time, &group.end_time) {
        (Some(start), Some(end)) => {
            let tz = evaluator::parse_timezone(&group.timezone)?;
            window_contains(start, end, &tz, at)
        }
        _ => Ok(true),
    }
}

/// Per-task gates evaluated at the firing instant in the task's timezone:
/// days-of-week allow list (ISO numbering, Mon=1), excluded calendar dates,
/// and an optional time-of-day range.
pub fn schedule_gates_pass(config: &ScheduleConfig, at: DateTime<Utc>) -> Result<bool> {
    let tz = evaluator::parse_timezone(&config.timezone)?;
    let local = at.with_timezone(&tz);

    if let Some(days) = &config.days_of_week {
        if !days.is_empty() {
            let weekday = local.weekday().number_from_monday() as u8;
            if !days.contains(&weekday) {
                return Ok(false);
            }
        }
    }

    if let Some(exclusions) = &config.exclusions {
        if exclusions.contains(&local.date_naive()) {
            return Ok(false);
        }
    }

    if let Some(range) = &config.time_range {
        if !window_contains(&range.start, &range.end, &tz, at)? {
            return Ok(false);
        }
    }

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::tasks::TimeRange;
    use chrono::TimeZone;
    use chrono_tz::Tz;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn window_plain_range() {
        let tz: Tz = "UTC".parse().unwrap();
        assert!(window_contains("10:00", "11:00", &tz, utc(2025, 6, 1, 10, 30)).unwrap());
        assert!(!window_contains("10:00", "11:00", &tz, utc(2025, 6, 1, 11, 0)).unwrap());
        assert!(!window_contains("10:00", "11:00", &tz, utc(2025, 6, 1, 9, 59)).unwrap());
    }

    #[test]
    fn window_wraps_midnight() {
        let tz: Tz = "UTC".parse().unwrap();
        assert!(window_contains("22:00", "02:00", &tz, utc(2025, 6, 1, 23, 0)).unwrap());
        assert!(window_contains("22:00", "02:00", &tz, utc(2025, 6, 1, 1, 0)).unwrap());
        assert!(!window_contains("22:00", "02:00", &tz, utc(2025, 6, 1, 12, 0)).unwrap());
    }

    #[test]
    fn window_respects_timezone() {
        // 04:30 UTC is 10:30 in Dhaka (UTC+6).
        let tz: Tz = "Asia/Dhaka".parse().unwrap();
        assert!(window_contains("10:00", "11:00", &tz, utc(2025, 6, 1, 4, 30)).unwrap());
        // 12:00 UTC is 18:00 in Dhaka.
        assert!(!window_contains("10:00", "11:00", &tz, utc(2025, 6, 1, 12, 0)).unwrap());
    }

    fn config(days: Option<Vec<u8>>, exclusions: Option<Vec<chrono::NaiveDate>>, range: Option<TimeRange>) -> ScheduleConfig {
        ScheduleConfig {
            timezone: "UTC".to_string(),
            cron_expression: Some("* * * * *".to_string()),
            time_range: range,
            days_of_week: days,
            exclusions,
        }
    }

    #[test]
    fn days_of_week_gate() {
        // 2025-06-02 is a Monday.
        let cfg = config(Some(vec![1]), None, None);
        assert!(schedule_gates_pass(&cfg, utc(2025, 6, 2, 9, 0)).unwrap());
        assert!(!schedule_gates_pass(&cfg, utc(2025, 6, 3, 9, 0)).unwrap());
    }

    #[test]
    fn exclusion_date_gate() {
        let excluded = chrono::NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();
        let cfg = config(None, Some(vec![excluded]), None);
        assert!(!schedule_gates_pass(&cfg, utc(2025, 6, 2, 9, 0)).unwrap());
        assert!(schedule_gates_pass(&cfg, utc(2025, 6, 3, 9, 0)).unwrap());
    }

    #[test]
    fn time_range_gate() {
        let cfg = config(
            None,
            None,
            Some(TimeRange {
                start: "09:00".to_string(),
                end: "17:00".to_string(),
            }),
        );
        assert!(schedule_gates_pass(&cfg, utc(2025, 6, 2, 12, 0)).unwrap());
        assert!(!schedule_gates_pass(&cfg, utc(2025, 6, 2, 20, 0)).unwrap());
    }
}
