use chrono::{DateTime, Duration as ChronoDuration, LocalResult, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use cron::Schedule as CronSchedule;
use std::str::FromStr;

use crate::error::{ObserverError, Result};

/// Characters permitted in a cron field. Named months/days are not part of
/// the accepted grammar.
const FIELD_CHARS: &str = "0123456789*,-/";

/// Longest spring-forward gap we are prepared to walk across, in minutes.
const GAP_PROBE_LIMIT_MINUTES: i64 = 180;

/// Candidates consumed before giving up on the strictly-greater requirement.
const CANDIDATE_PROBE_LIMIT: usize = 16;

pub fn parse_timezone(timezone: &str) -> Result<Tz> {
    timezone
        .parse()
        .map_err(|_| ObserverError::Validation(format!("Invalid timezone: {timezone}")))
}

/// Parse a standard 5-field cron expression (minute hour day-of-month month
/// day-of-week). Fields accept `*`, integers, `a-b` ranges, `a,b,c` lists and
/// `*/n` steps. The underlying schedule iterator wants a seconds field, so a
/// literal `0` is prepended after validation.
pub fn parse_expression(expression: &str) -> Result<CronSchedule> {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(ObserverError::Validation(format!(
            "Invalid cron expression '{expression}': expected 5 fields (minute hour day-of-month month day-of-week), got {}",
            fields.len()
        )));
    }
    for field in &fields {
        if !field.chars().all(|c| FIELD_CHARS.contains(c)) {
            return Err(ObserverError::Validation(format!(
                "Invalid cron expression '{expression}': field '{field}' contains unsupported characters"
            )));
        }
    }

    let normalized = format!("0 {}", fields.join(" "));
    CronSchedule::from_str(&normalized)
        .map_err(|e| ObserverError::Validation(format!("Invalid cron expression '{expression}': {e}")))
}

pub fn validate_expression(expression: &str) -> Result<()> {
    parse_expression(expression).map(|_| ())
}

/// Smallest instant strictly greater than `after` at which `expression`
/// holds in `timezone`. Pure: no clock reads, no I/O.
///
/// The schedule is evaluated on the zone's wall clock: candidates are
/// iterated as naive local times and resolved to instants here, so DST
/// behavior is pinned down rather than inherited. A candidate erased by a
/// spring-forward gap advances to the first valid wall-clock time after the
/// gap; a candidate repeated by a fall-back fires on its first occurrence
/// only.
pub fn next_after(expression: &str, timezone: &str, after: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let schedule = parse_expression(expression)?;
    let tz = parse_timezone(timezone)?;

    next_in_zone(&schedule, &tz, after).ok_or_else(|| {
        ObserverError::Validation(format!(
            "Cron expression '{expression}' has no upcoming firing"
        ))
    })
}

fn next_in_zone(schedule: &CronSchedule, tz: &Tz, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    // The naive local clock masquerades as UTC for the iterator, which keeps
    // the crate's own offset handling out of the loop.
    let mut cursor = Utc.from_utc_datetime(&after.with_timezone(tz).naive_local());

    for _ in 0..CANDIDATE_PROBE_LIMIT {
        let candidate = schedule.after(&cursor).next()?;
        if let Some(instant) = resolve_local(tz, candidate.naive_utc()) {
            if instant > after {
                return Some(instant);
            }
        }
        cursor = candidate;
    }
    None
}

/// Map a naive local time to an instant: first occurrence when the clock
/// repeated, first valid wall-clock time when the clock skipped.
fn resolve_local(tz: &Tz, local: NaiveDateTime) -> Option<DateTime<Utc>> {
    match tz.from_local_datetime(&local) {
        LocalResult::Single(dt) => Some(dt.with_timezone(&Utc)),
        LocalResult::Ambiguous(first, _) => Some(first.with_timezone(&Utc)),
        LocalResult::None => {
            let mut probe = local;
            for _ in 0..GAP_PROBE_LIMIT_MINUTES {
                probe += ChronoDuration::minutes(1);
                match tz.from_local_datetime(&probe) {
                    LocalResult::Single(dt) => return Some(dt.with_timezone(&Utc)),
                    LocalResult::Ambiguous(first, _) => return Some(first.with_timezone(&Utc)),
                    LocalResult::None => {}
                }
            }
            None
        }
    }
}

/// Next `count` firing instants, for validation previews.
pub fn preview(expression: &str, timezone: &str, count: usize) -> Result<Vec<DateTime<Utc>>> {
    let schedule = parse_expression(expression)?;
    let tz = parse_timezone(timezone)?;

    let mut firings = Vec::with_capacity(count);
    let mut after = Utc::now();
    for _ in 0..count {
        let Some(next) = next_in_zone(&schedule, &tz, after) else {
            break;
        };
        firings.push(next);
        after = next;
    }
    Ok(firings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn next_after_daily_expression() {
        let after = Utc.with_ymd_and_hms(2025, 1, 14, 23, 59, 59).unwrap();
        let next = next_after("0 10 * * *", "UTC", after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 1, 15, 10, 0, 0).unwrap());
    }

    #[test]
    fn next_after_is_strictly_greater() {
        let at = Utc.with_ymd_and_hms(2025, 1, 15, 12, 0, 0).unwrap();
        let next = next_after("*/5 * * * *", "UTC", at).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 1, 15, 12, 5, 0).unwrap());
    }

    #[test]
    fn next_after_honors_timezone() {
        // 09:00 in Dhaka (UTC+6) is 03:00 UTC.
        let after = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let next = next_after("0 9 * * *", "Asia/Dhaka", after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 6, 1, 3, 0, 0).unwrap());
    }

    #[test]
    fn spring_forward_gap_advances_to_next_valid_local_time() {
        // America/New_York jumps 02:00 -> 03:00 on 2025-03-09, so 02:30
        // never happens that day. Reference is 01:00 EST (06:00 UTC).
        let after = Utc.with_ymd_and_hms(2025, 3, 9, 6, 0, 0).unwrap();
        let next = next_after("30 2 * * *", "America/New_York", after).unwrap();
        // First valid wall-clock time after the gap: 03:00 EDT (07:00 UTC).
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 3, 9, 7, 0, 0).unwrap());

        // The following day has an ordinary 02:30 EDT (06:30 UTC).
        let following = next_after("30 2 * * *", "America/New_York", next).unwrap();
        assert_eq!(
            following,
            Utc.with_ymd_and_hms(2025, 3, 10, 6, 30, 0).unwrap()
        );
    }

    #[test]
    fn fall_back_fires_on_first_occurrence_only() {
        // America/New_York repeats 01:00-02:00 on 2025-11-02: 01:30 exists
        // twice, first as EDT (05:30 UTC) then as EST (06:30 UTC). Reference
        // is 00:00 EDT (04:00 UTC).
        let after = Utc.with_ymd_and_hms(2025, 11, 2, 4, 0, 0).unwrap();
        let next = next_after("30 1 * * *", "America/New_York", after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 11, 2, 5, 30, 0).unwrap());

        // The repeated 01:30 EST does not fire again; the next firing is the
        // following day at 01:30 EST (06:30 UTC).
        let following = next_after("30 1 * * *", "America/New_York", next).unwrap();
        assert_eq!(
            following,
            Utc.with_ymd_and_hms(2025, 11, 3, 6, 30, 0).unwrap()
        );
    }

    #[test]
    fn accepts_ranges_lists_and_steps() {
        assert!(validate_expression("0-30 1,2,3 */2 * 1-5").is_ok());
        assert!(validate_expression("*/15 * * * *").is_ok());
    }

    #[test]
    fn rejects_wrong_field_count() {
        let err = validate_expression("* * * *").unwrap_err();
        assert!(err.to_string().contains("expected 5 fields"));
        assert!(validate_expression("0 0 * * * *").is_err());
    }

    #[test]
    fn rejects_named_fields() {
        assert!(validate_expression("0 10 * JAN MON").is_err());
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert!(validate_expression("99 * * * *").is_err());
    }

    #[test]
    fn rejects_unknown_timezone() {
        assert!(next_after("0 10 * * *", "Mars/Olympus", Utc::now()).is_err());
    }

    #[test]
    fn preview_returns_requested_count() {
        let dates = preview("0 0 * * *", "UTC", 5).unwrap();
        assert_eq!(dates.len(), 5);
        assert!(dates.windows(2).all(|w| w[0] < w[1]));
    }
}
