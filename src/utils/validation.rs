use chrono::NaiveDate;

use crate::database::tasks::{ScheduleConfig, TaskStatus, TriggerConfig};
use crate::error::{ObserverError, Result};
use crate::schedule::{evaluator, window};

pub const MAX_NAME_LENGTH: usize = 255;

/// Executor-side trigger timeouts are capped at 300s.
pub const MAX_TRIGGER_TIMEOUT_SECS: u64 = 300;

const ALLOWED_HTTP_METHODS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD"];

pub fn validate_name(name: &str) -> Result<()> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(ObserverError::Validation("name must not be empty".to_string()));
    }
    if trimmed.len() > MAX_NAME_LENGTH {
        return Err(ObserverError::Validation(format!(
            "name too long: {} characters (max {MAX_NAME_LENGTH})",
            trimmed.len()
        )));
    }
    Ok(())
}

/// Minimal shape check; deliverability is the notifier's problem.
pub fn validate_email(email: &str) -> Result<()> {
    let valid = email.contains('@')
        && !email.starts_with('@')
        && !email.ends_with('@')
        && !email.contains(char::is_whitespace);
    if !valid {
        return Err(ObserverError::Validation(format!("Invalid email: {email}")));
    }
    Ok(())
}

pub fn validate_emails(emails: &[String]) -> Result<()> {
    for email in emails {
        validate_email(email)?;
    }
    Ok(())
}

pub fn validate_trigger(trigger: &TriggerConfig) -> Result<()> {
    match trigger {
        TriggerConfig::Http { http } => {
            let parsed = url::Url::parse(&http.url)
                .map_err(|e| ObserverError::Validation(format!("Invalid trigger URL: {e}")))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(ObserverError::Validation(format!(
                    "Unsupported trigger URL scheme: {}",
                    parsed.scheme()
                )));
            }

            let method = http.method.to_uppercase();
            if !ALLOWED_HTTP_METHODS.contains(&method.as_str()) {
                return Err(ObserverError::Validation(format!(
                    "Unsupported trigger method: {}",
                    http.method
                )));
            }

            if let Some(timeout) = http.timeout {
                if timeout == 0 || timeout > MAX_TRIGGER_TIMEOUT_SECS {
                    return Err(ObserverError::Validation(format!(
                        "Trigger timeout must be between 1 and {MAX_TRIGGER_TIMEOUT_SECS} seconds"
                    )));
                }
            }
        }
    }
    Ok(())
}

/// Schedule rules on write: the timezone must always be an explicit valid
/// IANA zone, and an active task must carry a parseable cron expression.
pub fn validate_schedule_config(config: &ScheduleConfig, status: TaskStatus) -> Result<()> {
    evaluator::parse_timezone(&config.timezone)?;

    match config.cron_expression.as_deref() {
        Some(expr) => evaluator::validate_expression(expr)?,
        None => {
            if status == TaskStatus::Active {
                return Err(ObserverError::Validation(
                    "cron_expression is required for an active task".to_string(),
                ));
            }
        }
    }

    if let Some(days) = &config.days_of_week {
        for day in days {
            if !(1..=7).contains(day) {
                return Err(ObserverError::Validation(format!(
                    "days_of_week entries must be ISO weekday numbers 1-7, got {day}"
                )));
            }
        }
    }

    if let Some(range) = &config.time_range {
        window::parse_hhmm(&range.start)?;
        window::parse_hhmm(&range.end)?;
    }

    Ok(())
}

pub fn validate_timeout_seconds(timeout: Option<i64>) -> Result<()> {
    if let Some(timeout) = timeout {
        if timeout <= 0 {
            return Err(ObserverError::Validation(
                "timeout_seconds must be positive".to_string(),
            ));
        }
    }
    Ok(())
}

pub fn parse_date_param(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| ObserverError::Validation(format!("Invalid date '{value}': expected YYYY-MM-DD")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::tasks::{HttpTrigger, TimeRange};

    fn http_trigger(url: &str, method: &str, timeout: Option<u64>) -> TriggerConfig {
        TriggerConfig::Http {
            http: HttpTrigger {
                url: url.to_string(),
                method: method.to_string(),
                headers: None,
                body: None,
                timeout,
            },
        }
    }

    #[test]
    fn name_bounds() {
        assert!(validate_name("nightly-report").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name(&"x".repeat(256)).is_err());
    }

    #[test]
    fn trigger_url_and_method() {
        assert!(validate_trigger(&http_trigger("https://example.com/hook", "POST", None)).is_ok());
        assert!(validate_trigger(&http_trigger("not a url", "POST", None)).is_err());
        assert!(validate_trigger(&http_trigger("ftp://example.com", "POST", None)).is_err());
        assert!(validate_trigger(&http_trigger("https://example.com", "YEET", None)).is_err());
    }

    #[test]
    fn trigger_timeout_cap() {
        assert!(validate_trigger(&http_trigger("https://example.com", "GET", Some(300))).is_ok());
        assert!(validate_trigger(&http_trigger("https://example.com", "GET", Some(301))).is_err());
        assert!(validate_trigger(&http_trigger("https://example.com", "GET", Some(0))).is_err());
    }

    #[test]
    fn active_task_requires_cron() {
        let config = ScheduleConfig {
            timezone: "UTC".to_string(),
            cron_expression: None,
            time_range: None,
            days_of_week: None,
            exclusions: None,
        };
        assert!(validate_schedule_config(&config, TaskStatus::Active).is_err());
        assert!(validate_schedule_config(&config, TaskStatus::Disabled).is_ok());
    }

    #[test]
    fn schedule_config_field_checks() {
        let config = ScheduleConfig {
            timezone: "Asia/Dhaka".to_string(),
            cron_expression: Some("0 10 * * *".to_string()),
            time_range: Some(TimeRange {
                start: "09:00".to_string(),
                end: "17:00".to_string(),
            }),
            days_of_week: Some(vec![1, 2, 3]),
            exclusions: None,
        };
        assert!(validate_schedule_config(&config, TaskStatus::Active).is_ok());

        let mut bad_days = config.clone();
        bad_days.days_of_week = Some(vec![0]);
        assert!(validate_schedule_config(&bad_days, TaskStatus::Active).is_err());

        let mut bad_tz = config;
        bad_tz.timezone = "Nowhere/Void".to_string();
        assert!(validate_schedule_config(&bad_tz, TaskStatus::Active).is_err());
    }
}
