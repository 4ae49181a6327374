use crate::error::ObserverError;
use std::env;

#[derive(Clone, Debug)]
pub struct Config {
    pub api_token: String,
    pub database_url: String,
    pub port: u16,
    pub schedule_sync_interval_secs: u64,
    pub delete_worker_count: usize,
    pub delete_poll_interval_ms: u64,
    pub delete_visibility_timeout_secs: i64,
    pub delete_max_attempts: i32,
    pub event_bus_capacity: usize,
    pub watchdog_interval_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, ObserverError> {
        let api_token = env::var("CO_API_TOKEN")
            .map_err(|_| ObserverError::Config("CO_API_TOKEN environment variable is required".to_string()))?;
        let database_url = env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite:data/cron_observer.db?mode=rwc".to_string());
        let port = env::var("PORT")
            .unwrap_or_else(|_| "3900".to_string())
            .parse()
            .map_err(|_| ObserverError::Config("Invalid PORT value".to_string()))?;

        let schedule_sync_interval_secs = env::var("CO_SCHEDULE_SYNC_INTERVAL_SECS")
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .map_err(|_| ObserverError::Config("Invalid CO_SCHEDULE_SYNC_INTERVAL_SECS value".to_string()))?;

        let delete_worker_count = env::var("CO_DELETE_WORKER_COUNT")
            .unwrap_or_else(|_| "1".to_string())
            .parse()
            .map_err(|_| ObserverError::Config("Invalid CO_DELETE_WORKER_COUNT value".to_string()))?;

        let delete_poll_interval_ms = env::var("CO_DELETE_POLL_INTERVAL_MS")
            .unwrap_or_else(|_| "1000".to_string())
            .parse()
            .map_err(|_| ObserverError::Config("Invalid CO_DELETE_POLL_INTERVAL_MS value".to_string()))?;

        // The delete contract requires a redelivery visibility timeout of at least 30s.
        let delete_visibility_timeout_secs: i64 = env::var("CO_DELETE_VISIBILITY_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .map_err(|_| ObserverError::Config("Invalid CO_DELETE_VISIBILITY_TIMEOUT_SECS value".to_string()))?;
        if delete_visibility_timeout_secs < 30 {
            return Err(ObserverError::Config(
                "CO_DELETE_VISIBILITY_TIMEOUT_SECS must be at least 30".to_string(),
            ));
        }

        let delete_max_attempts = env::var("CO_DELETE_MAX_ATTEMPTS")
            .unwrap_or_else(|_| "5".to_string())
            .parse()
            .map_err(|_| ObserverError::Config("Invalid CO_DELETE_MAX_ATTEMPTS value".to_string()))?;

        let event_bus_capacity = env::var("CO_EVENT_BUS_CAPACITY")
            .unwrap_or_else(|_| "256".to_string())
            .parse()
            .map_err(|_| ObserverError::Config("Invalid CO_EVENT_BUS_CAPACITY value".to_string()))?;

        let watchdog_interval_secs = env::var("CO_WATCHDOG_INTERVAL_SECS")
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .map_err(|_| ObserverError::Config("Invalid CO_WATCHDOG_INTERVAL_SECS value".to_string()))?;

        // Ensure the data directory exists for sqlite file databases
        if let Some(db_path_str) = database_url.strip_prefix("sqlite:") {
            if let Some(db_path) = db_path_str.split('?').next() {
                if let Some(parent) = std::path::Path::new(db_path).parent() {
                    std::fs::create_dir_all(parent)
                        .map_err(|e| ObserverError::Config(format!("Failed to create data directory: {e}")))?;
                }
            }
        }

        Ok(Config {
            api_token,
            database_url,
            port,
            schedule_sync_interval_secs,
            delete_worker_count,
            delete_poll_interval_ms,
            delete_visibility_timeout_secs,
            delete_max_attempts,
            event_bus_capacity,
            watchdog_interval_secs,
        })
    }
}
