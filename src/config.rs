//! Configuration types.

use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// Service configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address the HTTP server binds to.
    pub bind_addr: String,
    /// Number of workers executing jobs.
    pub workers: usize,
    /// How long a terminal job stays pollable before it is reaped.
    pub retention: Duration,
    /// How often the reaper sweeps the registry.
    pub reap_interval: Duration,
    /// Adjust datasets larger than this are randomly subsampled.
    pub max_dataset_rows: usize,
    /// Progress events buffered per job before the oldest are dropped.
    pub progress_capacity: usize,
    /// Model name an Adjust job publishes to when the request names none.
    pub default_output_model: String,
    /// Pause between stages of the simulated backend.
    pub stage_delay: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            workers: 4,
            retention: Duration::from_secs(3600), // 1 hour
            reap_interval: Duration::from_secs(60),
            max_dataset_rows: 300,
            progress_capacity: 64,
            default_output_model: "tuneserve-adjusted".to_string(),
            stage_delay: Duration::from_millis(250),
        }
    }
}

impl ServiceConfig {
    /// Build config from `TUNESERVE_*` environment variables, falling back
    /// to the defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let bind_addr = std::env::var("TUNESERVE_BIND").unwrap_or(defaults.bind_addr);

        let workers: usize = parse_var("TUNESERVE_WORKERS")?.unwrap_or(defaults.workers);
        if workers == 0 {
            return Err(ConfigError::InvalidValue {
                key: "TUNESERVE_WORKERS".to_string(),
                message: "at least one worker is required".to_string(),
            });
        }

        let retention = parse_var("TUNESERVE_RETENTION_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.retention);
        let reap_interval = parse_var("TUNESERVE_REAP_INTERVAL_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.reap_interval);
        let max_dataset_rows =
            parse_var("TUNESERVE_MAX_DATASET_ROWS")?.unwrap_or(defaults.max_dataset_rows);
        let progress_capacity: usize =
            parse_var("TUNESERVE_PROGRESS_CAPACITY")?.unwrap_or(defaults.progress_capacity);
        let default_output_model = std::env::var("TUNESERVE_OUTPUT_MODEL")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(defaults.default_output_model);
        let stage_delay = parse_var("TUNESERVE_STAGE_DELAY_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.stage_delay);

        Ok(Self {
            bind_addr,
            workers,
            retention,
            reap_interval,
            max_dataset_rows,
            progress_capacity: progress_capacity.max(1),
            default_output_model,
            stage_delay,
        })
    }
}

fn parse_var<T>(key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("{raw:?}: {e}"),
            }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = ServiceConfig::default();
        assert_eq!(config.workers, 4);
        assert_eq!(config.max_dataset_rows, 300);
        assert_eq!(config.retention, Duration::from_secs(3600));
    }

    #[test]
    fn parse_var_reports_key_on_garbage() {
        // Unique key so parallel tests don't step on each other.
        let key = "TUNESERVE_TEST_PARSE_GARBAGE";
        unsafe { std::env::set_var(key, "many") };
        let err = parse_var::<usize>(key).unwrap_err();
        unsafe { std::env::remove_var(key) };
        match err {
            ConfigError::InvalidValue { key: k, .. } => assert_eq!(k, key),
        }
    }

    #[test]
    fn parse_var_unset_is_none() {
        let parsed = parse_var::<u64>("TUNESERVE_TEST_NEVER_SET").unwrap();
        assert!(parsed.is_none());
    }
}
