//! Environment-driven configuration.
//!
//! Every setting has a default so the service boots with only an Agworld API
//! key. `AppConfig::from_env` reads the process environment (after `.env` has
//! been loaded by `dotenvy`); `from_lookup` takes any key lookup so tests can
//! build configs without touching process state.
//!
//! | Variable | Default |
//! |---|---|
//! | `AGWORLD_API_KEY` | empty |
//! | `AGWORLD_API_BASE_URL` | `https://us.agworld.co/user_api/v1` |
//! | `REDIS_URL` | unset (in-memory cache) |
//! | `DATABASE_URL` | unset (in-memory store) |
//! | `SERVICE_COMPONENTS` | `api,worker,scheduler` |
//! | `BIND_ADDR` | `0.0.0.0:8000` |
//! | `WORKER_CONCURRENCY` | `4` |
//! | `JOB_TIMEOUT_SECS` | `1800` |
//! | `RETRY_MAX_RETRIES` | `3` |
//! | `RETRY_BASE_DELAY_MS` | `60000` |
//! | `RETRY_MAX_DELAY_MS` | `120000` |
//! | `REPORT_OUTPUT_DIR` | `reports` |
//! | `REPORT_RECIPIENTS` | empty |
//!
//! A worker process refuses to start when three worst-case fetches, retries
//! included, would not fit inside `JOB_TIMEOUT_SECS`.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::external::agworld::AgworldConfig;
use crate::external::data_source::ResourceType;
use crate::services::cache_service::CacheConfig;
use crate::services::job_scheduler_service::SchedulerConfig;
use crate::services::notification_service::EmailConfig;
use crate::services::retry::RetryPolicy;
use crate::services::worker_pool::WorkerConfig;
use crate::topology::ServiceComponents;

pub type EnvLookup<'a> = &'a dyn Fn(&str) -> Option<String>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {message}")]
    Invalid { key: String, message: String },

    #[error("{0}")]
    Inconsistent(String),
}

/// Read a string, treating empty values as unset.
pub fn env_string(lookup: EnvLookup, key: &str, default: &str) -> String {
    env_optional(lookup, key).unwrap_or_else(|| default.to_string())
}

pub fn env_optional(lookup: EnvLookup, key: &str) -> Option<String> {
    lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

pub fn env_parse<T>(lookup: EnvLookup, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_optional(lookup, key) {
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
            key: key.to_string(),
            message: e.to_string(),
        }),
        None => Ok(default),
    }
}

pub fn env_list(lookup: EnvLookup, key: &str) -> Vec<String> {
    env_optional(lookup, key)
        .map(|raw| {
            raw.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
}

#[derive(Debug, Clone)]
pub struct ReportConfig {
    pub output_dir: PathBuf,
    pub recipients: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub components: ServiceComponents,
    pub server: ServerConfig,
    pub database_url: Option<String>,
    pub agworld: AgworldConfig,
    pub cache: CacheConfig,
    pub scheduler: SchedulerConfig,
    pub worker: WorkerConfig,
    pub retry: RetryPolicy,
    pub email: EmailConfig,
    pub reports: ReportConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: EnvLookup) -> Result<Self, ConfigError> {
        let components = env_parse(lookup, "SERVICE_COMPONENTS", ServiceComponents::all())?;

        let config = Self {
            components,
            server: ServerConfig {
                bind_addr: env_parse(lookup, "BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 8000)))?,
            },
            database_url: env_optional(lookup, "DATABASE_URL"),
            agworld: AgworldConfig::from_lookup(lookup)?,
            cache: CacheConfig::from_lookup(lookup)?,
            scheduler: SchedulerConfig::from_lookup(lookup)?,
            worker: WorkerConfig::from_lookup(lookup)?,
            retry: RetryPolicy::from_lookup(lookup)?,
            email: EmailConfig::from_lookup(lookup)?,
            reports: ReportConfig {
                output_dir: PathBuf::from(env_string(lookup, "REPORT_OUTPUT_DIR", "reports")),
                recipients: env_list(lookup, "REPORT_RECIPIENTS"),
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.components.scheduler && !self.components.worker {
            return Err(ConfigError::Inconsistent(
                "SERVICE_COMPONENTS includes scheduler without worker; the job queue is in-process".into(),
            ));
        }
        if self.worker.concurrency == 0 {
            return Err(ConfigError::Invalid {
                key: "WORKER_CONCURRENCY".into(),
                message: "must be at least 1".into(),
            });
        }
        if self.worker.job_timeout < Duration::from_secs(1) {
            return Err(ConfigError::Invalid {
                key: "JOB_TIMEOUT_SECS".into(),
                message: "must be at least 1 second".into(),
            });
        }

        // The daily summary fetches every resource in turn, each with its own
        // retry budget, and all of it must fit inside one job timeout.
        let per_fetch = self.retry.worst_case_duration(self.agworld.request_timeout);
        let per_job = per_fetch.saturating_mul(ResourceType::ALL.len() as u32);
        if self.components.worker && per_job >= self.worker.job_timeout {
            return Err(ConfigError::Inconsistent(format!(
                "retries can take up to {}s per job but JOB_TIMEOUT_SECS is {}; \
                 lower RETRY_MAX_RETRIES or RETRY_MAX_DELAY_MS, or raise the timeout",
                per_job.as_secs(),
                self.worker.job_timeout.as_secs()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        AppConfig::from_lookup(&|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert!(config.components.api && config.components.worker && config.components.scheduler);
        assert_eq!(config.server.bind_addr.port(), 8000);
        assert!(config.database_url.is_none());
        assert!(config.cache.redis_url.is_none());
        assert_eq!(config.worker.concurrency, 4);
        assert_eq!(config.worker.job_timeout, Duration::from_secs(1800));
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.agworld.base_url, "https://us.agworld.co/user_api/v1");
        assert!(config.reports.recipients.is_empty());
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("DATABASE_URL", "postgres://localhost/agworld"),
            ("REDIS_URL", "redis://cache:6379/0"),
            ("WORKER_CONCURRENCY", "8"),
            ("REPORT_RECIPIENTS", "a@example.com, b@example.com,"),
            ("SERVICE_COMPONENTS", "api"),
        ])
        .unwrap();

        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/agworld"));
        assert_eq!(config.cache.redis_url.as_deref(), Some("redis://cache:6379/0"));
        assert_eq!(config.worker.concurrency, 8);
        assert_eq!(config.reports.recipients, vec!["a@example.com", "b@example.com"]);
        assert!(config.components.api);
        assert!(!config.components.worker);
    }

    #[test]
    fn test_empty_values_fall_back_to_defaults() {
        let config = config_from(&[("DATABASE_URL", "  "), ("WORKER_CONCURRENCY", "")]).unwrap();
        assert!(config.database_url.is_none());
        assert_eq!(config.worker.concurrency, 4);
    }

    #[test]
    fn test_invalid_number_is_rejected() {
        let err = config_from(&[("WORKER_CONCURRENCY", "lots")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref key, .. } if key == "WORKER_CONCURRENCY"));
    }

    #[test]
    fn test_retry_budget_must_fit_job_timeout() {
        let config = config_from(&[]).unwrap();
        let per_job = config.retry.worst_case_duration(config.agworld.request_timeout) * 3;
        assert!(per_job < config.worker.job_timeout);

        let err = config_from(&[("JOB_TIMEOUT_SECS", "600")]).unwrap_err();
        assert!(matches!(err, ConfigError::Inconsistent(ref msg) if msg.contains("JOB_TIMEOUT_SECS")));

        let err = config_from(&[("RETRY_MAX_DELAY_MS", "900000")]).unwrap_err();
        assert!(matches!(err, ConfigError::Inconsistent(_)));

        // An api-only process never runs jobs.
        assert!(config_from(&[("JOB_TIMEOUT_SECS", "600"), ("SERVICE_COMPONENTS", "api")]).is_ok());
    }

    #[test]
    fn test_scheduler_requires_worker() {
        let err = config_from(&[("SERVICE_COMPONENTS", "api,scheduler")]).unwrap_err();
        assert!(matches!(err, ConfigError::Inconsistent(_)));
    }
}
