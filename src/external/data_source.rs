use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::models::JobParams;

/// Upstream resources the pollers read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceType {
    Fields,
    Activities,
    Crops,
}

impl ResourceType {
    pub const ALL: [ResourceType; 3] = [ResourceType::Fields, ResourceType::Activities, ResourceType::Crops];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Fields => "fields",
            ResourceType::Activities => "activities",
            ResourceType::Crops => "crops",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the retry machinery should treat a failed fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Network blips, timeouts, 5xx.
    Transient,
    /// Retryable, but the next attempt should wait longer.
    RateLimited,
    /// Retrying cannot help (auth, malformed requests or bodies).
    Fatal,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DataSourceError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("upstream server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("bad response: {0}")]
    BadResponse(String),

    #[error("parse error: {0}")]
    Parse(String),
}

impl DataSourceError {
    pub fn class(&self) -> ErrorClass {
        match self {
            DataSourceError::Network(_) | DataSourceError::Timeout | DataSourceError::Server { .. } => {
                ErrorClass::Transient
            }
            DataSourceError::RateLimited { .. } => ErrorClass::RateLimited,
            DataSourceError::Auth(_) | DataSourceError::BadResponse(_) | DataSourceError::Parse(_) => {
                ErrorClass::Fatal
            }
        }
    }
}

/// The upstream agricultural data API, reduced to what the jobs need.
///
/// Implementations return the extracted records of a resource as a JSON array.
#[async_trait]
pub trait DataSource: Send + Sync {
    async fn fetch(&self, resource: ResourceType, params: &JobParams) -> Result<Value, DataSourceError>;
}

/// Deterministic cache key for a fetch target and its params.
pub fn fingerprint(resource: ResourceType, params: &JobParams) -> String {
    let filters: Vec<String> = params
        .iter()
        .filter(|(name, _)| is_fetch_param(name))
        .map(|(name, value)| format!("{}={}", name, value))
        .collect();

    if filters.is_empty() {
        format!("agworld:{}:all", resource)
    } else {
        format!("agworld:{}:{}", resource, filters.join("&"))
    }
}

/// Key of the processed snapshot the pollers keep for the daily summary.
pub fn latest_key(resource: ResourceType) -> String {
    format!("agworld:{}:latest", resource)
}

/// Params that change what the upstream returns. Control params such as
/// `refresh` or `recipients` never take part in a fingerprint.
pub fn is_fetch_param(name: &str) -> bool {
    matches!(
        name,
        "farm_id" | "season_id" | "company_id" | "field_id" | "activity_type" | "updated_since"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ParamValue;

    #[test]
    fn test_fingerprint_without_params() {
        assert_eq!(fingerprint(ResourceType::Fields, &JobParams::new()), "agworld:fields:all");
    }

    #[test]
    fn test_fingerprint_is_order_independent_and_ignores_control_params() {
        let mut a = JobParams::new();
        a.insert("season_id".into(), ParamValue::Str("2024".into()));
        a.insert("farm_id".into(), ParamValue::Str("f1".into()));
        a.insert("refresh".into(), ParamValue::Bool(true));

        let mut b = JobParams::new();
        b.insert("farm_id".into(), ParamValue::Str("f1".into()));
        b.insert("season_id".into(), ParamValue::Str("2024".into()));

        assert_eq!(fingerprint(ResourceType::Fields, &a), fingerprint(ResourceType::Fields, &b));
        assert_eq!(fingerprint(ResourceType::Fields, &a), "agworld:fields:farm_id=f1&season_id=2024");
    }

    #[test]
    fn test_error_classification() {
        assert_eq!(DataSourceError::Timeout.class(), ErrorClass::Transient);
        assert_eq!(
            DataSourceError::Server { status: 503, message: "down".into() }.class(),
            ErrorClass::Transient
        );
        assert_eq!(DataSourceError::RateLimited { retry_after: None }.class(), ErrorClass::RateLimited);
        assert_eq!(DataSourceError::Auth("bad token".into()).class(), ErrorClass::Fatal);
        assert_eq!(DataSourceError::Parse("eof".into()).class(), ErrorClass::Fatal);
    }
}
