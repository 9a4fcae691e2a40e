//! Jobs configuration

use std::time::Duration;

use serde::Deserialize;
use validator::{Validate, ValidationError};

use domain_billing::{InvoicingPolicy, DEFAULT_PAYMENT_TERMS_DAYS};
use infra_db::DatabaseConfig;

/// Prefix of every environment variable the jobs read, e.g. `BILLING_DATABASE_URL`
pub const ENV_PREFIX: &str = "BILLING";

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines
    Pretty,
    /// One JSON object per event
    Json,
}

/// Jobs configuration
#[derive(Debug, Clone, Deserialize, Validate)]
#[validate(schema(function = "validate_pool_bounds"))]
pub struct JobsConfig {
    /// Database URL
    #[validate(length(min = 1))]
    pub database_url: String,
    #[validate(range(min = 1, max = 200))]
    pub max_connections: u32,
    pub min_connections: u32,
    /// Seconds to wait for a pooled connection
    #[validate(range(min = 1))]
    pub acquire_timeout_secs: u64,
    /// Log level
    pub log_level: String,
    pub log_format: LogFormat,
    /// Days from issue to due date on generated invoices
    #[validate(range(max = 365))]
    pub payment_terms_days: u32,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/ride_billing".to_string(),
            max_connections: 5,
            min_connections: 1,
            acquire_timeout_secs: 30,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            payment_terms_days: DEFAULT_PAYMENT_TERMS_DAYS,
        }
    }
}

impl JobsConfig {
    /// Loads configuration from `BILLING_*` environment variables over the defaults
    pub fn from_env() -> Result<Self, config::ConfigError> {
        Self::load(config::Environment::with_prefix(ENV_PREFIX))
    }

    /// Loads configuration from an explicit environment source over the defaults
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when a value cannot be parsed or fails validation.
    pub fn load(environment: config::Environment) -> Result<Self, config::ConfigError> {
        let defaults = Self::default();
        let config: Self = config::Config::builder()
            .set_default("database_url", defaults.database_url)?
            .set_default("max_connections", defaults.max_connections)?
            .set_default("min_connections", defaults.min_connections)?
            .set_default("acquire_timeout_secs", defaults.acquire_timeout_secs)?
            .set_default("log_level", defaults.log_level)?
            .set_default("log_format", "pretty")?
            .set_default("payment_terms_days", defaults.payment_terms_days)?
            .add_source(environment.try_parsing(true))
            .build()?
            .try_deserialize()?;

        config
            .validate()
            .map_err(|e| config::ConfigError::Message(e.to_string()))?;
        Ok(config)
    }

    /// Pool settings for `infra_db::create_pool`
    pub fn database(&self) -> DatabaseConfig {
        DatabaseConfig::new(&self.database_url)
            .pool_size(self.min_connections, self.max_connections)
            .acquire_timeout(Duration::from_secs(self.acquire_timeout_secs))
    }

    pub fn invoicing_policy(&self) -> InvoicingPolicy {
        InvoicingPolicy {
            payment_terms_days: self.payment_terms_days,
        }
    }
}

fn validate_pool_bounds(config: &JobsConfig) -> Result<(), ValidationError> {
    if config.min_connections > config.max_connections {
        return Err(ValidationError::new("min_connections_exceeds_max"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> config::Environment {
        let source: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        config::Environment::with_prefix(ENV_PREFIX).source(Some(source))
    }

    #[test]
    fn test_defaults_apply_without_environment() {
        let config = JobsConfig::load(env(&[])).unwrap();

        assert_eq!(config.database_url, "postgres://localhost/ride_billing");
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert_eq!(config.payment_terms_days, DEFAULT_PAYMENT_TERMS_DAYS);
    }

    #[test]
    fn test_environment_overrides_defaults() {
        let config = JobsConfig::load(env(&[
            ("BILLING_DATABASE_URL", "postgres://db/billing"),
            ("BILLING_MAX_CONNECTIONS", "20"),
            ("BILLING_LOG_FORMAT", "json"),
            ("BILLING_PAYMENT_TERMS_DAYS", "14"),
        ]))
        .unwrap();

        assert_eq!(config.database_url, "postgres://db/billing");
        assert_eq!(config.max_connections, 20);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.invoicing_policy().payment_terms_days, 14);
        assert_eq!(config.database().max_connections, 20);
    }

    #[test]
    fn test_inverted_pool_bounds_are_rejected() {
        let result = JobsConfig::load(env(&[
            ("BILLING_MAX_CONNECTIONS", "2"),
            ("BILLING_MIN_CONNECTIONS", "4"),
        ]));

        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_log_format_is_rejected() {
        assert!(JobsConfig::load(env(&[("BILLING_LOG_FORMAT", "xml")])).is_err());
    }
}
