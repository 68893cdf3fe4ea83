//! Server configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `PARTSFLOW_DATABASE_URL` - `PostgreSQL` connection string (falls back to `DATABASE_URL`)
//!
//! ## Optional
//! - `PARTSFLOW_HOST` - Bind address (default: 127.0.0.1)
//! - `PARTSFLOW_PORT` - Listen port (default: 3002)
//! - `PARTSFLOW_DB_MAX_CONNECTIONS` - Pool size (default: 10)
//! - `PARTSFLOW_STOCK_POLICY` - `off`, `cap` or `reject` (default: off)
//! - `PARTSFLOW_SUB_PO_SCOPE` - `service_center` or `issuer` (default: `service_center`)
//! - `PARTSFLOW_ISSUER_CODE` - Location code for issuer-scoped sub-PO numbers (default: HQ)
//! - `PARTSFLOW_LOG_JSON` - Emit JSON logs when set
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment name
//! - `SENTRY_SAMPLE_RATE` - Error sample rate (default: 1.0)
//! - `SENTRY_TRACES_SAMPLE_RATE` - Traces sample rate (default: 0.1)

use std::net::{IpAddr, SocketAddr};

use partsflow_core::{DocumentKind, SequenceScope, StockPolicy};
use secrecy::SecretString;
use thiserror::Error;

const DEFAULT_ISSUER_CODE: &str = "HQ";

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

/// Which location code sub-PO numbers are scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubPoScope {
    /// The requesting service center's code.
    #[default]
    ServiceCenter,
    /// The configured issuer code, shared by every service center.
    Issuer,
}

impl std::str::FromStr for SubPoScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "service_center" => Ok(Self::ServiceCenter),
            "issuer" => Ok(Self::Issuer),
            other => Err(format!("expected service_center or issuer, got {other}")),
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// `PostgreSQL` database connection URL (contains password)
    pub database_url: SecretString,
    /// IP address to bind the server to
    pub host: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Maximum pool connections
    pub db_max_connections: u32,
    /// How admin approval treats on-hand stock
    pub stock_policy: StockPolicy,
    /// Location scope of sub-PO numbers
    pub sub_po_scope: SubPoScope,
    /// Location code used when `sub_po_scope` is `Issuer`
    pub issuer_code: String,
    /// JSON log output
    pub log_json: bool,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment (e.g., "development", "staging", "production")
    pub sentry_environment: Option<String>,
    /// Sentry error sample rate (0.0 to 1.0)
    pub sentry_sample_rate: f32,
    /// Sentry traces sample rate for performance monitoring (0.0 to 1.0)
    pub sentry_traces_sample_rate: f32,
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or invalid.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env(&lookup);

        let database_url = env.database_url("PARTSFLOW_DATABASE_URL")?;
        let host = env.parsed::<IpAddr>("PARTSFLOW_HOST", "127.0.0.1")?;
        let port = env.parsed::<u16>("PARTSFLOW_PORT", "3002")?;
        let db_max_connections = env.parsed::<u32>("PARTSFLOW_DB_MAX_CONNECTIONS", "10")?;
        if db_max_connections == 0 {
            return Err(ConfigError::InvalidEnvVar(
                "PARTSFLOW_DB_MAX_CONNECTIONS".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        let stock_policy = env.parsed::<StockPolicy>("PARTSFLOW_STOCK_POLICY", "off")?;
        let sub_po_scope = env.parsed::<SubPoScope>("PARTSFLOW_SUB_PO_SCOPE", "service_center")?;
        let issuer_code = env
            .or_default("PARTSFLOW_ISSUER_CODE", DEFAULT_ISSUER_CODE)
            .trim()
            .to_string();
        // Reject a code that could never form a document number.
        SequenceScope::new(DocumentKind::SubPurchaseOrder, &issuer_code, 2000, 1).map_err(
            |e| ConfigError::InvalidEnvVar("PARTSFLOW_ISSUER_CODE".to_string(), e.to_string()),
        )?;
        let log_json = env.optional("PARTSFLOW_LOG_JSON").is_some();

        let sentry_dsn = env.optional("SENTRY_DSN");
        let sentry_environment = env.optional("SENTRY_ENVIRONMENT");
        let sentry_sample_rate = env
            .optional("SENTRY_SAMPLE_RATE")
            .and_then(|s| s.parse().ok())
            .unwrap_or(1.0);
        let sentry_traces_sample_rate = env
            .optional("SENTRY_TRACES_SAMPLE_RATE")
            .and_then(|s| s.parse().ok())
            .unwrap_or(0.1);

        Ok(Self {
            database_url,
            host,
            port,
            db_max_connections,
            stock_policy,
            sub_po_scope,
            issuer_code,
            log_json,
            sentry_dsn,
            sentry_environment,
            sentry_sample_rate,
            sentry_traces_sample_rate,
        })
    }

    /// Returns the socket address for binding the server.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Location code for a sub-PO issued on behalf of `service_center_code`.
    #[must_use]
    pub fn sub_po_location<'a>(&'a self, service_center_code: &'a str) -> &'a str {
        match self.sub_po_scope {
            SubPoScope::ServiceCenter => service_center_code,
            SubPoScope::Issuer => &self.issuer_code,
        }
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

struct Env<'a, F: Fn(&str) -> Option<String>>(&'a F);

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    /// Get an optional, non-empty variable.
    fn optional(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|value| !value.trim().is_empty())
    }

    /// Get a variable with a default value.
    fn or_default(&self, key: &str, default: &str) -> String {
        self.optional(key).unwrap_or_else(|| default.to_string())
    }

    /// Parse a variable, falling back to `default` when unset.
    fn parsed<T>(&self, key: &str, default: &str) -> Result<T, ConfigError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        self.or_default(key, default)
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
    }

    /// Get database URL with fallback to generic `DATABASE_URL`.
    fn database_url(&self, primary_key: &str) -> Result<SecretString, ConfigError> {
        self.optional(primary_key)
            .or_else(|| self.optional("DATABASE_URL"))
            .map(SecretString::from)
            .ok_or_else(|| ConfigError::MissingEnvVar(primary_key.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<ServerConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        ServerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[("PARTSFLOW_DATABASE_URL", "postgres://localhost/partsflow")]).unwrap();

        assert_eq!(config.socket_addr().to_string(), "127.0.0.1:3002");
        assert_eq!(config.db_max_connections, 10);
        assert_eq!(config.stock_policy, StockPolicy::Off);
        assert_eq!(config.sub_po_scope, SubPoScope::ServiceCenter);
        assert_eq!(config.issuer_code, "HQ");
        assert!(!config.log_json);
        assert!(config.sentry_dsn.is_none());
    }

    #[test]
    fn test_missing_database_url() {
        let err = load(&[]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(key) if key == "PARTSFLOW_DATABASE_URL"));
    }

    #[test]
    fn test_database_url_fallback() {
        let config = load(&[("DATABASE_URL", "postgres://fallback/db")]).unwrap();
        assert_eq!(config.database_url.expose_secret(), "postgres://fallback/db");
    }

    #[test]
    fn test_invalid_port() {
        let err = load(&[
            ("PARTSFLOW_DATABASE_URL", "postgres://localhost/partsflow"),
            ("PARTSFLOW_PORT", "not-a-port"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnvVar(key, _) if key == "PARTSFLOW_PORT"));
    }

    #[test]
    fn test_stock_policy_and_sub_po_scope() {
        let config = load(&[
            ("PARTSFLOW_DATABASE_URL", "postgres://localhost/partsflow"),
            ("PARTSFLOW_STOCK_POLICY", "reject"),
            ("PARTSFLOW_SUB_PO_SCOPE", "issuer"),
            ("PARTSFLOW_ISSUER_CODE", "WH01"),
        ])
        .unwrap();

        assert_eq!(config.stock_policy, StockPolicy::Reject);
        assert_eq!(config.sub_po_location("SC001"), "WH01");
    }

    #[test]
    fn test_sub_po_location_defaults_to_service_center() {
        let config = load(&[("PARTSFLOW_DATABASE_URL", "postgres://localhost/partsflow")]).unwrap();
        assert_eq!(config.sub_po_location("SC001"), "SC001");
    }

    #[test]
    fn test_invalid_issuer_code() {
        let err = load(&[
            ("PARTSFLOW_DATABASE_URL", "postgres://localhost/partsflow"),
            ("PARTSFLOW_ISSUER_CODE", "H Q"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnvVar(key, _) if key == "PARTSFLOW_ISSUER_CODE"));
    }

    #[test]
    fn test_zero_pool_size_rejected() {
        assert!(
            load(&[
                ("PARTSFLOW_DATABASE_URL", "postgres://localhost/partsflow"),
                ("PARTSFLOW_DB_MAX_CONNECTIONS", "0"),
            ])
            .is_err()
        );
    }
}
