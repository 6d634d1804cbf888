//! Application configuration loaded from environment variables.

use std::time::Duration;

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST` — bind address (default: `"0.0.0.0"`)
/// - `PORT` — listen port (default: `3000`)
/// - `RUST_LOG` — tracing filter directive (default: `"info"`)
/// - `DATABASE_URL` — PostgreSQL connection string (default: `None`, uses in-memory store)
/// - `DB_MAX_CONNECTIONS` — max database pool connections (default: `10`)
/// - `RUNTIME_ID` — identifier of this node for recovery ownership (default: random)
/// - `DATAPLANE_ID` — identifier reported in signaling responses (default: `"default-dataplane"`)
/// - `PUBLIC_ENDPOINT` — endpoint handed out in data addresses (default: `"http://localhost:8080/public"`)
/// - `RECOVERY_LEASE_SECS` — staleness threshold for the recovery sweep (default: `60`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub runtime_id: String,
    pub dataplane_id: String,
    pub public_endpoint: String,
    pub recovery_lease_secs: u64,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(3000),
            log_level: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            database_url: std::env::var("DATABASE_URL").ok(),
            db_max_connections: std::env::var("DB_MAX_CONNECTIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
            runtime_id: std::env::var("RUNTIME_ID")
                .unwrap_or_else(|_| uuid::Uuid::new_v4().to_string()),
            dataplane_id: std::env::var("DATAPLANE_ID")
                .unwrap_or_else(|_| "default-dataplane".to_string()),
            public_endpoint: std::env::var("PUBLIC_ENDPOINT")
                .unwrap_or_else(|_| "http://localhost:8080/public".to_string()),
            recovery_lease_secs: std::env::var("RECOVERY_LEASE_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Returns the recovery lease threshold as a duration.
    pub fn recovery_lease(&self) -> Duration {
        Duration::from_secs(self.recovery_lease_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            database_url: None,
            db_max_connections: 10,
            runtime_id: "dataplane-runtime".to_string(),
            dataplane_id: "default-dataplane".to_string(),
            public_endpoint: "http://localhost:8080/public".to_string(),
            recovery_lease_secs: 60,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = Config::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.log_level, "info");
        assert!(config.database_url.is_none());
        assert_eq!(config.recovery_lease_secs, 60);
    }

    #[test]
    fn addr_formatting() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..Config::default()
        };
        assert_eq!(config.addr(), "127.0.0.1:8080");
    }

    #[test]
    fn recovery_lease_converts_to_duration() {
        let config = Config {
            recovery_lease_secs: 120,
            ..Config::default()
        };
        assert_eq!(config.recovery_lease(), Duration::from_secs(120));
    }
}
