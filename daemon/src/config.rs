/// Daemon configuration
use crate::errors::{DaemonError, DaemonResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Secret shipped in the default configuration
pub const DEFAULT_JWT_SECRET: &str = "default-secret-change-in-production";

/// Daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub database: DatabaseConfig,
    pub workflow: WorkflowConfig,
    pub events: EventsConfig,
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// HTTP server bind address
    pub http_addr: String,
    /// HTTP server port (0 picks a free port)
    pub http_port: u16,
    /// Enable metrics endpoint
    pub enable_metrics: bool,
    /// Metrics port
    pub metrics_port: u16,
    /// How long shutdown waits for in-flight mutations
    pub shutdown_drain_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            http_addr: "127.0.0.1".to_string(),
            http_port: 8080,
            enable_metrics: true,
            metrics_port: 9090,
            shutdown_drain_secs: 10,
        }
    }
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// JWT secret key
    pub jwt_secret: String,
    /// Token expiry in seconds
    pub token_expiry_secs: u64,
    /// Expected `iss` claim
    pub issuer: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        AuthConfig {
            jwt_secret: DEFAULT_JWT_SECRET.to_string(),
            token_expiry_secs: 86400,
            issuer: "qcflow".to_string(),
        }
    }
}

/// Document record store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite database file
    pub path: PathBuf,
    /// Maximum pool size
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            path: PathBuf::from("qcflow.db"),
            max_connections: 5,
        }
    }
}

/// Workflow configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Max wait for a drawing's ordering slot, in milliseconds
    pub slot_timeout_ms: u64,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        WorkflowConfig {
            slot_timeout_ms: 5000,
        }
    }
}

/// Event hub and notification transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Bounded queue size per subscriber
    pub subscriber_queue_capacity: usize,
    /// Interval between keepalive comments
    pub keepalive_secs: u64,
    /// Reconnect delay suggested to clients
    pub retry_ms: u64,
}

impl Default for EventsConfig {
    fn default() -> Self {
        EventsConfig {
            subscriber_queue_capacity: 10,
            keepalive_secs: 15,
            retry_ms: 3000,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
    /// Log format: "json" or "pretty"
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl WorkflowConfig {
    pub fn slot_timeout(&self) -> Duration {
        Duration::from_millis(self.slot_timeout_ms)
    }
}

impl EventsConfig {
    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }
}

impl ServerConfig {
    pub fn shutdown_drain(&self) -> Duration {
        Duration::from_secs(self.shutdown_drain_secs)
    }
}

impl DaemonConfig {
    /// Load configuration from file
    pub fn load(path: &Path) -> DaemonResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| DaemonError::ConfigError(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| DaemonError::ConfigError(format!("Failed to parse config: {}", e)))
    }

    /// Load from TOML file or use defaults
    pub fn load_or_default(path: Option<&Path>) -> DaemonResult<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> DaemonResult<()> {
        if self.server.enable_metrics
            && self.server.metrics_port != 0
            && self.server.metrics_port == self.server.http_port
        {
            return Err(DaemonError::ConfigError(
                "metrics_port must differ from http_port".to_string(),
            ));
        }

        if self.auth.jwt_secret.is_empty() {
            return Err(DaemonError::ConfigError(
                "auth.jwt_secret must not be empty".to_string(),
            ));
        }

        if self.auth.token_expiry_secs == 0 {
            return Err(DaemonError::ConfigError(
                "auth.token_expiry_secs must be greater than 0".to_string(),
            ));
        }

        if self.database.max_connections == 0 {
            return Err(DaemonError::ConfigError(
                "database.max_connections must be greater than 0".to_string(),
            ));
        }

        if self.workflow.slot_timeout_ms == 0 {
            return Err(DaemonError::ConfigError(
                "workflow.slot_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.events.subscriber_queue_capacity == 0 {
            return Err(DaemonError::ConfigError(
                "events.subscriber_queue_capacity must be greater than 0".to_string(),
            ));
        }

        if self.events.keepalive_secs == 0 {
            return Err(DaemonError::ConfigError(
                "events.keepalive_secs must be greater than 0".to_string(),
            ));
        }

        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            return Err(DaemonError::ConfigError(format!(
                "logging.format must be \"json\" or \"pretty\", got \"{}\"",
                self.logging.format
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = DaemonConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_metrics_port_must_differ() {
        let mut config = DaemonConfig::default();
        config.server.metrics_port = config.server.http_port;
        assert!(config.validate().is_err());

        config.server.enable_metrics = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_queue_capacity_validation() {
        let mut config = DaemonConfig::default();
        config.events.subscriber_queue_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_log_format_rejected() {
        let mut config = DaemonConfig::default();
        config.logging.format = "xml".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: DaemonConfig = toml::from_str(
            r#"
            [server]
            http_port = 9000

            [workflow]
            slot_timeout_ms = 250
            "#,
        )
        .unwrap();

        assert_eq!(config.server.http_port, 9000);
        assert_eq!(config.server.http_addr, "127.0.0.1");
        assert_eq!(config.workflow.slot_timeout(), Duration::from_millis(250));
        assert_eq!(config.events.subscriber_queue_capacity, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("qcflow.toml");
        std::fs::write(&path, "[logging]\nformat = \"json\"\n").unwrap();

        let config = DaemonConfig::load(&path).unwrap();
        assert_eq!(config.logging.format, "json");

        assert!(DaemonConfig::load(&dir.path().join("missing.toml")).is_err());
    }
}
