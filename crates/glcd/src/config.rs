//! Configuration management for the GLCD hub daemon.
//!
//! This module handles loading, validation, and conversion of daemon
//! configuration from TOML files and command-line arguments.

use crate::cli::CliArgs;
use glcd_server::{BackoffPolicy, HubConfig, SupervisorConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Log levels accepted by `[logging] level`.
pub const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Application configuration loaded from TOML file.
///
/// This is the main configuration structure that encompasses the bus
/// topology, the document store, hub tuning, supervision, the auth secret
/// and logging.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// NSQ bus settings
    #[serde(default)]
    pub nsq: NsqSettings,
    /// MongoDB settings
    #[serde(default)]
    pub mongo: MongoSettings,
    /// Queue sizes and timers of the hub core
    #[serde(default)]
    pub hub: HubSettings,
    /// Restart policy for the hub services
    #[serde(default)]
    pub supervisor: SupervisorSettings,
    /// Password verification settings
    #[serde(default)]
    pub auth: AuthSettings,
    /// Logging configuration settings
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// NSQ bus configuration.
///
/// Clients publish to `server_topic` on any nsqd; producers are discovered
/// through nsqlookupd when it is configured.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NsqSettings {
    /// Home nsqd TCP address (e.g., "127.0.0.1:4150")
    pub nsqd_address: String,
    /// Optional nsqlookupd HTTP address
    pub lookupd_address: Option<String>,
    /// Topic the hub consumes
    pub server_topic: String,
    /// Channel the hub consumes through
    pub server_channel: String,
    /// Maximum unacknowledged messages per connection
    pub max_in_flight: u32,
    /// Seconds between nsqlookupd polls
    pub lookupd_poll_interval_secs: u64,
}

impl Default for NsqSettings {
    fn default() -> Self {
        Self {
            nsqd_address: "127.0.0.1:4150".to_string(),
            lookupd_address: None,
            server_topic: "glcd".to_string(),
            server_channel: "glcd".to_string(),
            max_in_flight: 32,
            lookupd_poll_interval_secs: 60,
        }
    }
}

/// MongoDB configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MongoSettings {
    /// Connection string
    pub servers: String,
    /// Database holding the zone, auth and counter collections
    pub db: String,
}

impl Default for MongoSettings {
    fn default() -> Self {
        Self {
            servers: "mongodb://127.0.0.1:27017".to_string(),
            db: "glc".to_string(),
        }
    }
}

/// Hub core tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubSettings {
    /// Capacity of each per-service queue
    pub channel_capacity: usize,
    /// Seconds between cleanup sweeps; a client silent this long is evicted
    pub cleanup_interval_secs: u64,
    /// Seconds shutdown waits for in-flight work
    pub shutdown_grace_secs: u64,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
            cleanup_interval_secs: 10,
            shutdown_grace_secs: 5,
        }
    }
}

/// Service restart policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorSettings {
    pub max_restarts: u32,
    pub backoff_first_ms: u64,
    pub backoff_max_ms: u64,
    pub backoff_factor: f64,
    /// Seconds of uptime after which the failure count resets
    pub stable_after_secs: u64,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            max_restarts: 5,
            backoff_first_ms: 100,
            backoff_max_ms: 5_000,
            backoff_factor: 2.0,
            stable_after_secs: 30,
        }
    }
}

/// Password verification settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    /// Server-wide key mixed into every password digest
    pub secret: String,
}

/// Logging system configuration.
///
/// Controls log output format and level.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    /// Whether to output logs in JSON format
    pub json_format: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, creates a default configuration file at the
    /// specified path and returns the default configuration.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// The loaded or default configuration, or an error if loading/creation failed.
    pub async fn load_from_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let config: AppConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Applies command-line overrides on top of the file settings.
    pub fn apply_cli(&mut self, args: &CliArgs) {
        if let Some(nsqd) = &args.nsqd_address {
            self.nsq.nsqd_address = nsqd.clone();
        }
        if let Some(lookupd) = &args.lookupd_address {
            self.nsq.lookupd_address = Some(lookupd.clone());
        }
        if let Some(servers) = &args.mongo_servers {
            self.mongo.servers = servers.clone();
        }
        if let Some(db) = &args.mongo_db {
            self.mongo.db = db.clone();
        }
        if let Some(level) = &args.log_level {
            self.logging.level = level.clone();
        }
        if args.json_logs {
            self.logging.json_format = true;
        }
    }

    /// Converts the application configuration to the hub's runtime configuration.
    pub fn to_hub_config(&self) -> HubConfig {
        HubConfig {
            nsqd_address: self.nsq.nsqd_address.clone(),
            lookupd_address: self
                .nsq
                .lookupd_address
                .clone()
                .filter(|addr| !addr.trim().is_empty()),
            server_topic: self.nsq.server_topic.clone(),
            server_channel: self.nsq.server_channel.clone(),
            max_in_flight: self.nsq.max_in_flight,
            lookupd_poll_interval: Duration::from_secs(self.nsq.lookupd_poll_interval_secs),
            mongo_servers: self.mongo.servers.clone(),
            mongo_db: self.mongo.db.clone(),
            channel_capacity: self.hub.channel_capacity,
            cleanup_interval: Duration::from_secs(self.hub.cleanup_interval_secs),
            shutdown_grace: Duration::from_secs(self.hub.shutdown_grace_secs),
            auth_secret: self.auth.secret.clone(),
            supervisor: SupervisorConfig {
                max_restarts: self.supervisor.max_restarts,
                backoff: BackoffPolicy {
                    first: Duration::from_millis(self.supervisor.backoff_first_ms),
                    max: Duration::from_millis(self.supervisor.backoff_max_ms),
                    factor: self.supervisor.backoff_factor,
                },
                stable_after: Duration::from_secs(self.supervisor.stable_after_secs),
            },
        }
    }

    /// Validates the configuration for consistency and correctness.
    ///
    /// Checks bus addresses, names, queue sizes, timers and the log level.
    ///
    /// # Returns
    ///
    /// `Ok(())` if the configuration is valid, or an error string describing the issue.
    pub fn validate(&self) -> Result<(), String> {
        if !is_host_port(&self.nsq.nsqd_address) {
            return Err(format!("Invalid nsqd address: {}", self.nsq.nsqd_address));
        }
        if let Some(lookupd) = &self.nsq.lookupd_address {
            if !lookupd.trim().is_empty() && !is_host_port(lookupd) {
                return Err(format!("Invalid lookupd address: {lookupd}"));
            }
        }
        if self.nsq.server_topic.trim().is_empty() {
            return Err("nsq.server_topic cannot be empty".to_string());
        }
        if self.nsq.server_channel.trim().is_empty() {
            return Err("nsq.server_channel cannot be empty".to_string());
        }
        if self.nsq.max_in_flight == 0 {
            return Err("nsq.max_in_flight must be greater than 0".to_string());
        }
        if self.nsq.lookupd_poll_interval_secs == 0 {
            return Err("nsq.lookupd_poll_interval_secs must be greater than 0".to_string());
        }

        if self.mongo.servers.trim().is_empty() {
            return Err("mongo.servers cannot be empty".to_string());
        }
        if self.mongo.db.trim().is_empty() {
            return Err("mongo.db cannot be empty".to_string());
        }

        if self.hub.channel_capacity == 0 {
            return Err("hub.channel_capacity must be greater than 0".to_string());
        }
        if self.hub.cleanup_interval_secs == 0 {
            return Err("hub.cleanup_interval_secs must be greater than 0".to_string());
        }

        if self.supervisor.backoff_factor < 1.0 {
            return Err("supervisor.backoff_factor must be at least 1.0".to_string());
        }
        if self.supervisor.backoff_first_ms > self.supervisor.backoff_max_ms {
            return Err("supervisor.backoff_first_ms must not exceed backoff_max_ms".to_string());
        }

        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {VALID_LOG_LEVELS:?}",
                &self.logging.level
            ));
        }

        Ok(())
    }
}

/// `host:port` with a non-empty host and a numeric port.
fn is_host_port(address: &str) -> bool {
    match address.rsplit_once(':') {
        Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok(),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::{NamedTempFile, TempDir};
    use tokio::fs;

    #[test]
    fn test_app_config_default() {
        let config = AppConfig::default();

        assert_eq!(config.nsq.nsqd_address, "127.0.0.1:4150");
        assert_eq!(config.nsq.server_topic, "glcd");
        assert!(config.nsq.lookupd_address.is_none());
        assert_eq!(config.mongo.db, "glc");
        assert_eq!(config.hub.channel_capacity, 256);
        assert_eq!(config.hub.cleanup_interval_secs, 10);
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn test_load_from_nonexistent_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("glcd.toml");

        let config = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(config.nsq.nsqd_address, "127.0.0.1:4150");

        // The default file is written and reads back to the same settings
        assert!(path.exists());
        let reread = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(reread.hub.channel_capacity, config.hub.channel_capacity);
        assert_eq!(reread.supervisor.backoff_factor, config.supervisor.backoff_factor);
    }

    #[tokio::test]
    async fn test_load_from_existing_file() {
        let toml_content = r#"
[nsq]
nsqd_address = "nsqd:4150"
lookupd_address = "lookupd:4161"
server_topic = "world"
max_in_flight = 8

[mongo]
servers = "mongodb://db:27017"
db = "prod"

[hub]
cleanup_interval_secs = 30

[auth]
secret = "pepper"

[logging]
level = "debug"
json_format = true
"#;

        let temp_file = NamedTempFile::new().unwrap();
        fs::write(temp_file.path(), toml_content).await.unwrap();

        let config = AppConfig::load_from_file(temp_file.path()).await.unwrap();

        assert_eq!(config.nsq.nsqd_address, "nsqd:4150");
        assert_eq!(config.nsq.lookupd_address.as_deref(), Some("lookupd:4161"));
        assert_eq!(config.nsq.server_topic, "world");
        // Unset keys fall back to defaults
        assert_eq!(config.nsq.server_channel, "glcd");
        assert_eq!(config.nsq.max_in_flight, 8);
        assert_eq!(config.mongo.db, "prod");
        assert_eq!(config.hub.cleanup_interval_secs, 30);
        assert_eq!(config.hub.channel_capacity, 256);
        assert_eq!(config.auth.secret, "pepper");
        assert_eq!(config.supervisor.max_restarts, 5);
        assert!(config.logging.json_format);
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn test_load_rejects_malformed_toml() {
        let temp_file = NamedTempFile::new().unwrap();
        fs::write(temp_file.path(), "[nsq\nnsqd_address = ").await.unwrap();
        assert!(AppConfig::load_from_file(temp_file.path()).await.is_err());
    }

    #[test]
    fn test_to_hub_config_conversion() {
        let mut config = AppConfig::default();
        config.nsq.lookupd_address = Some("lookupd:4161".to_string());
        config.hub.cleanup_interval_secs = 15;
        config.supervisor.backoff_first_ms = 250;
        config.auth.secret = "pepper".to_string();

        let hub = config.to_hub_config();
        assert_eq!(hub.lookupd_address.as_deref(), Some("lookupd:4161"));
        assert_eq!(hub.cleanup_interval, Duration::from_secs(15));
        assert_eq!(hub.lookupd_poll_interval, Duration::from_secs(60));
        assert_eq!(hub.supervisor.backoff.first, Duration::from_millis(250));
        assert_eq!(hub.supervisor.stable_after, Duration::from_secs(30));
        assert_eq!(hub.auth_secret, "pepper");
        assert!(hub.validate().is_ok());
    }

    #[test]
    fn test_blank_lookupd_means_none() {
        let mut config = AppConfig::default();
        config.nsq.lookupd_address = Some("  ".to_string());
        assert!(config.validate().is_ok());
        assert!(config.to_hub_config().lookupd_address.is_none());
    }

    #[test]
    fn test_cli_overrides() {
        let mut config = AppConfig::default();
        let args = CliArgs {
            config_path: PathBuf::from("glcd.toml"),
            nsqd_address: Some("10.0.0.2:4150".to_string()),
            mongo_db: Some("staging".to_string()),
            log_level: Some("warn".to_string()),
            json_logs: true,
            ..CliArgs::default()
        };

        config.apply_cli(&args);
        assert_eq!(config.nsq.nsqd_address, "10.0.0.2:4150");
        assert_eq!(config.mongo.db, "staging");
        assert_eq!(config.mongo.servers, "mongodb://127.0.0.1:27017");
        assert_eq!(config.logging.level, "warn");
        assert!(config.logging.json_format);
    }

    #[test]
    fn test_validation_invalid_addresses() {
        for bad in ["", "nsqd", "nsqd:", ":4150", "nsqd:port"] {
            let mut config = AppConfig::default();
            config.nsq.nsqd_address = bad.to_string();
            assert!(config.validate().is_err(), "accepted {bad:?}");
        }

        let mut config = AppConfig::default();
        config.nsq.lookupd_address = Some("lookupd".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_zero_values() {
        let mut config = AppConfig::default();
        config.hub.channel_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.hub.cleanup_interval_secs = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.nsq.max_in_flight = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.nsq.server_topic = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_backoff() {
        let mut config = AppConfig::default();
        config.supervisor.backoff_factor = 0.5;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.supervisor.backoff_first_ms = 10_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_log_levels() {
        let mut config = AppConfig::default();
        for level in VALID_LOG_LEVELS {
            config.logging.level = level.to_string();
            assert!(config.validate().is_ok());
        }
        config.logging.level = "verbose".to_string();
        assert!(config.validate().is_err());
    }
}
