//! Configuration module for Parlor.

use serde::Deserialize;
use std::path::Path;

use crate::{ParlorError, Result};

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port number to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Take the client IP from the first `X-Forwarded-For` entry.
    #[serde(default)]
    pub trust_forwarded_for: bool,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            trust_forwarded_for: false,
        }
    }
}

/// Chat room configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatConfig {
    /// Number of recent messages kept in memory.
    #[serde(default = "default_max_history")]
    pub max_history: usize,
    /// Maximum message length in characters.
    #[serde(default = "default_max_message_length")]
    pub max_message_length: usize,
    /// Suffix appended to the display name of admin authors.
    #[serde(default = "default_admin_marker")]
    pub admin_marker: String,
    /// Names that always resolve to the privileged admin tier.
    #[serde(default)]
    pub privileged_admins: Vec<String>,
    /// One-time password granting session admin at login.
    #[serde(default)]
    pub admin_override_password: Option<String>,
    /// Messages allowed per window for regular users.
    #[serde(default = "default_rate_limit_messages")]
    pub rate_limit_messages: u32,
    /// Flood control window in seconds.
    #[serde(default = "default_rate_limit_window")]
    pub rate_limit_window_secs: u64,
}

fn default_max_history() -> usize {
    500
}

fn default_max_message_length() -> usize {
    2000
}

fn default_admin_marker() -> String {
    " [admin]".to_string()
}

fn default_rate_limit_messages() -> u32 {
    10
}

fn default_rate_limit_window() -> u64 {
    10
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_history: default_max_history(),
            max_message_length: default_max_message_length(),
            admin_marker: default_admin_marker(),
            privileged_admins: Vec::new(),
            admin_override_password: None,
            rate_limit_messages: default_rate_limit_messages(),
            rate_limit_window_secs: default_rate_limit_window(),
        }
    }
}

impl ChatConfig {
    /// Check whether a name is on the static privileged admin list.
    pub fn is_privileged(&self, name: &str) -> bool {
        self.privileged_admins.iter().any(|n| n == name)
    }
}

/// Storage backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Process-local store, lost on restart.
    Memory,
    /// SQLite database file.
    Sqlite,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Which store implementation to use.
    #[serde(default = "default_backend")]
    pub backend: StoreBackend,
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_backend() -> StoreBackend {
    StoreBackend::Sqlite
}

fn default_db_path() -> String {
    "data/parlor.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: default_db_path(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Optional path to a log file, in addition to stdout.
    #[serde(default)]
    pub file: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Chat room configuration.
    #[serde(default)]
    pub chat: ChatConfig,
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(ParlorError::Io)?;
        Self::parse(&content)
    }

    /// Load configuration from a TOML file and apply environment variable overrides.
    pub fn load_with_env<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| ParlorError::Config(format!("config parse error: {e}")))
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Supported environment variables:
    /// - `PARLOR_ADMIN_PASSWORD`: Override the admin override password
    pub fn apply_env_overrides(&mut self) {
        if let Ok(password) = std::env::var("PARLOR_ADMIN_PASSWORD") {
            if !password.is_empty() {
                self.chat.admin_override_password = Some(password);
            }
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.chat.max_history == 0 {
            return Err(ParlorError::Config(
                "chat.max_history must be at least 1".to_string(),
            ));
        }
        if self.chat.rate_limit_window_secs == 0 {
            return Err(ParlorError::Config(
                "chat.rate_limit_window_secs must be at least 1".to_string(),
            ));
        }
        if let Some(password) = &self.chat.admin_override_password {
            if password.is_empty() {
                return Err(ParlorError::Config(
                    "chat.admin_override_password must not be empty when set".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 3000);
        assert!(!config.server.trust_forwarded_for);
        assert_eq!(config.chat.max_history, 500);
        assert_eq!(config.chat.max_message_length, 2000);
        assert_eq!(config.chat.admin_marker, " [admin]");
        assert!(config.chat.privileged_admins.is_empty());
        assert!(config.chat.admin_override_password.is_none());
        assert_eq!(config.chat.rate_limit_messages, 10);
        assert_eq!(config.chat.rate_limit_window_secs, 10);
        assert_eq!(config.database.backend, StoreBackend::Sqlite);
        assert_eq!(config.database.path, "data/parlor.db");
        assert_eq!(config.logging.level, "info");
        assert!(config.logging.file.is_none());
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
[server]
host = "127.0.0.1"
port = 8080
trust_forwarded_for = true

[chat]
max_history = 200
max_message_length = 500
admin_marker = " (mod)"
privileged_admins = ["root", "owner"]
admin_override_password = "hunter22"
rate_limit_messages = 5
rate_limit_window_secs = 30

[database]
backend = "memory"
path = "custom/chat.db"

[logging]
level = "debug"
file = "logs/parlor.log"
"#;

        let config = Config::parse(toml).unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert!(config.server.trust_forwarded_for);
        assert_eq!(config.chat.max_history, 200);
        assert_eq!(config.chat.max_message_length, 500);
        assert_eq!(config.chat.admin_marker, " (mod)");
        assert_eq!(config.chat.privileged_admins, vec!["root", "owner"]);
        assert_eq!(
            config.chat.admin_override_password.as_deref(),
            Some("hunter22")
        );
        assert_eq!(config.chat.rate_limit_messages, 5);
        assert_eq!(config.chat.rate_limit_window_secs, 30);
        assert_eq!(config.database.backend, StoreBackend::Memory);
        assert_eq!(config.database.path, "custom/chat.db");
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.file.as_deref(), Some("logs/parlor.log"));
    }

    #[test]
    fn test_parse_partial_config() {
        let toml = r#"
[chat]
privileged_admins = ["root"]
"#;

        let config = Config::parse(toml).unwrap();
        assert!(config.chat.is_privileged("root"));
        assert!(!config.chat.is_privileged("Root"));
        assert_eq!(config.chat.max_history, 500);
        assert_eq!(config.server.port, 3000);
    }

    #[test]
    fn test_parse_empty_config() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.server.port, 3000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_invalid_backend() {
        let toml = r#"
[database]
backend = "postgres"
"#;
        assert!(matches!(Config::parse(toml), Err(ParlorError::Config(_))));
    }

    #[test]
    fn test_validate_zero_history() {
        let mut config = Config::default();
        config.chat.max_history = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_empty_override_password() {
        let mut config = Config::default();
        config.chat.admin_override_password = Some(String::new());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("parlor.toml");
        std::fs::write(&path, "[server]\nport = 4444\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.server.port, 4444);
    }

    #[test]
    fn test_load_missing_file() {
        let result = Config::load("/nonexistent/parlor.toml");
        assert!(matches!(result, Err(ParlorError::Io(_))));
    }
}
