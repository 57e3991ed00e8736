//! Engine configuration.
//!
//! Stored as JSON. Every field has a default, so an empty object (or no file
//! at all) is a valid configuration.
//!
//! ```json
//! {
//!   "prefix": "!",
//!   "operator_id": "1234",
//!   "privileged_roles": ["admin"],
//!   "tick_interval_ms": 5000
//! }
//! ```

use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default file name inside the application's config directory
pub const CONFIG_FILE: &str = "hark.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Marker that starts a command invocation
    pub prefix: String,

    /// The single identity granted `private` commands and every other check
    pub operator_id: Option<String>,

    /// Role ids that count as elevated on a server
    pub privileged_roles: Vec<String>,

    /// Id of the generated subcommand-listing node
    pub help_id: String,

    /// Session expiry poll interval
    pub tick_interval_ms: u64,

    /// Deny sessions on servers without an explicit allow/deny entry
    pub strict_sessions: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            prefix: "!".to_string(),
            operator_id: None,
            privileged_roles: Vec::new(),
            help_id: "help".to_string(),
            tick_interval_ms: 5_000,
            strict_sessions: true,
        }
    }
}

impl EngineConfig {
    /// Read a config file. A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }

        let reader = BufReader::new(File::open(path)?);
        let config: Self = serde_json::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `<config dir>/<app>/hark.json`
    pub fn default_for_app(app_name: &str) -> Result<Self, ConfigError> {
        Self::load(Self::default_path(app_name))
    }

    pub fn default_path(app_name: &str) -> PathBuf {
        let config_dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from(".config"));
        config_dir.join(app_name).join(CONFIG_FILE)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.prefix.chars().any(char::is_whitespace) {
            return Err(ConfigError::Invalid("prefix must not contain whitespace".into()));
        }
        if self.help_id.trim().is_empty() {
            return Err(ConfigError::Invalid("help_id must not be empty".into()));
        }
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid("tick_interval_ms must be positive".into()));
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn is_operator(&self, user_id: &str) -> bool {
        self.operator_id.as_deref() == Some(user_id)
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_operator(mut self, user_id: impl Into<String>) -> Self {
        self.operator_id = Some(user_id.into());
        self
    }

    pub fn with_privileged_role(mut self, role: impl Into<String>) -> Self {
        self.privileged_roles.push(role.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let config = EngineConfig::load(dir.path().join("absent.json")).unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.prefix, "!");
        assert_eq!(config.tick_interval(), Duration::from_secs(5));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, r#"{"prefix": "?", "operator_id": "42"}"#).unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.prefix, "?");
        assert!(config.is_operator("42"));
        assert!(!config.is_operator("43"));
        assert_eq!(config.help_id, "help");
        assert!(config.strict_sessions);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE);
        let config = EngineConfig::default()
            .with_prefix(">")
            .with_privileged_role("admin");

        config.save(&path).unwrap();
        assert_eq!(EngineConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_invalid_files() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE);

        fs::write(&path, "{not json").unwrap();
        assert!(matches!(EngineConfig::load(&path), Err(ConfigError::Json(_))));

        fs::write(&path, r#"{"tick_interval_ms": 0}"#).unwrap();
        assert!(matches!(
            EngineConfig::load(&path),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_default_path() {
        let path = EngineConfig::default_path("mybot");
        assert!(path.ends_with("mybot/hark.json"));
    }
}
