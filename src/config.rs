//! Configuration for pyrunner.
//!
//! This module provides:
//! - TOML configuration file loading from `~/.pyrunner/config.toml`
//! - Environment and command line overrides
//! - Validation of values the run loop depends on
//!
//! # Configuration File
//!
//! ```toml
//! [runner]
//! interpreter = "python3"
//! args = ["-u"]
//! source_file = "code.py"
//! scratch_root = "temp"
//! input_timeout_ms = 100
//! idle_sleep_ms = 10
//!
//! [server]
//! host = "0.0.0.0"
//! port = 3480
//! log_level = "info"
//! ```
//!
//! Every field is optional. The `PORT` environment variable overrides
//! `server.port`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Child process settings
    pub runner: RunnerConfig,
    /// Listener settings
    pub server: ServerConfig,
}

/// How each run is executed
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Interpreter executable
    pub interpreter: String,
    /// Arguments placed before the source file path
    pub args: Vec<String>,
    /// File name the source is written to inside the session directory
    pub source_file: String,
    /// Directory holding all session directories
    pub scratch_root: PathBuf,
    /// Silence on stdout longer than this is taken as a blocked read
    pub input_timeout_ms: u64,
    /// Pause between polls when nothing happened
    pub idle_sleep_ms: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            interpreter: "python3".to_string(),
            args: vec!["-u".to_string()],
            source_file: "code.py".to_string(),
            scratch_root: PathBuf::from("temp"),
            input_timeout_ms: 100,
            idle_sleep_ms: 10,
        }
    }
}

impl RunnerConfig {
    pub fn input_timeout(&self) -> Duration {
        Duration::from_millis(self.input_timeout_ms)
    }

    pub fn idle_sleep(&self) -> Duration {
        Duration::from_millis(self.idle_sleep_ms)
    }

    /// Scratch root as an absolute path, relative roots resolved against the working directory
    pub fn scratch_dir(&self) -> io::Result<PathBuf> {
        if self.scratch_root.is_absolute() {
            Ok(self.scratch_root.clone())
        } else {
            Ok(std::env::current_dir()?.join(&self.scratch_root))
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interpreter.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "runner.interpreter",
                reason: "must not be empty".to_string(),
            });
        }
        let plain_name = Path::new(&self.source_file)
            .file_name()
            .map(|name| name == self.source_file.as_str())
            .unwrap_or(false);
        if !plain_name {
            return Err(ConfigError::Invalid {
                field: "runner.source_file",
                reason: format!("'{}' is not a plain file name", self.source_file),
            });
        }
        if self.input_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "runner.input_timeout_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.idle_sleep_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "runner.idle_sleep_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

/// Listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Default log filter when `RUST_LOG` is unset
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3480,
            log_level: "info".to_string(),
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Config {
    /// Load `~/.pyrunner/config.toml`, falling back to defaults
    pub fn load() -> Self {
        let mut config = match Self::get_config_path() {
            Some(path) if path.exists() => match Self::load_from(&path) {
                Ok(config) => config,
                Err(e) => {
                    warn!("{}; using defaults", e);
                    Self::default()
                }
            },
            _ => Self::default(),
        };
        config.apply_env();
        config
    }

    /// Load a specific file. Missing fields take their defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Apply environment overrides (`PORT`)
    pub fn apply_env(&mut self) {
        if let Ok(port) = std::env::var("PORT") {
            match port.parse() {
                Ok(port) => self.server.port = port,
                Err(_) => warn!("Ignoring invalid PORT value: {}", port),
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.runner.validate()
    }

    /// Get config file path
    fn get_config_path() -> Option<PathBuf> {
        home_dir().map(|home| home.join(".pyrunner").join("config.toml"))
    }
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.runner.interpreter, "python3");
        assert_eq!(config.runner.args, vec!["-u".to_string()]);
        assert_eq!(config.runner.source_file, "code.py");
        assert_eq!(config.runner.input_timeout(), Duration::from_millis(100));
        assert_eq!(config.runner.idle_sleep(), Duration::from_millis(10));
        assert_eq!(config.server.bind_addr(), "0.0.0.0:3480");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let text = "[runner]\ninterpreter = \"sh\"\n\n[server]\nport = 9000\n";
        let config = Config::parse(text).unwrap();
        assert_eq!(config.runner.interpreter, "sh");
        assert_eq!(config.runner.input_timeout_ms, 100);
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "0.0.0.0");
    }

    #[test]
    fn test_load_from_reports_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[runner\n").unwrap();
        assert!(matches!(Config::load_from(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_load_from_missing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing.toml");
        assert!(matches!(Config::load_from(&path), Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_validation() {
        let mut runner = RunnerConfig::default();
        runner.source_file = "../escape.py".to_string();
        assert!(matches!(
            runner.validate(),
            Err(ConfigError::Invalid { field: "runner.source_file", .. })
        ));

        let mut runner = RunnerConfig::default();
        runner.input_timeout_ms = 0;
        assert!(runner.validate().is_err());

        let mut runner = RunnerConfig::default();
        runner.interpreter = "  ".to_string();
        assert!(runner.validate().is_err());
    }

    #[test]
    fn test_scratch_dir_is_absolute() {
        let runner = RunnerConfig::default();
        assert!(runner.scratch_dir().unwrap().is_absolute());
        assert!(runner.scratch_dir().unwrap().ends_with("temp"));
    }
}
