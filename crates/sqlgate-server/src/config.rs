//! Configuration system for the SQLGate server
//!
//! Loads configuration from:
//! 1. config.yaml - operational settings (port, policy path, extractor mode, logging)
//! 2. .env file - secrets (API keys)
//!
//! Environment variables always override config.yaml values.

use serde::{Deserialize, Serialize};
use sqlgate_policy::Role;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

/// Intent extractor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractorConfig {
    /// Extraction mode: "semantic" (LLM primary with pattern fallback) or
    /// "pattern" (deterministic only)
    pub mode: String,

    /// Model used by the semantic strategy
    pub model: String,

    /// Bound on each semantic extraction call, in seconds
    pub timeout_secs: u64,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            mode: "pattern".to_string(),
            model: "gpt-4o-mini".to_string(),
            timeout_secs: 10,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error) or module-specific
    pub level: String,

    /// Output format: pretty, json, compact
    pub format: String,

    /// Output destination: stdout, file, both
    pub output: String,

    /// Directory for log files
    pub directory: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            output: "stdout".to_string(),
            directory: "./logs".to_string(),
        }
    }
}

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    /// Path to the permission policy document
    pub policy_path: String,

    #[serde(default)]
    pub extractor: ExtractorConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Known users and their roles, consumed by the static identity
    /// resolver. A real deployment would resolve identities from the
    /// directory service instead.
    #[serde(default)]
    pub users: HashMap<String, Role>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            policy_path: "policy.yaml".to_string(),
            extractor: ExtractorConfig::default(),
            logging: LoggingConfig::default(),
            users: HashMap::new(),
        }
    }
}

impl Config {
    /// Load configuration from YAML file with environment variable overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = serde_yaml::from_str(&contents)?;

        if let Ok(host) = std::env::var("SQLGATE_SERVER_HOST") {
            config.server.host = host;
        }
        if let Ok(port) = std::env::var("SQLGATE_SERVER_PORT") {
            if let Ok(port_num) = port.parse() {
                config.server.port = port_num;
            }
        }

        if let Ok(path) = std::env::var("SQLGATE_POLICY_PATH") {
            config.policy_path = path;
        }
        if let Ok(mode) = std::env::var("SQLGATE_EXTRACTOR_MODE") {
            config.extractor.mode = mode;
        }

        if let Ok(level) = std::env::var("RUST_LOG") {
            config.logging.level = level;
        }
        if let Ok(format) = std::env::var("LOG_FORMAT") {
            config.logging.format = format;
        }
        if let Ok(output) = std::env::var("LOG_OUTPUT") {
            config.logging.output = output;
        }
        if let Ok(dir) = std::env::var("LOG_DIR") {
            config.logging.directory = dir;
        }

        Ok(config)
    }

    /// Get OpenAI API key from environment (must be in .env)
    pub fn get_openai_api_key() -> Result<String, ConfigError> {
        std::env::var("OPENAI_API_KEY")
            .map_err(|_| ConfigError::MissingEnvVar("OPENAI_API_KEY".to_string()))
    }

    /// Set logging environment variables for the logging module
    pub fn apply_logging_env(&self) {
        std::env::set_var("RUST_LOG", &self.logging.level);
        std::env::set_var("LOG_FORMAT", &self.logging.format);
        std::env::set_var("LOG_OUTPUT", &self.logging.output);
        std::env::set_var("LOG_DIR", &self.logging.directory);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.policy_path, "policy.yaml");
        assert_eq!(config.extractor.mode, "pattern");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_malformed_config_is_error() {
        // A file that exists but does not parse must surface an error, not
        // fall back to defaults.
        let temp_file = std::env::temp_dir().join("test_sqlgate_config_bad.yaml");
        std::fs::write(&temp_file, "server: [not: a map").unwrap();

        assert!(matches!(
            Config::load(&temp_file),
            Err(ConfigError::Yaml(_))
        ));
        std::fs::remove_file(&temp_file).ok();
    }

    #[test]
    fn test_missing_config_is_not_found() {
        let missing = std::env::temp_dir().join("test_sqlgate_config_missing.yaml");
        match Config::load(&missing) {
            Err(ConfigError::Io(err)) => {
                assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
            }
            other => panic!("expected io error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_env_var_override() {
        std::env::set_var("SQLGATE_SERVER_PORT", "9090");
        std::env::set_var("SQLGATE_EXTRACTOR_MODE", "semantic");

        let config_yaml = r#"
server:
  host: "127.0.0.1"
  port: 8080
policy_path: "policy.yaml"
extractor:
  mode: "pattern"
  model: "gpt-4o-mini"
  timeout_secs: 10
logging:
  level: "info"
  format: "pretty"
  output: "stdout"
  directory: "./logs"
users:
  "4": student
  "7": teacher
"#;
        let temp_file = std::env::temp_dir().join("test_sqlgate_config.yaml");
        std::fs::write(&temp_file, config_yaml).unwrap();

        let config = Config::load(&temp_file).unwrap();
        assert_eq!(config.server.port, 9090); // Overridden
        assert_eq!(config.extractor.mode, "semantic"); // Overridden
        assert_eq!(config.users.get("4"), Some(&Role::Student));

        std::env::remove_var("SQLGATE_SERVER_PORT");
        std::env::remove_var("SQLGATE_EXTRACTOR_MODE");
        std::fs::remove_file(temp_file).ok();
    }
}
