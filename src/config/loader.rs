//! Configuration loader for remote-mem
//!
//! Handles loading configuration from TOML files and merging with defaults.

use super::defaults::default_config;
use crate::disasm::Syntax;
use crate::inject::InjectOptions;
use crate::invoke::InvokeOptions;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Configuration error type
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_attach")]
    pub attach: AttachConfig,

    #[serde(default = "default_invoke")]
    pub invoke: InvokeConfig,

    #[serde(default = "default_inject")]
    pub inject: InjectConfig,

    #[serde(default = "default_disasm")]
    pub disasm: DisasmConfig,

    #[serde(default = "default_logging")]
    pub logging: LoggingConfig,
}

/// Attach configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachConfig {
    #[serde(default = "default_enable_debug_privilege")]
    pub enable_debug_privilege: bool,
}

/// Remote call configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvokeConfig {
    #[serde(default = "default_invoke_timeout")]
    pub timeout_ms: u64,
}

/// Injection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InjectConfig {
    #[serde(default = "default_inject_timeout")]
    pub timeout_ms: u64,
    #[serde(default = "default_resolve_path")]
    pub resolve_path: bool,
}

/// Disassembly configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisasmConfig {
    #[serde(default = "default_count")]
    pub default_count: usize,
    #[serde(default = "default_syntax")]
    pub syntax: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_file")]
    pub file: String,
}

impl Config {
    pub fn invoke_options(&self) -> InvokeOptions {
        InvokeOptions {
            timeout: Duration::from_millis(self.invoke.timeout_ms),
        }
    }

    pub fn inject_options(&self) -> InjectOptions {
        InjectOptions {
            resolve_path: self.inject.resolve_path,
            timeout: Duration::from_millis(self.inject.timeout_ms),
            ..InjectOptions::default()
        }
    }

    #[cfg(windows)]
    pub fn attach_options(&self) -> crate::process::AttachOptions {
        crate::process::AttachOptions {
            enable_debug_privilege: self.attach.enable_debug_privilege,
            ..Default::default()
        }
    }

    /// Configured syntax; unknown names fall back to MASM
    pub fn syntax(&self) -> Syntax {
        self.disasm.syntax.parse().unwrap_or_default()
    }
}

/// Configuration loader
pub struct ConfigLoader {
    config_path: PathBuf,
}

impl ConfigLoader {
    /// Creates a new configuration loader
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        ConfigLoader {
            config_path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Loads configuration from file
    pub fn load(&self) -> Result<Config, ConfigError> {
        if !self.config_path.exists() {
            return Err(ConfigError::FileNotFound(
                self.config_path.display().to_string(),
            ));
        }

        let contents = fs::read_to_string(&self.config_path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Loads configuration or returns defaults if the file is missing or unreadable
    pub fn load_or_default(&self) -> Config {
        match self.load() {
            Ok(config) => config,
            Err(ConfigError::FileNotFound(_)) => Config::default(),
            Err(e) => {
                warn!("Ignoring {}: {}", self.config_path.display(), e);
                Config::default()
            }
        }
    }

    /// Saves configuration to file
    pub fn save(&self, config: &Config) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(config)?;
        fs::write(&self.config_path, contents)?;
        Ok(())
    }
}

/// Loads configuration from the default location
pub fn load_config() -> Result<Config, ConfigError> {
    let loader = ConfigLoader::new("remote-mem.toml");
    Ok(loader.load_or_default())
}

// Default functions for serde
fn default_attach() -> AttachConfig {
    AttachConfig {
        enable_debug_privilege: default_config().attach.enable_debug_privilege,
    }
}

fn default_invoke() -> InvokeConfig {
    InvokeConfig {
        timeout_ms: default_config().invoke.timeout_ms,
    }
}

fn default_inject() -> InjectConfig {
    let defaults = default_config();
    InjectConfig {
        timeout_ms: defaults.inject.timeout_ms,
        resolve_path: defaults.inject.resolve_path,
    }
}

fn default_disasm() -> DisasmConfig {
    let defaults = default_config();
    DisasmConfig {
        default_count: defaults.disasm.default_count,
        syntax: defaults.disasm.syntax,
    }
}

fn default_logging() -> LoggingConfig {
    let defaults = default_config();
    LoggingConfig {
        level: defaults.logging.level,
        file: defaults.logging.file,
    }
}

// Individual field defaults
fn default_enable_debug_privilege() -> bool {
    default_config().attach.enable_debug_privilege
}

fn default_invoke_timeout() -> u64 {
    default_config().invoke.timeout_ms
}

fn default_inject_timeout() -> u64 {
    default_config().inject.timeout_ms
}

fn default_resolve_path() -> bool {
    default_config().inject.resolve_path
}

fn default_count() -> usize {
    default_config().disasm.default_count
}

fn default_syntax() -> String {
    default_config().disasm.syntax
}

fn default_log_level() -> String {
    default_config().logging.level
}

fn default_log_file() -> String {
    default_config().logging.file
}

impl Default for Config {
    fn default() -> Self {
        Config {
            attach: default_attach(),
            invoke: default_invoke(),
            inject: default_inject(),
            disasm: default_disasm(),
            logging: default_logging(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.attach.enable_debug_privilege);
        assert_eq!(config.invoke.timeout_ms, 5000);
        assert_eq!(config.syntax(), Syntax::Masm);
    }

    #[test]
    fn test_load_missing_file() {
        let loader = ConfigLoader::new("nonexistent.toml");
        let result = loader.load();
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_load_or_default_on_bad_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("broken.toml");
        fs::write(&config_path, "[invoke\ntimeout_ms = ").unwrap();

        let config = ConfigLoader::new(&config_path).load_or_default();
        assert_eq!(config.invoke.timeout_ms, 5000);
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let mut config = Config::default();
        config.disasm.syntax = "nasm".to_string();
        let loader = ConfigLoader::new(&config_path);

        loader.save(&config).unwrap();
        assert!(config_path.exists());

        let loaded = loader.load().unwrap();
        assert_eq!(loaded.syntax(), Syntax::Nasm);
        assert_eq!(loaded.inject.timeout_ms, config.inject.timeout_ms);
    }

    #[test]
    fn test_partial_config() {
        let toml_str = r#"
            [invoke]
            timeout_ms = 250

            [inject]
            resolve_path = false
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.invoke.timeout_ms, 250);
        assert!(!config.inject.resolve_path);
        // Check defaults are applied
        assert_eq!(config.inject.timeout_ms, 10_000);
        assert_eq!(config.disasm.default_count, 10);
    }

    #[test]
    fn test_engine_options() {
        let mut config = Config::default();
        config.invoke.timeout_ms = 1500;
        config.inject.resolve_path = false;

        assert_eq!(config.invoke_options().timeout, Duration::from_millis(1500));
        let inject = config.inject_options();
        assert!(!inject.resolve_path);
        assert!(!inject.add_to_search_order);
        assert_eq!(inject.timeout, Duration::from_millis(10_000));
    }
}
