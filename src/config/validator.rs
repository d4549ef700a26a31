//! Configuration validator for remote-mem
//!
//! Validates configuration values to ensure they are within acceptable ranges.

use super::loader::{Config, ConfigError, DisasmConfig, InjectConfig, InvokeConfig, LoggingConfig};
use crate::disasm::Syntax;

const MAX_TIMEOUT_MS: u64 = 600_000;
const MAX_INSTRUCTION_COUNT: usize = 10_000;

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validates the entire configuration
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        Self::validate_invoke(&config.invoke)?;
        Self::validate_inject(&config.inject)?;
        Self::validate_disasm(&config.disasm)?;
        Self::validate_logging(&config.logging)?;
        Ok(())
    }

    fn validate_timeout(section: &str, timeout_ms: u64) -> Result<(), ConfigError> {
        if timeout_ms == 0 || timeout_ms > MAX_TIMEOUT_MS {
            return Err(ConfigError::Invalid(format!(
                "{} timeout must be between 1 and {} ms, got {}",
                section, MAX_TIMEOUT_MS, timeout_ms
            )));
        }
        Ok(())
    }

    fn validate_invoke(invoke: &InvokeConfig) -> Result<(), ConfigError> {
        Self::validate_timeout("Invoke", invoke.timeout_ms)
    }

    fn validate_inject(inject: &InjectConfig) -> Result<(), ConfigError> {
        Self::validate_timeout("Inject", inject.timeout_ms)
    }

    fn validate_disasm(disasm: &DisasmConfig) -> Result<(), ConfigError> {
        if disasm.default_count == 0 || disasm.default_count > MAX_INSTRUCTION_COUNT {
            return Err(ConfigError::Invalid(format!(
                "Default instruction count must be between 1 and {}",
                MAX_INSTRUCTION_COUNT
            )));
        }

        if disasm.syntax.parse::<Syntax>().is_err() {
            return Err(ConfigError::Invalid(format!(
                "Unknown disassembly syntax: {}",
                disasm.syntax
            )));
        }

        Ok(())
    }

    fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&logging.level.to_lowercase().as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Invalid log level: {}. Must be one of: {:?}",
                logging.level, valid_levels
            )));
        }

        if logging.file.is_empty() {
            return Err(ConfigError::Invalid(
                "Log file path cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

/// Validates a configuration
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    ConfigValidator::validate(config)
}
