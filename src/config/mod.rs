//! Configuration for remote-mem
//!
//! TOML settings with per-field defaults, plus conversions into the option
//! structs the engine components take.

mod defaults;
mod loader;
mod validator;

pub use defaults::{default_config, ConfigDefaults};
pub use loader::{
    load_config, AttachConfig, Config, ConfigError, ConfigLoader, DisasmConfig, InjectConfig,
    InvokeConfig, LoggingConfig,
};
pub use validator::{validate_config, ConfigValidator};

// Configuration result type
pub type ConfigResult<T> = Result<T, ConfigError>;
