//! Default configuration values for remote-mem

use serde::{Deserialize, Serialize};

/// Default configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigDefaults {
    pub attach: AttachDefaults,
    pub invoke: InvokeDefaults,
    pub inject: InjectDefaults,
    pub disasm: DisasmDefaults,
    pub logging: LoggingDefaults,
}

/// Default attach configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachDefaults {
    pub enable_debug_privilege: bool,
}

/// Default remote call configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvokeDefaults {
    pub timeout_ms: u64,
}

/// Default injection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InjectDefaults {
    pub timeout_ms: u64,
    pub resolve_path: bool,
}

/// Default disassembly configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisasmDefaults {
    pub default_count: usize,
    pub syntax: String,
}

/// Default logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingDefaults {
    pub level: String,
    pub file: String,
}

/// Returns the default configuration
pub fn default_config() -> ConfigDefaults {
    ConfigDefaults {
        attach: AttachDefaults {
            enable_debug_privilege: true,
        },
        invoke: InvokeDefaults { timeout_ms: 5000 },
        inject: InjectDefaults {
            timeout_ms: 10_000,
            resolve_path: true,
        },
        disasm: DisasmDefaults {
            default_count: 10,
            syntax: "masm".to_string(),
        },
        logging: LoggingDefaults {
            level: "info".to_string(),
            file: "remote-mem.log".to_string(),
        },
    }
}
