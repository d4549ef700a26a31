//! Error types for remote process operations

use std::fmt;
use thiserror::Error;

use crate::disasm::DisassembledInstruction;

/// Main error type for remote process operations
#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("Process not found: {0}")]
    ProcessNotFound(String),

    #[error("Access denied to process {pid}: {reason}")]
    AccessDenied { pid: u32, reason: String },

    #[error("Invalid process context: {0}")]
    InvalidContext(String),

    #[error("Invalid memory address: {0}")]
    InvalidAddress(String),

    #[error("Partial read at {address}: requested {requested} bytes, read {read}")]
    PartialRead {
        address: String,
        requested: usize,
        read: usize,
    },

    #[error("Protected memory: {0}")]
    ProtectedMemory(String),

    #[error("Out of memory: could not allocate {size} bytes in target")]
    OutOfMemory { size: usize },

    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),

    #[error("PE parse error: {0}")]
    PeParse(String),

    #[error("Module not found: {0}")]
    ModuleNotFound(String),

    #[error("Export not found: {module}!{export}")]
    ExportNotFound { module: String, export: String },

    #[error("Injection failed: {0}")]
    InjectionFailure(String),

    #[error("Remote execution at {address} timed out after {timeout_ms} ms")]
    RemoteExecutionTimeout { address: String, timeout_ms: u64 },

    #[error("Undecodable instruction at {address} after {} decoded instructions", decoded.len())]
    UndecodableInstruction {
        address: String,
        decoded: Vec<DisassembledInstruction>,
    },

    #[error("Failed to launch {path}: {reason}")]
    LaunchFailed { path: String, reason: String },

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[cfg(windows)]
    #[error("Windows API error: {0}")]
    WindowsApiError(#[from] ::windows::core::Error),

    #[error("Windows API: {0}")]
    WindowsApi(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("UTF-8 conversion error: {0}")]
    Utf8Error(#[from] std::string::FromUtf8Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Result type alias for remote process operations
pub type MemoryResult<T> = Result<T, MemoryError>;

impl MemoryError {
    /// Creates a new Windows API error with the last error code
    #[cfg(windows)]
    pub fn last_os_error() -> Self {
        MemoryError::WindowsApiError(::windows::core::Error::from_win32())
    }

    /// Creates an access denied error for a process
    pub fn access_denied(pid: u32, reason: impl Into<String>) -> Self {
        MemoryError::AccessDenied {
            pid,
            reason: reason.into(),
        }
    }

    /// Creates a partial read error
    pub fn partial_read(address: impl fmt::Display, requested: usize, read: usize) -> Self {
        MemoryError::PartialRead {
            address: address.to_string(),
            requested,
            read,
        }
    }

    /// Creates an export not found error
    pub fn export_not_found(module: impl Into<String>, export: impl fmt::Display) -> Self {
        MemoryError::ExportNotFound {
            module: module.into(),
            export: export.to_string(),
        }
    }

    /// Creates a remote execution timeout error
    pub fn timeout(address: impl fmt::Display, timeout_ms: u64) -> Self {
        MemoryError::RemoteExecutionTimeout {
            address: address.to_string(),
            timeout_ms,
        }
    }

    /// Creates a launch failure error
    pub fn launch_failed(path: impl fmt::Display, reason: impl Into<String>) -> Self {
        MemoryError::LaunchFailed {
            path: path.to_string(),
            reason: reason.into(),
        }
    }

    /// True for the remote-execution timeout kind
    pub fn is_timeout(&self) -> bool {
        matches!(self, MemoryError::RemoteExecutionTimeout { .. })
    }
}
