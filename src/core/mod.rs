//! Core module containing fundamental types for remote-mem
//!
//! Address handling, process and module snapshots, and error types.

pub mod types;

pub use types::{Address, MemoryError, MemoryResult, ModuleInfo, ProcessArchitecture};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const AUTHORS: &str = env!("CARGO_PKG_AUTHORS");
