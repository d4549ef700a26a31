//! Core type definitions
//!
//! Address wrapper, process and module snapshots, and the error type shared by
//! every component.

mod address;
mod error;
mod process_info;

pub use address::Address;
pub use error::{MemoryError, MemoryResult};
pub use process_info::{ModuleInfo, PrivilegeLevel, ProcessArchitecture};

// Common type aliases
pub type ProcessId = u32;
pub type ThreadId = u32;
