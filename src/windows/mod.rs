//! Windows API layer
//!
//! Thin wrappers around the Win32 calls the engine needs. All unsafe FFI is
//! contained here; failures come back as [`WinError`] carrying the captured
//! last-error code, and callers map them onto engine errors.

pub mod bindings;
pub mod types;
pub mod utils;

pub use bindings::{kernel32, psapi};
pub use types::Handle;
pub use utils::{ErrorCode, WinError};
