//! Module injection and export calls
//!
//! A module is loaded by starting a remote thread at the target's
//! `LoadLibraryW` with a pointer to the path. The loaded base is then
//! confirmed against a fresh module snapshot.

#[cfg(windows)]
mod create;
mod injector;
pub mod path;
pub mod procedure;

#[cfg(windows)]
pub use create::{create_and_inject, CreatedTarget};
pub use injector::{InjectOptions, Injector};
pub use path::resolve_module_path;
pub use procedure::{find_export_address, find_procedure, MAX_FORWARD_DEPTH};
