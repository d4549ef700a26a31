//! Target process attachment and execution
//!
//! [`ProcessContext`] is the live handle every other component is driven
//! through. The [`RemoteTarget`] trait is the seam the injector and invoker
//! are written against, so both run unchanged over a real process or a
//! simulated one.

pub mod launch;
pub mod modules;

#[cfg(windows)]
mod context;
#[cfg(windows)]
pub mod enumerator;
#[cfg(windows)]
pub mod handle;
#[cfg(windows)]
pub mod privileges;
#[cfg(windows)]
mod threads;

#[cfg(windows)]
pub use context::{AttachOptions, ProcessContext};
#[cfg(windows)]
pub use enumerator::{find_process_by_name, ProcessEntry, ProcessEnumerator};
#[cfg(windows)]
pub use handle::{ProcessAccess, ProcessHandle};
#[cfg(windows)]
pub use launch::{LaunchOptions, LaunchedProcess};
#[cfg(windows)]
pub use modules::ModuleEnumerator;

pub use launch::{build_command_line, quote_argument};
pub use modules::{find_module_by_name, find_module_by_path};

use crate::core::types::{Address, MemoryResult, ModuleInfo, ProcessId};
use crate::memory::MemoryAccess;
use std::time::Duration;

/// Thread creation inside a target
pub trait RemoteThreads {
    /// Runs `start(parameter)` on a new thread in the target and waits for it.
    ///
    /// Returns the thread's exit code. When `timeout` elapses first the thread
    /// is left running and `RemoteExecutionTimeout` is returned.
    fn run_remote_thread(
        &self,
        start: Address,
        parameter: Address,
        timeout: Duration,
    ) -> MemoryResult<u32>;
}

/// Everything the injector and invoker need from a target
pub trait RemoteTarget: MemoryAccess + RemoteThreads {
    fn pid(&self) -> ProcessId;

    /// Loaded modules, main executable first
    fn modules(&self) -> MemoryResult<Vec<ModuleInfo>>;

    /// Address of `name` in `module` when it can be known without reading
    /// the target
    fn known_procedure(&self, _module: &str, _name: &str) -> Option<Address> {
        None
    }
}
