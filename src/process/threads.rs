//! Remote thread execution for a live target

use super::{ProcessContext, RemoteTarget, RemoteThreads};
use crate::core::types::{Address, MemoryError, MemoryResult, ModuleInfo, ProcessArchitecture, ProcessId};
use crate::windows::bindings::kernel32::{self, WaitOutcome};
use crate::windows::types::Handle;
use std::time::Duration;
use tracing::{debug, warn};

/// INFINITE is u32::MAX, so the longest finite wait is one below it
const MAX_FINITE_WAIT_MS: u32 = u32::MAX - 1;

/// System modules mapped at the same base in every process of one bitness
const SHARED_SYSTEM_MODULES: &[&str] = &["kernel32.dll", "kernelbase.dll", "ntdll.dll"];

impl RemoteThreads for ProcessContext {
    fn run_remote_thread(
        &self,
        start: Address,
        parameter: Address,
        timeout: Duration,
    ) -> MemoryResult<u32> {
        if start.is_null() {
            return Err(MemoryError::InvalidAddress(
                "remote thread start address is null".to_string(),
            ));
        }
        let process = self.raw_handle()?;
        let pid = self.pid();

        let raw = unsafe { kernel32::create_remote_thread(process, start.as_usize(), parameter.as_usize()) }
            .map_err(|e| e.to_memory_error(pid))?;
        let thread = Handle::from_raw(raw, "CreateRemoteThread").map_err(|e| e.to_memory_error(pid))?;
        debug!("Remote thread at {} ({}) in PID {}", start, parameter, pid);

        let wait_ms = u32::try_from(timeout.as_millis())
            .unwrap_or(MAX_FINITE_WAIT_MS)
            .min(MAX_FINITE_WAIT_MS);
        match unsafe { kernel32::wait_for_single_object(thread.raw(), wait_ms) }
            .map_err(|e| e.to_memory_error(pid))?
        {
            WaitOutcome::Signaled => unsafe { kernel32::get_exit_code_thread(thread.raw()) }
                .map_err(|e| e.to_memory_error(pid)),
            WaitOutcome::TimedOut => {
                // Only the handle is closed; the thread keeps running
                warn!("Remote thread at {} still running after {} ms", start, wait_ms);
                Err(MemoryError::timeout(start, u64::from(wait_ms)))
            }
        }
    }
}

impl RemoteTarget for ProcessContext {
    fn pid(&self) -> ProcessId {
        ProcessContext::pid(self)
    }

    fn modules(&self) -> MemoryResult<Vec<ModuleInfo>> {
        super::ModuleEnumerator::new(self).enumerate()
    }

    fn known_procedure(&self, module: &str, name: &str) -> Option<Address> {
        if self.architecture() != ProcessArchitecture::host() {
            return None;
        }
        if !SHARED_SYSTEM_MODULES
            .iter()
            .any(|shared| shared.eq_ignore_ascii_case(module))
        {
            return None;
        }
        kernel32::local_proc_address(module, name).map(Address::new)
    }
}
