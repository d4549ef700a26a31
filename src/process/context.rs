//! Attachment to a single target process

use super::enumerator::find_process_by_name;
use super::handle::{ProcessAccess, ProcessHandle};
use super::privileges::enable_debug_privilege;
use crate::core::types::{
    MemoryError, MemoryResult, PrivilegeLevel, ProcessArchitecture, ProcessId,
};
use crate::windows::bindings::kernel32;
use std::fmt;
use tracing::{debug, info};
use winapi::um::winnt::HANDLE;

/// Options for attaching to a process
#[derive(Debug, Clone)]
pub struct AttachOptions {
    /// Try to enable SeDebugPrivilege before opening the target
    pub enable_debug_privilege: bool,
    /// Rights requested on the process handle
    pub access: ProcessAccess,
}

impl Default for AttachOptions {
    fn default() -> Self {
        Self {
            enable_debug_privilege: true,
            access: ProcessAccess::ENGINE,
        }
    }
}

/// A live attachment to one target process.
///
/// Every other component takes a context explicitly. After [`release`]
/// every operation fails with `InvalidContext`.
///
/// [`release`]: ProcessContext::release
pub struct ProcessContext {
    handle: Option<ProcessHandle>,
    pid: ProcessId,
    name: String,
    architecture: ProcessArchitecture,
    privilege: PrivilegeLevel,
}

impl ProcessContext {
    /// Attaches to the first process whose executable name matches
    pub fn attach_by_name(name: &str) -> MemoryResult<Self> {
        Self::attach_by_name_with(name, &AttachOptions::default())
    }

    pub fn attach_by_name_with(name: &str, options: &AttachOptions) -> MemoryResult<Self> {
        let entry = find_process_by_name(name)?
            .ok_or_else(|| MemoryError::ProcessNotFound(name.to_string()))?;
        let mut context = Self::attach_with(entry.pid, options)?;
        context.name = entry.name;
        Ok(context)
    }

    /// Attaches to a process by ID
    pub fn attach(pid: ProcessId) -> MemoryResult<Self> {
        Self::attach_with(pid, &AttachOptions::default())
    }

    pub fn attach_with(pid: ProcessId, options: &AttachOptions) -> MemoryResult<Self> {
        let privilege = acquire_privilege(options.enable_debug_privilege);
        let handle = ProcessHandle::open(pid, options.access)?;
        let context = Self::from_handle(handle, format!("PID {}", pid), privilege)?;
        info!(
            "Attached to PID {} ({}, {:?} privilege)",
            pid, context.architecture, context.privilege
        );
        Ok(context)
    }

    /// Builds a context around an already-open handle
    pub(crate) fn from_handle(
        handle: ProcessHandle,
        name: String,
        privilege: PrivilegeLevel,
    ) -> MemoryResult<Self> {
        let pid = handle.pid();
        let architecture = detect_architecture(&handle)?;
        Ok(ProcessContext {
            handle: Some(handle),
            pid,
            name,
            architecture,
            privilege,
        })
    }

    /// Closes the handle. Calling it again does nothing.
    pub fn release(&mut self) {
        if let Some(handle) = self.handle.take() {
            debug!("Releasing PID {}", handle.pid());
            drop(handle);
        }
    }

    pub fn is_released(&self) -> bool {
        self.handle.is_none()
    }

    pub fn pid(&self) -> ProcessId {
        self.pid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn architecture(&self) -> ProcessArchitecture {
        self.architecture
    }

    pub fn privilege(&self) -> PrivilegeLevel {
        self.privilege
    }

    /// Raw handle, or `InvalidContext` once released
    pub(crate) fn raw_handle(&self) -> MemoryResult<HANDLE> {
        self.handle
            .as_ref()
            .map(ProcessHandle::raw)
            .ok_or_else(|| {
                MemoryError::InvalidContext(format!("context for PID {} was released", self.pid))
            })
    }
}

impl fmt::Debug for ProcessContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessContext")
            .field("pid", &self.pid)
            .field("name", &self.name)
            .field("architecture", &self.architecture)
            .field("privilege", &self.privilege)
            .field("released", &self.is_released())
            .finish()
    }
}

pub(crate) fn acquire_privilege(requested: bool) -> PrivilegeLevel {
    if !requested {
        return PrivilegeLevel::Standard;
    }
    match enable_debug_privilege() {
        Ok(()) => PrivilegeLevel::Debug,
        Err(e) => {
            debug!("Continuing without SeDebugPrivilege: {}", e);
            PrivilegeLevel::Standard
        }
    }
}

fn detect_architecture(handle: &ProcessHandle) -> MemoryResult<ProcessArchitecture> {
    let pid = handle.pid();
    let target_wow64 =
        unsafe { kernel32::is_wow64_process(handle.raw()) }.map_err(|e| e.to_memory_error(pid))?;

    let architecture = if target_wow64 {
        ProcessArchitecture::X86
    } else if ProcessArchitecture::host().is_64bit()
        || kernel32::current_process_is_wow64().map_err(|e| e.to_memory_error(pid))?
    {
        // A native process on a 64-bit OS
        ProcessArchitecture::X64
    } else {
        ProcessArchitecture::X86
    };

    if architecture.is_64bit() && !ProcessArchitecture::host().is_64bit() {
        return Err(MemoryError::InvalidContext(format!(
            "PID {} is 64-bit and cannot be driven from a 32-bit host",
            pid
        )));
    }
    Ok(architecture)
}
