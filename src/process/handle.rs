//! Process handle wrapper with explicit access rights

use crate::core::types::{MemoryError, MemoryResult, ProcessId};
use crate::windows::bindings::kernel32;
use crate::windows::types::Handle;
use crate::windows::utils::ErrorCode;
use std::fmt;
use winapi::um::winnt::HANDLE;

/// Access rights for process handles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessAccess {
    value: u32,
}

impl ProcessAccess {
    pub const TERMINATE: Self = Self { value: 0x0001 };
    pub const CREATE_THREAD: Self = Self { value: 0x0002 };
    pub const VM_OPERATION: Self = Self { value: 0x0008 };
    pub const VM_READ: Self = Self { value: 0x0010 };
    pub const VM_WRITE: Self = Self { value: 0x0020 };
    pub const QUERY_INFORMATION: Self = Self { value: 0x0400 };
    pub const QUERY_LIMITED_INFORMATION: Self = Self { value: 0x1000 };
    pub const SYNCHRONIZE: Self = Self { value: 0x0010_0000 };
    pub const ALL_ACCESS: Self = Self { value: 0x001F_FFFF };

    /// What memory access, module enumeration and remote threads need
    pub const ENGINE: Self = Self::CREATE_THREAD
        .union(Self::VM_OPERATION)
        .union(Self::VM_READ)
        .union(Self::VM_WRITE)
        .union(Self::QUERY_INFORMATION)
        .union(Self::SYNCHRONIZE);

    pub const fn union(self, other: Self) -> Self {
        Self {
            value: self.value | other.value,
        }
    }

    pub const fn contains(&self, other: Self) -> bool {
        self.value & other.value == other.value
    }

    pub const fn value(&self) -> u32 {
        self.value
    }
}

/// An open handle to a target process
pub struct ProcessHandle {
    handle: Handle,
    pid: ProcessId,
    access: ProcessAccess,
}

impl ProcessHandle {
    /// Opens `pid` with the requested rights
    pub fn open(pid: ProcessId, access: ProcessAccess) -> MemoryResult<Self> {
        let raw = kernel32::open_process(pid, access.value()).map_err(|e| match e.code() {
            ErrorCode::AccessDenied => MemoryError::access_denied(pid, e.to_string()),
            ErrorCode::InvalidParameter => MemoryError::ProcessNotFound(format!("PID {}", pid)),
            _ => e.to_memory_error(pid),
        })?;
        let handle = Handle::from_raw(raw, "OpenProcess").map_err(|e| e.to_memory_error(pid))?;
        Ok(ProcessHandle {
            handle,
            pid,
            access,
        })
    }

    /// Wraps a handle the caller already owns (e.g. from CreateProcessW)
    pub fn from_owned(handle: Handle, pid: ProcessId, access: ProcessAccess) -> Self {
        ProcessHandle {
            handle,
            pid,
            access,
        }
    }

    pub fn pid(&self) -> ProcessId {
        self.pid
    }

    /// Raw handle, valid while `self` lives
    pub fn raw(&self) -> HANDLE {
        self.handle.raw()
    }

    pub fn access(&self) -> ProcessAccess {
        self.access
    }
}

impl fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("pid", &self.pid)
            .field("access", &format_args!("0x{:X}", self.access.value()))
            .finish()
    }
}
