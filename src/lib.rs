//! remote-mem library for working inside another Windows process
//!
//! Attach to or launch a target, read, write and scan its memory, walk its
//! modules and regions, parse PE export and import tables, load modules into
//! it, call functions on remote threads, and disassemble its code.
//!
//! Everything above the OS layer is written against [`memory::MemoryAccess`]
//! and [`process::RemoteTarget`], so it also runs over the in-process
//! [`memory::BufferMemory`].

pub mod config;
pub mod core;
pub mod disasm;
pub mod inject;
pub mod invoke;
pub mod memory;
pub mod pe;
pub mod process;
#[cfg(windows)]
pub mod windows;

// Re-export main types from core module
pub use core::types::{
    Address, MemoryError, MemoryResult, ModuleInfo, PrivilegeLevel, ProcessArchitecture, ProcessId,
    ThreadId,
};

pub use disasm::{disassemble_bytes, DisassembledInstruction, Disassembler};
pub use inject::{InjectOptions, Injector};
pub use invoke::{CallDescriptor, CallResult, CallingConvention, InvokeOptions, RemoteInvoker};
pub use memory::{
    BufferMemory, MemoryAccess, MemoryExt, MemoryRegion, MemoryScanner, ProtectionFlags, ScanPattern,
};
pub use pe::{ExportDirectory, ExportEntry, ImportDirectory, ImportThunk, Symbol};
pub use process::{RemoteTarget, RemoteThreads};

#[cfg(windows)]
pub use inject::{create_and_inject, CreatedTarget};
#[cfg(windows)]
pub use process::{AttachOptions, LaunchOptions, LaunchedProcess, ProcessContext};
