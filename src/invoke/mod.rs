//! Calling functions inside a target
//!
//! A call is compiled into a small position-independent stub, written into
//! the target next to a result slot, and run on a remote thread.

pub mod codegen;
mod invoker;

pub use invoker::{InvokeOptions, RemoteInvoker};

use crate::core::types::{Address, MemoryError, MemoryResult, ProcessArchitecture};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Argument-passing contract of the called function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallingConvention {
    /// The platform default: cdecl on x86, the Win64 ABI on x64
    #[default]
    Default,
    /// Stack, right to left, caller cleans
    Cdecl,
    /// Stack, right to left, callee cleans
    Stdcall,
    /// First argument in ecx, rest as stdcall
    Thiscall,
    /// First two arguments in ecx and edx, rest as stdcall
    Fastcall,
    /// rcx, rdx, r8, r9, then stack with shadow space
    Win64,
}

impl CallingConvention {
    /// The convention actually emitted for `architecture`.
    ///
    /// Every tag collapses to Win64 on x64; Win64 is rejected on x86.
    pub fn resolve(self, architecture: ProcessArchitecture) -> MemoryResult<Self> {
        match (architecture, self) {
            (ProcessArchitecture::X64, _) => Ok(CallingConvention::Win64),
            (ProcessArchitecture::X86, CallingConvention::Default) => Ok(CallingConvention::Cdecl),
            (ProcessArchitecture::X86, CallingConvention::Win64) => Err(
                MemoryError::UnsupportedOperation("the Win64 convention on an x86 target".to_string()),
            ),
            (ProcessArchitecture::X86, other) => Ok(other),
        }
    }

    /// Leading arguments passed in registers
    pub fn register_args(self) -> usize {
        match self {
            CallingConvention::Win64 => 4,
            CallingConvention::Fastcall => 2,
            CallingConvention::Thiscall => 1,
            _ => 0,
        }
    }
}

impl fmt::Display for CallingConvention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CallingConvention::Default => "default",
            CallingConvention::Cdecl => "cdecl",
            CallingConvention::Stdcall => "stdcall",
            CallingConvention::Thiscall => "thiscall",
            CallingConvention::Fastcall => "fastcall",
            CallingConvention::Win64 => "win64",
        };
        f.write_str(name)
    }
}

impl FromStr for CallingConvention {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "default" => Ok(CallingConvention::Default),
            "cdecl" => Ok(CallingConvention::Cdecl),
            "stdcall" => Ok(CallingConvention::Stdcall),
            "thiscall" => Ok(CallingConvention::Thiscall),
            "fastcall" => Ok(CallingConvention::Fastcall),
            "win64" | "x64" => Ok(CallingConvention::Win64),
            other => Err(MemoryError::UnsupportedOperation(format!(
                "unknown calling convention \"{}\"",
                other
            ))),
        }
    }
}

/// One call to make inside the target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallDescriptor {
    pub target: Address,
    /// Pointer-sized argument values, in declaration order
    pub args: Vec<u64>,
    pub convention: CallingConvention,
}

impl CallDescriptor {
    pub fn new(target: Address) -> Self {
        CallDescriptor {
            target,
            args: Vec::new(),
            convention: CallingConvention::Default,
        }
    }

    pub fn arg(mut self, value: u64) -> Self {
        self.args.push(value);
        self
    }

    pub fn args(mut self, values: impl IntoIterator<Item = u64>) -> Self {
        self.args.extend(values);
        self
    }

    pub fn convention(mut self, convention: CallingConvention) -> Self {
        self.convention = convention;
        self
    }
}

/// What a remote call produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallResult {
    /// rax on x64; edx:eax on x86
    pub return_value: u64,
    pub thread_exit_code: u32,
}

impl CallResult {
    /// Low 32 bits, for functions returning an int or a 32-bit pointer
    pub fn return_u32(&self) -> u32 {
        self.return_value as u32
    }
}

impl fmt::Display for CallResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (0x{:X}), thread exit code {}",
            self.return_value, self.return_value, self.thread_exit_code
        )
    }
}
