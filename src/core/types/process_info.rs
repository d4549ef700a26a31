//! Process and module snapshot types

use super::Address;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Target instruction-set width
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessArchitecture {
    X86,
    X64,
}

impl ProcessArchitecture {
    /// Architecture of the running host build
    pub const fn host() -> Self {
        if cfg!(target_pointer_width = "64") {
            ProcessArchitecture::X64
        } else {
            ProcessArchitecture::X86
        }
    }

    /// Returns the pointer size for this architecture
    pub const fn pointer_size(&self) -> usize {
        match self {
            ProcessArchitecture::X86 => 4,
            ProcessArchitecture::X64 => 8,
        }
    }

    pub const fn is_64bit(&self) -> bool {
        matches!(self, ProcessArchitecture::X64)
    }

    /// Bit width as the decoder expects it
    pub const fn bits(&self) -> u32 {
        match self {
            ProcessArchitecture::X86 => 32,
            ProcessArchitecture::X64 => 64,
        }
    }
}

impl fmt::Display for ProcessArchitecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessArchitecture::X86 => write!(f, "x86"),
            ProcessArchitecture::X64 => write!(f, "x64"),
        }
    }
}

/// Privilege the host held when the context was created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrivilegeLevel {
    /// SeDebugPrivilege was enabled for the host
    Debug,
    /// Plain user rights
    Standard,
}

/// A loaded module, as seen by one enumeration pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleInfo {
    pub name: String,
    pub path: PathBuf,
    pub base_address: Address,
    pub size: usize,
}

impl ModuleInfo {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>, base_address: Address, size: usize) -> Self {
        ModuleInfo {
            name: name.into(),
            path: path.into(),
            base_address,
            size,
        }
    }

    /// Gets the end address of the module
    pub fn end_address(&self) -> Address {
        Address::new(self.base_address.as_usize().saturating_add(self.size))
    }

    /// Checks if an address is within this module
    pub fn contains_address(&self, address: Address) -> bool {
        address >= self.base_address && address < self.end_address()
    }

    /// Case-insensitive match on the short name, with or without extension
    pub fn matches_name(&self, name: &str) -> bool {
        if self.name.eq_ignore_ascii_case(name) {
            return true;
        }
        match Path::new(&self.name).file_stem() {
            Some(stem) => stem.to_string_lossy().eq_ignore_ascii_case(name),
            None => false,
        }
    }

    /// Case-insensitive match on the full path
    pub fn matches_path(&self, path: &Path) -> bool {
        self.path
            .to_string_lossy()
            .eq_ignore_ascii_case(&path.to_string_lossy())
    }
}

impl fmt::Display for ModuleInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} (0x{:X} bytes)", self.base_address, self.name, self.size)
    }
}
