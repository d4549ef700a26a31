//! Virtual-memory region snapshots
//!
//! Each region is an immutable copy of what the OS reported for one range of
//! pages with uniform attributes.

pub mod enumerator;

pub use enumerator::{enumerate_regions, RegionEnumerator};

use crate::core::types::Address;
use crate::memory::ProtectionFlags;
use serde::{Deserialize, Serialize};
use std::fmt;

/// State of a memory region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegionState {
    /// Memory is committed and accessible
    Committed,
    /// Memory is reserved but not committed
    Reserved,
    /// Memory is free/unallocated
    Free,
}

impl RegionState {
    pub const MEM_COMMIT: u32 = 0x1000;
    pub const MEM_RESERVE: u32 = 0x2000;
    pub const MEM_FREE: u32 = 0x10000;

    pub fn from_raw(state: u32) -> Option<Self> {
        match state {
            Self::MEM_COMMIT => Some(RegionState::Committed),
            Self::MEM_RESERVE => Some(RegionState::Reserved),
            Self::MEM_FREE => Some(RegionState::Free),
            _ => None,
        }
    }
}

/// Type of memory region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegionType {
    /// Private memory
    Private,
    /// Mapped memory (file mapping)
    Mapped,
    /// Image memory (executable/DLL)
    Image,
}

impl RegionType {
    pub const MEM_PRIVATE: u32 = 0x20000;
    pub const MEM_MAPPED: u32 = 0x40000;
    pub const MEM_IMAGE: u32 = 0x1000000;

    pub fn from_raw(kind: u32) -> Option<Self> {
        match kind {
            Self::MEM_PRIVATE => Some(RegionType::Private),
            Self::MEM_MAPPED => Some(RegionType::Mapped),
            Self::MEM_IMAGE => Some(RegionType::Image),
            _ => None,
        }
    }
}

/// One OS-reported region
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryRegion {
    pub base_address: Address,
    pub allocation_base: Address,
    pub allocation_protection: ProtectionFlags,
    pub size: usize,
    pub state: RegionState,
    pub protection: ProtectionFlags,
    /// `None` for free regions
    pub region_type: Option<RegionType>,
}

impl MemoryRegion {
    pub fn end_address(&self) -> Address {
        Address::new(self.base_address.as_usize().saturating_add(self.size))
    }

    pub fn contains(&self, address: Address) -> bool {
        address >= self.base_address && address < self.end_address()
    }

    pub fn is_committed(&self) -> bool {
        self.state == RegionState::Committed
    }

    pub fn is_readable(&self) -> bool {
        self.is_committed() && self.protection.is_readable() && !self.protection.is_guard()
    }

    pub fn is_writable(&self) -> bool {
        self.is_committed() && self.protection.is_writable() && !self.protection.is_guard()
    }

    pub fn is_executable(&self) -> bool {
        self.is_committed() && self.protection.is_executable()
    }

    pub fn is_guard(&self) -> bool {
        self.protection.is_guard()
    }
}

impl fmt::Display for MemoryRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.region_type {
            Some(RegionType::Private) => "private",
            Some(RegionType::Mapped) => "mapped",
            Some(RegionType::Image) => "image",
            None => "-",
        };
        let state = match self.state {
            RegionState::Committed => "commit",
            RegionState::Reserved => "reserve",
            RegionState::Free => "free",
        };
        write!(
            f,
            "{} 0x{:X} {} {} {}",
            self.base_address, self.size, state, self.protection, kind
        )
    }
}
