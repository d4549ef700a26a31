//! Page protection flags and scoped protection changes

use crate::core::types::{Address, MemoryError, MemoryResult};
use crate::memory::MemoryAccess;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Page protection flags, as the OS reports them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProtectionFlags {
    value: u32,
}

impl ProtectionFlags {
    pub const PAGE_NOACCESS: u32 = 0x01;
    pub const PAGE_READONLY: u32 = 0x02;
    pub const PAGE_READWRITE: u32 = 0x04;
    pub const PAGE_WRITECOPY: u32 = 0x08;
    pub const PAGE_EXECUTE: u32 = 0x10;
    pub const PAGE_EXECUTE_READ: u32 = 0x20;
    pub const PAGE_EXECUTE_READWRITE: u32 = 0x40;
    pub const PAGE_EXECUTE_WRITECOPY: u32 = 0x80;
    pub const PAGE_GUARD: u32 = 0x100;
    pub const PAGE_NOCACHE: u32 = 0x200;
    pub const PAGE_WRITECOMBINE: u32 = 0x400;

    const BASE_MASK: u32 = 0xFF;

    pub const fn new(value: u32) -> Self {
        ProtectionFlags { value }
    }

    pub const fn no_access() -> Self {
        ProtectionFlags::new(Self::PAGE_NOACCESS)
    }

    pub const fn read_only() -> Self {
        ProtectionFlags::new(Self::PAGE_READONLY)
    }

    pub const fn read_write() -> Self {
        ProtectionFlags::new(Self::PAGE_READWRITE)
    }

    pub const fn execute_read() -> Self {
        ProtectionFlags::new(Self::PAGE_EXECUTE_READ)
    }

    pub const fn execute_read_write() -> Self {
        ProtectionFlags::new(Self::PAGE_EXECUTE_READWRITE)
    }

    const fn base(&self) -> u32 {
        self.value & Self::BASE_MASK
    }

    /// Check if protection allows reading
    pub const fn is_readable(&self) -> bool {
        let base = self.base();
        base != 0 && base != Self::PAGE_NOACCESS && base != Self::PAGE_EXECUTE
    }

    /// Check if protection allows writing
    pub const fn is_writable(&self) -> bool {
        (self.value
            & (Self::PAGE_READWRITE
                | Self::PAGE_WRITECOPY
                | Self::PAGE_EXECUTE_READWRITE
                | Self::PAGE_EXECUTE_WRITECOPY))
            != 0
    }

    /// Check if protection allows execution
    pub const fn is_executable(&self) -> bool {
        (self.value
            & (Self::PAGE_EXECUTE
                | Self::PAGE_EXECUTE_READ
                | Self::PAGE_EXECUTE_READWRITE
                | Self::PAGE_EXECUTE_WRITECOPY))
            != 0
    }

    pub const fn is_guard(&self) -> bool {
        (self.value & Self::PAGE_GUARD) != 0
    }

    pub const fn is_no_cache(&self) -> bool {
        (self.value & Self::PAGE_NOCACHE) != 0
    }

    /// The closest protection that permits writing, keeping the execute bit
    /// and cache modifiers. `None` for no-access and guard pages.
    pub const fn writable_equivalent(&self) -> Option<Self> {
        if self.is_guard() {
            return None;
        }
        let modifiers = self.value & !Self::BASE_MASK;
        let base = match self.base() {
            Self::PAGE_READONLY => Self::PAGE_READWRITE,
            Self::PAGE_EXECUTE | Self::PAGE_EXECUTE_READ => Self::PAGE_EXECUTE_READWRITE,
            Self::PAGE_READWRITE
            | Self::PAGE_WRITECOPY
            | Self::PAGE_EXECUTE_READWRITE
            | Self::PAGE_EXECUTE_WRITECOPY => self.base(),
            _ => return None,
        };
        Some(ProtectionFlags::new(base | modifiers))
    }

    /// Get the raw protection value
    pub const fn raw(&self) -> u32 {
        self.value
    }

    fn format_string(&self) -> String {
        let base = match self.base() {
            0 => "-",
            Self::PAGE_NOACCESS => "NOACCESS",
            Self::PAGE_READONLY => "R",
            Self::PAGE_READWRITE => "RW",
            Self::PAGE_WRITECOPY => "WC",
            Self::PAGE_EXECUTE => "X",
            Self::PAGE_EXECUTE_READ => "RX",
            Self::PAGE_EXECUTE_READWRITE => "RWX",
            Self::PAGE_EXECUTE_WRITECOPY => "WCX",
            _ => "UNKNOWN",
        };

        let mut flags = String::from(base);
        if self.is_guard() {
            flags.push_str("+G");
        }
        if self.is_no_cache() {
            flags.push_str("+NC");
        }
        flags
    }
}

impl std::fmt::Display for ProtectionFlags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.format_string())
    }
}

impl From<u32> for ProtectionFlags {
    fn from(value: u32) -> Self {
        ProtectionFlags::new(value)
    }
}

/// A protection change that is undone when the guard goes away
///
/// `restore` surfaces the restore error; dropping the guard restores too but
/// can only log a failure.
pub struct ProtectionGuard<'a, M: MemoryAccess + ?Sized> {
    memory: &'a M,
    address: Address,
    size: usize,
    original: ProtectionFlags,
    active: bool,
}

impl<'a, M: MemoryAccess + ?Sized> ProtectionGuard<'a, M> {
    /// Applies `protection` to `[address, address + size)` and remembers the previous value
    pub fn change(
        memory: &'a M,
        address: Address,
        size: usize,
        protection: ProtectionFlags,
    ) -> MemoryResult<Self> {
        let original = memory.protect(address, size, protection).map_err(|e| {
            MemoryError::ProtectedMemory(format!(
                "cannot change protection of {} (+0x{:X}) to {}: {}",
                address, size, protection, e
            ))
        })?;

        debug!(%address, size, from = %original, to = %protection, "protection changed");

        Ok(ProtectionGuard {
            memory,
            address,
            size,
            original,
            active: true,
        })
    }

    /// Protection in effect before the change
    pub fn original(&self) -> ProtectionFlags {
        self.original
    }

    /// Puts the original protection back
    pub fn restore(mut self) -> MemoryResult<()> {
        self.active = false;
        self.memory
            .protect(self.address, self.size, self.original)
            .map(|_| ())
    }
}

impl<M: MemoryAccess + ?Sized> Drop for ProtectionGuard<'_, M> {
    fn drop(&mut self) {
        if !self.active {
            return;
        }
        if let Err(e) = self.memory.protect(self.address, self.size, self.original) {
            warn!(address = %self.address, error = %e, "failed to restore protection");
        }
    }
}
