//! Target-side address type with hex parsing

use super::error::{MemoryError, MemoryResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// An address inside the target's address space
///
/// Never dereferenced locally; every access goes through a `MemoryAccess`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address(pub usize);

impl Address {
    /// Creates a new address from a usize value
    pub const fn new(value: usize) -> Self {
        Address(value)
    }

    /// The null address
    pub const fn null() -> Self {
        Address(0)
    }

    pub const fn is_null(&self) -> bool {
        self.0 == 0
    }

    pub const fn is_aligned(&self, alignment: usize) -> bool {
        alignment != 0 && self.0 % alignment == 0
    }

    /// Aligns down to a power-of-two boundary
    pub const fn align_down(&self, alignment: usize) -> Self {
        if alignment == 0 {
            return *self;
        }
        Address(self.0 & !(alignment - 1))
    }

    /// Aligns up to a power-of-two boundary, saturating at the top of the address space
    pub const fn align_up(&self, alignment: usize) -> Self {
        if alignment == 0 {
            return *self;
        }
        match self.0.checked_add(alignment - 1) {
            Some(v) => Address(v & !(alignment - 1)),
            None => Address(usize::MAX & !(alignment - 1)),
        }
    }

    /// Adds an offset, wrapping on overflow
    pub const fn offset(&self, offset: isize) -> Self {
        Address(self.0.wrapping_add_signed(offset))
    }

    /// Adds a byte count, returning `None` on overflow
    pub const fn checked_add(&self, bytes: usize) -> Option<Self> {
        match self.0.checked_add(bytes) {
            Some(v) => Some(Address(v)),
            None => None,
        }
    }

    /// Adds a byte count, failing with `InvalidAddress` on overflow
    pub fn add(&self, bytes: usize) -> MemoryResult<Self> {
        self.checked_add(bytes).ok_or_else(|| {
            MemoryError::InvalidAddress(format!("{} + 0x{:X} overflows", self, bytes))
        })
    }

    pub const fn as_usize(&self) -> usize {
        self.0
    }

    pub const fn as_u64(&self) -> u64 {
        self.0 as u64
    }
}

impl FromStr for Address {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();

        let value = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            usize::from_str_radix(hex, 16)
        } else if let Some(hex) = s.strip_prefix('$') {
            usize::from_str_radix(hex, 16)
        } else if s.chars().any(|c| c.is_ascii_alphabetic()) {
            usize::from_str_radix(s, 16)
        } else {
            s.parse::<usize>().or_else(|_| usize::from_str_radix(s, 16))
        };

        value
            .map(Address::new)
            .map_err(|_| MemoryError::InvalidAddress(s.to_string()))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}", self.0)
    }
}

impl fmt::LowerHex for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016x}", self.0)
    }
}

impl fmt::UpperHex for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}", self.0)
    }
}

impl From<usize> for Address {
    fn from(value: usize) -> Self {
        Address::new(value)
    }
}

impl TryFrom<u64> for Address {
    type Error = MemoryError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        usize::try_from(value)
            .map(Address::new)
            .map_err(|_| MemoryError::InvalidAddress(format!("0x{:X} exceeds host pointer width", value)))
    }
}
