//! Memory access inside a target process
//!
//! [`MemoryAccess`] is the seam every higher-level component consumes: the
//! OS-backed implementation lives on `ProcessContext`, and [`BufferMemory`]
//! simulates an address space in-process.
//!
//! - Reads report short transfers as `PartialRead` instead of truncating
//! - Writes to non-writable pages go through a scoped [`ProtectionGuard`]
//! - Allocations can be tied to a [`RemoteAllocation`] guard
//! - [`MemoryScanner`] searches readable regions for values and patterns

pub mod alloc;
pub mod buffer;
pub mod protection;
pub mod regions;
#[cfg(windows)]
mod remote;
pub mod scanner;

pub use alloc::RemoteAllocation;
pub use buffer::BufferMemory;
pub use protection::{ProtectionFlags, ProtectionGuard};
pub use regions::{enumerate_regions, MemoryRegion, RegionEnumerator, RegionState, RegionType};
pub use scanner::{MemoryScanner, ScanOptions, ScanPattern};

use crate::core::types::{Address, MemoryError, MemoryResult, ProcessArchitecture};
use bytemuck::Pod;

/// Page size used for protection bookkeeping
pub const PAGE_SIZE: usize = 0x1000;

const STRING_CHUNK: usize = 64;

/// Primitive operations on a target address space
pub trait MemoryAccess {
    /// Instruction-set width of the target
    fn architecture(&self) -> ProcessArchitecture;

    /// Reads up to `buffer.len()` bytes and returns how many were copied.
    ///
    /// Fails when not even the first byte is readable.
    fn read_partial(&self, address: Address, buffer: &mut [u8]) -> MemoryResult<usize>;

    /// Writes without touching page protection
    fn write_raw(&self, address: Address, data: &[u8]) -> MemoryResult<()>;

    fn allocate(&self, size: usize, protection: ProtectionFlags) -> MemoryResult<Address>;

    /// Releases an allocation by its base address
    fn free(&self, address: Address) -> MemoryResult<()>;

    /// Changes protection and returns the previous protection of the first page
    fn protect(
        &self,
        address: Address,
        size: usize,
        protection: ProtectionFlags,
    ) -> MemoryResult<ProtectionFlags>;

    /// Region covering `address`, or `None` past the end of the address space
    fn query_region(&self, address: Address) -> MemoryResult<Option<MemoryRegion>>;

    fn flush_instruction_cache(&self, _address: Address, _size: usize) -> MemoryResult<()> {
        Ok(())
    }

    /// Fills `buffer` completely or fails with `PartialRead`
    fn read_into(&self, address: Address, buffer: &mut [u8]) -> MemoryResult<()> {
        if buffer.is_empty() {
            return Ok(());
        }
        let read = self.read_partial(address, buffer)?;
        if read != buffer.len() {
            return Err(MemoryError::partial_read(address, buffer.len(), read));
        }
        Ok(())
    }

    fn read(&self, address: Address, length: usize) -> MemoryResult<Vec<u8>> {
        let mut buffer = vec![0u8; length];
        self.read_into(address, &mut buffer)?;
        Ok(buffer)
    }

    /// Writes `data`, lifting write protection region by region when needed.
    ///
    /// Each protection change is restored before the next region is touched,
    /// whether or not the write succeeded.
    fn write(&self, address: Address, data: &[u8]) -> MemoryResult<()> {
        if data.is_empty() {
            return Ok(());
        }
        let end = address.add(data.len())?;
        let mut cursor = address;

        while cursor < end {
            let region = self
                .query_region(cursor)?
                .filter(MemoryRegion::is_committed)
                .ok_or_else(|| {
                    MemoryError::InvalidAddress(format!("{} is not committed memory", cursor))
                })?;

            let chunk_end = region.end_address().min(end);
            let offset = cursor.as_usize() - address.as_usize();
            let len = chunk_end.as_usize() - cursor.as_usize();
            let chunk = &data[offset..offset + len];

            if region.protection.is_guard() {
                return Err(MemoryError::ProtectedMemory(format!(
                    "{} is a guard page",
                    cursor
                )));
            }

            if region.protection.is_writable() {
                self.write_raw(cursor, chunk)?;
            } else {
                let writable = region.protection.writable_equivalent().ok_or_else(|| {
                    MemoryError::ProtectedMemory(format!(
                        "{} has protection {} that cannot be made writable",
                        cursor, region.protection
                    ))
                })?;
                let guard = ProtectionGuard::change(self, cursor, len, writable)?;
                let written = self.write_raw(cursor, chunk);
                let restored = guard.restore();
                written?;
                restored?;
            }

            cursor = chunk_end;
        }

        Ok(())
    }
}

/// Typed and string helpers layered on [`MemoryAccess`]
pub trait MemoryExt: MemoryAccess {
    fn read_value<T: Pod>(&self, address: Address) -> MemoryResult<T> {
        let mut value: T = bytemuck::Zeroable::zeroed();
        self.read_into(address, bytemuck::bytes_of_mut(&mut value))?;
        Ok(value)
    }

    fn write_value<T: Pod>(&self, address: Address, value: &T) -> MemoryResult<()> {
        self.write(address, bytemuck::bytes_of(value))
    }

    /// Reads a pointer-sized value using the target's pointer width
    fn read_pointer(&self, address: Address) -> MemoryResult<u64> {
        match self.architecture() {
            ProcessArchitecture::X86 => self.read_value::<u32>(address).map(u64::from),
            ProcessArchitecture::X64 => self.read_value::<u64>(address),
        }
    }

    /// Reads a NUL-terminated narrow string of at most `max_len` bytes
    fn read_c_string(&self, address: Address, max_len: usize) -> MemoryResult<String> {
        let bytes = read_terminated(self, address, max_len, 1)?;
        Ok(String::from_utf8(bytes)?)
    }

    /// Reads a NUL-terminated UTF-16 string of at most `max_chars` units
    fn read_wide_string(&self, address: Address, max_chars: usize) -> MemoryResult<String> {
        let bytes = read_terminated(self, address, max_chars.saturating_mul(2), 2)?;
        let units: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        Ok(String::from_utf16_lossy(&units))
    }

    /// Writes `value` as NUL-terminated UTF-16
    fn write_wide_string(&self, address: Address, value: &str) -> MemoryResult<()> {
        self.write(address, &encode_wide(value))
    }

    fn can_read(&self, address: Address) -> bool {
        matches!(self.query_region(address), Ok(Some(r)) if r.is_readable())
    }

    fn can_write(&self, address: Address) -> bool {
        matches!(self.query_region(address), Ok(Some(r)) if r.is_writable())
    }

    fn can_execute(&self, address: Address) -> bool {
        matches!(self.query_region(address), Ok(Some(r)) if r.is_executable())
    }

    fn is_guard(&self, address: Address) -> bool {
        matches!(self.query_region(address), Ok(Some(r)) if r.is_guard())
    }
}

impl<M: MemoryAccess + ?Sized> MemoryExt for M {}

/// NUL-terminated UTF-16LE bytes for `value`
pub fn encode_wide(value: &str) -> Vec<u8> {
    value
        .encode_utf16()
        .chain(Some(0))
        .flat_map(u16::to_le_bytes)
        .collect()
}

/// Reads `unit`-sized elements until an all-zero unit, without the terminator
fn read_terminated<M: MemoryAccess + ?Sized>(
    memory: &M,
    address: Address,
    max_bytes: usize,
    unit: usize,
) -> MemoryResult<Vec<u8>> {
    let mut out = Vec::new();
    let mut chunk = [0u8; STRING_CHUNK];

    while out.len() < max_bytes {
        let want = STRING_CHUNK.min(max_bytes - out.len());
        let at = address.add(out.len())?;
        let got = memory.read_partial(at, &mut chunk[..want])?;
        // Only whole units are meaningful
        let got = got - got % unit;
        if got == 0 {
            return Err(MemoryError::partial_read(at, unit, 0));
        }

        for piece in chunk[..got].chunks_exact(unit) {
            if piece.iter().all(|b| *b == 0) {
                return Ok(out);
            }
            out.extend_from_slice(piece);
        }
    }

    Ok(out)
}
