//! Memory access for a live target process

use super::{MemoryAccess, MemoryRegion, ProtectionFlags, RegionState, RegionType};
use crate::core::types::{Address, MemoryError, MemoryResult, ProcessArchitecture};
use crate::process::ProcessContext;
use crate::windows::bindings::kernel32;
use crate::windows::utils::ErrorCode;
use tracing::debug;
use winapi::um::winnt::MEMORY_BASIC_INFORMATION;

impl MemoryAccess for ProcessContext {
    fn architecture(&self) -> ProcessArchitecture {
        ProcessContext::architecture(self)
    }

    fn read_partial(&self, address: Address, buffer: &mut [u8]) -> MemoryResult<usize> {
        if buffer.is_empty() {
            return Ok(0);
        }
        let process = self.raw_handle()?;
        let read = unsafe { kernel32::read_process_memory(process, address.as_usize(), buffer) }
            .map_err(|e| match e.code() {
                ErrorCode::PartialCopy => MemoryError::InvalidAddress(address.to_string()),
                _ => e.to_memory_error(self.pid()),
            })?;
        if read == 0 {
            return Err(MemoryError::InvalidAddress(address.to_string()));
        }
        Ok(read)
    }

    fn write_raw(&self, address: Address, data: &[u8]) -> MemoryResult<()> {
        if data.is_empty() {
            return Ok(());
        }
        let process = self.raw_handle()?;
        let written = unsafe { kernel32::write_process_memory(process, address.as_usize(), data) }
            .map_err(|e| match e.code() {
                ErrorCode::PartialCopy | ErrorCode::NoAccess => {
                    MemoryError::ProtectedMemory(address.to_string())
                }
                _ => e.to_memory_error(self.pid()),
            })?;
        if written != data.len() {
            return Err(MemoryError::ProtectedMemory(format!(
                "{}: wrote {} of {} bytes",
                address,
                written,
                data.len()
            )));
        }
        Ok(())
    }

    fn allocate(&self, size: usize, protection: ProtectionFlags) -> MemoryResult<Address> {
        if size == 0 {
            return Err(MemoryError::OutOfMemory { size });
        }
        let process = self.raw_handle()?;
        let base = unsafe { kernel32::virtual_alloc_ex(process, size, protection.raw()) }.map_err(
            |e| match e.code() {
                ErrorCode::AccessDenied => e.to_memory_error(self.pid()),
                _ => MemoryError::OutOfMemory { size },
            },
        )?;
        debug!("Allocated {} bytes at 0x{:X} in PID {}", size, base, self.pid());
        Ok(Address::new(base))
    }

    fn free(&self, address: Address) -> MemoryResult<()> {
        let process = self.raw_handle()?;
        unsafe { kernel32::virtual_free_ex(process, address.as_usize()) }.map_err(|e| {
            match e.code() {
                ErrorCode::AccessDenied => e.to_memory_error(self.pid()),
                _ => MemoryError::InvalidAddress(address.to_string()),
            }
        })?;
        debug!("Freed {} in PID {}", address, self.pid());
        Ok(())
    }

    fn protect(
        &self,
        address: Address,
        size: usize,
        protection: ProtectionFlags,
    ) -> MemoryResult<ProtectionFlags> {
        let process = self.raw_handle()?;
        let old = unsafe {
            kernel32::virtual_protect_ex(process, address.as_usize(), size, protection.raw())
        }
        .map_err(|e| e.to_memory_error(self.pid()))?;
        Ok(ProtectionFlags::new(old))
    }

    fn query_region(&self, address: Address) -> MemoryResult<Option<MemoryRegion>> {
        let process = self.raw_handle()?;
        let info = unsafe { kernel32::virtual_query_ex(process, address.as_usize()) }
            .map_err(|e| e.to_memory_error(self.pid()))?;
        Ok(info.map(region_from_info))
    }

    fn flush_instruction_cache(&self, address: Address, size: usize) -> MemoryResult<()> {
        let process = self.raw_handle()?;
        unsafe { kernel32::flush_instruction_cache(process, address.as_usize(), size) }
            .map_err(|e| e.to_memory_error(self.pid()))
    }
}

fn region_from_info(info: MEMORY_BASIC_INFORMATION) -> MemoryRegion {
    let state = RegionState::from_raw(info.State).unwrap_or(RegionState::Free);
    MemoryRegion {
        base_address: Address::new(info.BaseAddress as usize),
        allocation_base: Address::new(info.AllocationBase as usize),
        allocation_protection: ProtectionFlags::new(info.AllocationProtect),
        size: info.RegionSize,
        state,
        protection: ProtectionFlags::new(info.Protect),
        region_type: match state {
            RegionState::Free => None,
            _ => RegionType::from_raw(info.Type),
        },
    }
}
