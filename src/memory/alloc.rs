//! Remote allocations released on drop

use crate::core::types::{Address, MemoryError, MemoryResult};
use crate::memory::{MemoryAccess, ProtectionFlags};
use tracing::{debug, warn};

/// Memory allocated in the target and owned by the caller
///
/// Freed when dropped unless [`leak`](Self::leak) hands ownership to the target.
pub struct RemoteAllocation<'a, M: MemoryAccess + ?Sized> {
    memory: &'a M,
    base: Address,
    size: usize,
    owned: bool,
}

impl<'a, M: MemoryAccess + ?Sized> RemoteAllocation<'a, M> {
    pub fn new(memory: &'a M, size: usize, protection: ProtectionFlags) -> MemoryResult<Self> {
        if size == 0 {
            return Err(MemoryError::OutOfMemory { size });
        }
        let base = memory.allocate(size, protection)?;
        debug!(%base, size, %protection, "remote allocation");
        Ok(RemoteAllocation {
            memory,
            base,
            size,
            owned: true,
        })
    }

    /// Allocates and fills with `data` in one step
    pub fn with_data(memory: &'a M, data: &[u8], protection: ProtectionFlags) -> MemoryResult<Self> {
        let allocation = Self::new(memory, data.len(), protection)?;
        memory.write(allocation.base, data)?;
        Ok(allocation)
    }

    pub fn base(&self) -> Address {
        self.base
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Frees now and reports the outcome
    pub fn free(mut self) -> MemoryResult<()> {
        self.owned = false;
        self.memory.free(self.base)
    }

    /// Gives up ownership; the memory stays allocated in the target
    pub fn leak(mut self) -> Address {
        self.owned = false;
        warn!(base = %self.base, size = self.size, "leaking remote allocation");
        self.base
    }
}

impl<M: MemoryAccess + ?Sized> Drop for RemoteAllocation<'_, M> {
    fn drop(&mut self) {
        if !self.owned {
            return;
        }
        if let Err(e) = self.memory.free(self.base) {
            warn!(base = %self.base, error = %e, "failed to free remote allocation");
        }
    }
}
