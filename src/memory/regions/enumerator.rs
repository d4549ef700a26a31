//! Region walk over a target's address space

use crate::core::types::{Address, MemoryResult};
use crate::memory::regions::MemoryRegion;
use crate::memory::MemoryAccess;

/// Walks regions from address 0 upward, one record per OS-reported region
///
/// A fresh enumerator restarts the walk; nothing is cached between passes.
pub struct RegionEnumerator<'a, M: MemoryAccess + ?Sized> {
    memory: &'a M,
    next_address: Option<Address>,
}

impl<'a, M: MemoryAccess + ?Sized> RegionEnumerator<'a, M> {
    pub fn new(memory: &'a M) -> Self {
        Self::starting_at(memory, Address::null())
    }

    /// Starts the walk at an arbitrary address
    pub fn starting_at(memory: &'a M, address: Address) -> Self {
        RegionEnumerator {
            memory,
            next_address: Some(address),
        }
    }
}

impl<M: MemoryAccess + ?Sized> Iterator for RegionEnumerator<'_, M> {
    type Item = MemoryResult<MemoryRegion>;

    fn next(&mut self) -> Option<Self::Item> {
        let address = self.next_address.take()?;

        match self.memory.query_region(address) {
            Ok(Some(region)) => {
                let end = region.base_address.checked_add(region.size);
                // Stop on zero-sized or wrapping regions rather than looping forever
                self.next_address = end.filter(|end| *end > address);
                Some(Ok(region))
            }
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

/// Collects a full snapshot of the target's regions
pub fn enumerate_regions<M: MemoryAccess + ?Sized>(memory: &M) -> MemoryResult<Vec<MemoryRegion>> {
    RegionEnumerator::new(memory).collect()
}
