//! An address space simulated inside the host process
//!
//! Used to decode host-side byte slices and to exercise the engine without a
//! live target. Page protection, allocation granularity and region reporting
//! follow the same rules the OS-backed implementation sees.

use crate::core::types::{Address, MemoryError, MemoryResult, ProcessArchitecture};
use crate::memory::regions::{MemoryRegion, RegionState, RegionType};
use crate::memory::{MemoryAccess, ProtectionFlags, PAGE_SIZE};
use std::cell::RefCell;
use std::collections::BTreeMap;

const ALLOCATION_GRANULARITY: usize = 0x10000;
const FIRST_ALLOCATION: usize = 0x1000_0000;

struct Block {
    base: usize,
    data: Vec<u8>,
    pages: Vec<ProtectionFlags>,
    allocation_protection: ProtectionFlags,
    kind: RegionType,
}

impl Block {
    fn end(&self) -> usize {
        self.base + self.data.len()
    }

    fn page_index(&self, address: usize) -> usize {
        (address - self.base) / PAGE_SIZE
    }
}

#[derive(Default)]
struct AddressSpace {
    blocks: BTreeMap<usize, Block>,
    next_allocation: usize,
    cache_flushes: usize,
}

impl AddressSpace {
    fn block_at(&self, address: usize) -> Option<&Block> {
        self.blocks
            .range(..=address)
            .next_back()
            .map(|(_, block)| block)
            .filter(|block| address < block.end())
    }

    fn block_at_mut(&mut self, address: usize) -> Option<&mut Block> {
        self.blocks
            .range_mut(..=address)
            .next_back()
            .map(|(_, block)| block)
            .filter(|block| address < block.end())
    }

    fn overlaps(&self, start: usize, end: usize) -> bool {
        self.blocks
            .values()
            .any(|block| start < block.end() && block.base < end)
    }
}

/// In-process stand-in for a target's address space
pub struct BufferMemory {
    architecture: ProcessArchitecture,
    limit: usize,
    space: RefCell<AddressSpace>,
}

impl BufferMemory {
    /// An empty address space with the host's architecture
    pub fn new() -> Self {
        Self::with_architecture(ProcessArchitecture::host())
    }

    pub fn with_architecture(architecture: ProcessArchitecture) -> Self {
        let limit = if cfg!(target_pointer_width = "64") && architecture.is_64bit() {
            0x7FFF_FFFF_0000u64 as usize
        } else {
            0x7FFF_0000
        };
        BufferMemory {
            architecture,
            limit,
            space: RefCell::new(AddressSpace {
                next_allocation: FIRST_ALLOCATION,
                ..AddressSpace::default()
            }),
        }
    }

    /// Maps `bytes` at `address` as image memory with a uniform protection.
    ///
    /// The mapping is widened to whole pages; padding bytes read as zero.
    pub fn map(
        &self,
        address: Address,
        bytes: &[u8],
        protection: ProtectionFlags,
    ) -> MemoryResult<()> {
        if bytes.is_empty() {
            return Err(MemoryError::InvalidAddress(format!(
                "empty mapping at {}",
                address
            )));
        }
        let base = address.align_down(PAGE_SIZE).as_usize();
        let lead = address.as_usize() - base;
        let end = address
            .add(bytes.len())?
            .align_up(PAGE_SIZE)
            .as_usize();
        if end > self.limit {
            return Err(MemoryError::InvalidAddress(format!(
                "mapping at {} exceeds the address space",
                address
            )));
        }

        let mut space = self.space.borrow_mut();
        if space.overlaps(base, end) {
            return Err(MemoryError::InvalidAddress(format!(
                "mapping at {} overlaps an existing block",
                address
            )));
        }

        let mut data = vec![0u8; end - base];
        data[lead..lead + bytes.len()].copy_from_slice(bytes);
        let pages = vec![protection; data.len() / PAGE_SIZE];
        space.blocks.insert(
            base,
            Block {
                base,
                data,
                pages,
                allocation_protection: protection,
                kind: RegionType::Image,
            },
        );
        Ok(())
    }

    /// Number of live allocations made through [`MemoryAccess::allocate`]
    pub fn allocation_count(&self) -> usize {
        self.space
            .borrow()
            .blocks
            .values()
            .filter(|block| block.kind == RegionType::Private)
            .count()
    }

    /// Number of instruction-cache flushes requested so far
    pub fn instruction_cache_flushes(&self) -> usize {
        self.space.borrow().cache_flushes
    }
}

impl Default for BufferMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryAccess for BufferMemory {
    fn architecture(&self) -> ProcessArchitecture {
        self.architecture
    }

    fn read_partial(&self, address: Address, buffer: &mut [u8]) -> MemoryResult<usize> {
        let space = self.space.borrow();
        let mut done = 0;

        while done < buffer.len() {
            let Some(cursor) = address.as_usize().checked_add(done) else {
                break;
            };
            let Some(block) = space.block_at(cursor) else {
                break;
            };
            let page = block.page_index(cursor);
            let protection = block.pages[page];
            if !protection.is_readable() || protection.is_guard() {
                break;
            }
            let page_end = block.base + (page + 1) * PAGE_SIZE;
            let count = (buffer.len() - done).min(page_end - cursor);
            let offset = cursor - block.base;
            buffer[done..done + count].copy_from_slice(&block.data[offset..offset + count]);
            done += count;
        }

        if done == 0 && !buffer.is_empty() {
            return Err(MemoryError::InvalidAddress(format!(
                "{} is not readable",
                address
            )));
        }
        Ok(done)
    }

    fn write_raw(&self, address: Address, data: &[u8]) -> MemoryResult<()> {
        if data.is_empty() {
            return Ok(());
        }
        let end = address.add(data.len())?.as_usize();
        let mut space = self.space.borrow_mut();

        // Validate the whole range first so a failed write changes nothing
        let mut cursor = address.as_usize();
        while cursor < end {
            let block = space.block_at(cursor).ok_or_else(|| {
                MemoryError::InvalidAddress(format!("{} is not mapped", Address::new(cursor)))
            })?;
            let page = block.page_index(cursor);
            let protection = block.pages[page];
            if !protection.is_writable() || protection.is_guard() {
                return Err(MemoryError::ProtectedMemory(format!(
                    "{} has protection {}",
                    Address::new(cursor),
                    protection
                )));
            }
            cursor = block.base + (page + 1) * PAGE_SIZE;
        }

        let mut written = 0;
        while written < data.len() {
            let cursor = address.as_usize() + written;
            let block = space.block_at_mut(cursor).ok_or_else(|| {
                MemoryError::InvalidAddress(format!("{} is not mapped", Address::new(cursor)))
            })?;
            let offset = cursor - block.base;
            let count = (data.len() - written).min(block.end() - cursor);
            block.data[offset..offset + count].copy_from_slice(&data[written..written + count]);
            written += count;
        }
        Ok(())
    }

    fn allocate(&self, size: usize, protection: ProtectionFlags) -> MemoryResult<Address> {
        if size == 0 {
            return Err(MemoryError::OutOfMemory { size });
        }
        let length = Address::new(size).align_up(PAGE_SIZE).as_usize();
        let mut space = self.space.borrow_mut();

        let mut base = space.next_allocation;
        loop {
            let end = base
                .checked_add(length)
                .filter(|end| *end <= self.limit)
                .ok_or(MemoryError::OutOfMemory { size })?;
            if !space.overlaps(base, end) {
                break;
            }
            base = Address::new(end).align_up(ALLOCATION_GRANULARITY).as_usize();
        }

        space.blocks.insert(
            base,
            Block {
                base,
                data: vec![0u8; length],
                pages: vec![protection; length / PAGE_SIZE],
                allocation_protection: protection,
                kind: RegionType::Private,
            },
        );
        space.next_allocation = Address::new(base + length)
            .align_up(ALLOCATION_GRANULARITY)
            .as_usize();
        Ok(Address::new(base))
    }

    fn free(&self, address: Address) -> MemoryResult<()> {
        let mut space = self.space.borrow_mut();
        match space.blocks.get(&address.as_usize()) {
            Some(block) if block.kind == RegionType::Private => {
                space.blocks.remove(&address.as_usize());
                Ok(())
            }
            _ => Err(MemoryError::InvalidAddress(format!(
                "{} is not the base of an allocation",
                address
            ))),
        }
    }

    fn protect(
        &self,
        address: Address,
        size: usize,
        protection: ProtectionFlags,
    ) -> MemoryResult<ProtectionFlags> {
        if size == 0 {
            return Err(MemoryError::InvalidAddress(format!(
                "zero-sized protection change at {}",
                address
            )));
        }
        let start = address.align_down(PAGE_SIZE).as_usize();
        let end = address.add(size)?.align_up(PAGE_SIZE).as_usize();

        let mut space = self.space.borrow_mut();
        let block = space
            .block_at_mut(start)
            .filter(|block| end <= block.end())
            .ok_or_else(|| {
                MemoryError::InvalidAddress(format!(
                    "{} (+0x{:X}) is not inside one allocation",
                    address, size
                ))
            })?;

        let first = block.page_index(start);
        let last = block.page_index(end - 1);
        let old = block.pages[first];
        for page in &mut block.pages[first..=last] {
            *page = protection;
        }
        Ok(old)
    }

    fn query_region(&self, address: Address) -> MemoryResult<Option<MemoryRegion>> {
        let address = address.as_usize();
        if address >= self.limit {
            return Ok(None);
        }
        let page_base = address & !(PAGE_SIZE - 1);
        let space = self.space.borrow();

        if let Some(block) = space.block_at(address) {
            let first = block.page_index(page_base);
            let protection = block.pages[first];
            let run = block.pages[first..]
                .iter()
                .take_while(|p| **p == protection)
                .count();
            return Ok(Some(MemoryRegion {
                base_address: Address::new(page_base),
                allocation_base: Address::new(block.base),
                allocation_protection: block.allocation_protection,
                size: run * PAGE_SIZE,
                state: RegionState::Committed,
                protection,
                region_type: Some(block.kind),
            }));
        }

        let next_block = space
            .blocks
            .range(address..)
            .next()
            .map(|(base, _)| *base)
            .unwrap_or(self.limit)
            .min(self.limit);
        Ok(Some(MemoryRegion {
            base_address: Address::new(page_base),
            allocation_base: Address::null(),
            allocation_protection: ProtectionFlags::new(0),
            size: next_block - page_base,
            state: RegionState::Free,
            protection: ProtectionFlags::no_access(),
            region_type: None,
        }))
    }

    fn flush_instruction_cache(&self, address: Address, _size: usize) -> MemoryResult<()> {
        let mut space = self.space.borrow_mut();
        if space.block_at(address.as_usize()).is_none() {
            return Err(MemoryError::InvalidAddress(format!(
                "{} is not mapped",
                address
            )));
        }
        space.cache_flushes += 1;
        Ok(())
    }
}
