//! Integration tests for region walks

use remote_mem::memory::{enumerate_regions, RegionEnumerator, RegionState, RegionType};
use remote_mem::{Address, BufferMemory, MemoryAccess, ProtectionFlags};

#[test]
fn test_walk_reports_images_and_allocations() {
    let memory = BufferMemory::new();
    let image = Address::new(0x6000_0000);
    memory
        .map(image, &[0x4D, 0x5A], ProtectionFlags::execute_read())
        .unwrap();
    let private = memory.allocate(0x2000, ProtectionFlags::read_write()).unwrap();

    let regions = enumerate_regions(&memory).unwrap();
    for pair in regions.windows(2) {
        assert_eq!(pair[0].end_address(), pair[1].base_address);
    }

    let mapped = regions.iter().find(|r| r.contains(image)).unwrap();
    assert_eq!(mapped.region_type, Some(RegionType::Image));
    assert!(mapped.is_executable());
    assert_eq!(mapped.size, 0x1000);

    let owned = regions.iter().find(|r| r.contains(private)).unwrap();
    assert_eq!(owned.region_type, Some(RegionType::Private));
    assert_eq!(owned.size, 0x2000);
    assert!(owned.is_writable());

    let free = regions.iter().find(|r| r.state == RegionState::Free).unwrap();
    assert_eq!(free.region_type, None);
    assert!(!free.is_readable());
}

#[test]
fn test_committed_filter() {
    let memory = BufferMemory::new();
    let a = memory.allocate(0x1000, ProtectionFlags::read_write()).unwrap();
    let b = memory.allocate(0x1000, ProtectionFlags::read_only()).unwrap();

    let committed: Vec<_> = RegionEnumerator::new(&memory)
        .filter_map(Result::ok)
        .filter(|r| r.is_committed())
        .collect();
    let bases: Vec<_> = committed.iter().map(|r| r.base_address).collect();
    assert_eq!(bases, vec![a, b]);
}

#[test]
fn test_walk_sees_later_changes() {
    let memory = BufferMemory::new();
    let a = memory.allocate(0x1000, ProtectionFlags::read_write()).unwrap();
    let before = enumerate_regions(&memory).unwrap();

    memory.protect(a, 0x1000, ProtectionFlags::read_only()).unwrap();
    let after = enumerate_regions(&memory).unwrap();

    assert_eq!(before.len(), after.len());
    let region = after.iter().find(|r| r.base_address == a).unwrap();
    assert_eq!(region.protection, ProtectionFlags::read_only());
    assert_eq!(region.allocation_protection, ProtectionFlags::read_write());
}

#[test]
fn test_region_display() {
    let memory = BufferMemory::new();
    let a = memory.allocate(0x1000, ProtectionFlags::read_write()).unwrap();
    let region = memory.query_region(a).unwrap().unwrap();
    let text = region.to_string();
    assert!(text.contains("commit"));
    assert!(text.contains("private"));
}
