//! Integration tests for import tables in mapped images and files

mod common;

use common::{DllBuilder, IMPORT_RVA};
use remote_mem::memory::MemoryAccess;
use remote_mem::pe::{
    parse_imports, parse_imports_at, parse_imports_from_file, parse_imports_in_memory,
    set_import_function, MappedImage,
};
use remote_mem::{
    Address, BufferMemory, MemoryError, ModuleInfo, ProcessArchitecture, ProtectionFlags, Symbol,
};
use std::io::Write;

const BASE: usize = 0x6500_0000;

fn app(architecture: ProcessArchitecture) -> DllBuilder {
    DllBuilder::new(architecture, "app.dll")
        .import("KERNEL32.dll", &["LoadLibraryW", "GetProcAddress"])
        .import("WS2_32.dll", &["#23", "#115"])
}

fn mapped(architecture: ProcessArchitecture, image: &[u8], protection: ProtectionFlags) -> BufferMemory {
    let memory = BufferMemory::with_architecture(architecture);
    memory.map(Address::new(BASE), image, protection).unwrap();
    memory
}

#[test]
fn test_imports_by_name_and_ordinal_x64() {
    let image = app(ProcessArchitecture::X64).build_mapped();
    let memory = mapped(ProcessArchitecture::X64, &image, ProtectionFlags::read_only());

    let imports = parse_imports_at(&memory, Address::new(BASE), "app.dll").unwrap();
    assert!(imports.is_present());
    assert_eq!(imports.len(), 2);
    assert_eq!(imports.thunk_count(), 4);

    let kernel32 = imports.find_module("kernel32").unwrap();
    assert_eq!(kernel32.module, "KERNEL32.dll");
    let names: Vec<_> = kernel32.thunks.iter().map(|t| t.symbol.clone()).collect();
    assert_eq!(
        names,
        vec![
            Symbol::Name("LoadLibraryW".to_string()),
            Symbol::Name("GetProcAddress".to_string())
        ]
    );
    assert_eq!(kernel32.thunks[1].hint, Some(1));
    assert_eq!(kernel32.thunks[1].iat_rva, kernel32.first_thunk + 8);

    let winsock = imports.find_module("ws2_32.dll").unwrap();
    assert!(winsock.thunks.iter().all(|t| t.by_ordinal() && t.hint.is_none()));
    assert!(imports.find("WS2_32", &Symbol::Ordinal(115)).is_some());
    assert!(imports.find("WS2_32", &Symbol::Ordinal(116)).is_none());
}

#[test]
fn test_imports_pe32() {
    let image = app(ProcessArchitecture::X86).build_mapped();
    let memory = mapped(ProcessArchitecture::X86, &image, ProtectionFlags::read_only());
    let module = ModuleInfo::new("app.dll", "C:\\app\\app.dll", Address::new(BASE), image.len());

    let imports = parse_imports_in_memory(&memory, &module).unwrap();
    let thunk = imports.find("kernel32.dll", &Symbol::Name("GetProcAddress".into())).unwrap();
    // 32-bit thunks are four bytes apart
    assert_eq!(thunk.iat_rva, imports.descriptors[0].first_thunk + 4);
    assert!(imports.find("ws2_32", &Symbol::Ordinal(23)).is_some());
}

#[test]
fn test_file_and_memory_agree() {
    let builder = app(ProcessArchitecture::X64);
    let mapped_image = builder.build_mapped();
    let memory = mapped(ProcessArchitecture::X64, &mapped_image, ProtectionFlags::read_only());
    let from_memory = parse_imports_at(&memory, Address::new(BASE), "app.dll").unwrap();

    let mut file = tempfile::Builder::new().suffix(".dll").tempfile().unwrap();
    file.write_all(&builder.build_file()).unwrap();
    let from_file = parse_imports_from_file(file.path()).unwrap();

    assert_eq!(from_file.descriptors, from_memory.descriptors);
}

#[test]
fn test_names_read_from_iat_without_lookup_table() {
    let image = app(ProcessArchitecture::X64).without_lookup_tables().build_mapped();
    let memory = mapped(ProcessArchitecture::X64, &image, ProtectionFlags::read_only());

    let imports = parse_imports_at(&memory, Address::new(BASE), "app.dll").unwrap();
    assert_eq!(imports.descriptors[0].original_first_thunk, 0);
    assert!(imports.find("kernel32", &Symbol::Name("LoadLibraryW".into())).is_some());
}

#[test]
fn test_image_without_imports() {
    let image = DllBuilder::new(ProcessArchitecture::X64, "plain.dll")
        .export("Alpha", 0x2000)
        .build_mapped();
    let memory = mapped(ProcessArchitecture::X64, &image, ProtectionFlags::read_only());

    let imports = parse_imports_at(&memory, Address::new(BASE), "plain.dll").unwrap();
    assert!(!imports.is_present());
    assert!(imports.is_empty());
}

#[test]
fn test_thunk_name_outside_image() {
    let mut image = app(ProcessArchitecture::X64).build_mapped();
    // Point the first lookup entry past SizeOfImage
    let at = IMPORT_RVA as usize;
    let lookup = u32::from_le_bytes([image[at], image[at + 1], image[at + 2], image[at + 3]]) as usize;
    image[lookup..lookup + 8].copy_from_slice(&0x10_0000u64.to_le_bytes());
    let memory = mapped(ProcessArchitecture::X64, &image, ProtectionFlags::read_only());

    let result = parse_imports_at(&memory, Address::new(BASE), "app.dll");
    assert!(matches!(result, Err(MemoryError::PeParse(_))));
}

#[test]
fn test_patch_import_slot() {
    let image = app(ProcessArchitecture::X64).build_mapped();
    let memory = mapped(ProcessArchitecture::X64, &image, ProtectionFlags::read_only());
    let base = Address::new(BASE);

    let imports = parse_imports_at(&memory, base, "app.dll").unwrap();
    let thunk = imports
        .find("kernel32", &Symbol::Name("GetProcAddress".into()))
        .unwrap()
        .clone();

    let hook = Address::new(0x7FF0_5678);
    let previous = set_import_function(&memory, base, &thunk, hook).unwrap();
    assert_eq!(previous, thunk.function);

    let slot = thunk.slot_address(base).unwrap();
    assert_eq!(memory.read(slot, 8).unwrap(), hook.as_u64().to_le_bytes());
    // Page protection is back to what the image had
    assert_eq!(
        memory.query_region(slot).unwrap().unwrap().protection,
        ProtectionFlags::read_only()
    );

    let again = parse_imports_at(&memory, base, "app.dll").unwrap();
    let patched = again.find("kernel32", &Symbol::Name("GetProcAddress".into())).unwrap();
    assert_eq!(patched.function, hook.as_u64());
    // The lookup table still names the import
    assert_eq!(patched.symbol, thunk.symbol);
}

#[test]
#[cfg(target_pointer_width = "64")]
fn test_patch_rejects_wide_address_on_x86() {
    let image = app(ProcessArchitecture::X86).build_mapped();
    let memory = mapped(ProcessArchitecture::X86, &image, ProtectionFlags::read_write());
    let imports = parse_imports_at(&memory, Address::new(BASE), "app.dll").unwrap();
    let thunk = &imports.descriptors[0].thunks[0];

    let result = set_import_function(&memory, Address::new(BASE), thunk, Address::new(0x1_0000_0000));
    assert!(matches!(result, Err(MemoryError::InvalidAddress(_))));
}

#[test]
fn test_corrupt_descriptor_table() {
    let mut image = app(ProcessArchitecture::X64).build_mapped();
    // Descriptors whose name RVAs point far outside the image
    let filler = [0x41u8; 20];
    for chunk in image[IMPORT_RVA as usize..].chunks_exact_mut(20) {
        chunk.copy_from_slice(&filler);
    }
    let memory = mapped(ProcessArchitecture::X64, &image, ProtectionFlags::read_only());
    let result = parse_imports(
        &MappedImage::new(&memory, Address::new(BASE), image.len()),
        "app.dll",
    );
    assert!(matches!(result, Err(MemoryError::PeParse(_))));
}
