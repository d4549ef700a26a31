//! Integration tests for module injection and export calls

mod common;

use common::{DllBuilder, FakeTarget, CODE_RVA};
use remote_mem::inject::{find_procedure, MAX_FORWARD_DEPTH};
use remote_mem::pe::Symbol;
use remote_mem::{
    Address, InjectOptions, Injector, MemoryAccess, MemoryError, MemoryExt, MemoryResult,
    ProcessArchitecture,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

const KERNEL32_BASE: usize = 0x7000_0000;
const KERNELBASE_BASE: usize = 0x7100_0000;
const PAYLOAD_BASE: usize = 0x6800_0000;

const FREE_LIBRARY: usize = KERNEL32_BASE + CODE_RVA as usize;
const LOAD_LIBRARY_EX_W: usize = FREE_LIBRARY + 0x10;
const LOAD_LIBRARY_W: usize = FREE_LIBRARY + 0x20;

fn kernel32(architecture: ProcessArchitecture) -> Vec<u8> {
    DllBuilder::new(architecture, "KERNEL32.dll")
        .export("FreeLibrary", CODE_RVA)
        .export("LoadLibraryExW", CODE_RVA + 0x10)
        .export("LoadLibraryW", CODE_RVA + 0x20)
        .build_mapped()
}

fn payload(architecture: ProcessArchitecture) -> DllBuilder {
    DllBuilder::new(architecture, "payload.dll")
        .export("Init", CODE_RVA)
        .export("Shutdown", CODE_RVA + 0x40)
        .code(CODE_RVA, &[0x31, 0xC0, 0xC3])
}

fn target_with_kernel32(architecture: ProcessArchitecture) -> FakeTarget {
    let target = FakeTarget::new(architecture);
    target.load(
        "KERNEL32.DLL",
        "C:\\Windows\\System32\\KERNEL32.DLL",
        KERNEL32_BASE,
        &kernel32(architecture),
    );
    target
}

/// Writes the payload to a temporary directory
fn payload_on_disk(architecture: ProcessArchitecture) -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("payload.dll");
    fs::write(&path, payload(architecture).build_file()).unwrap();
    (dir, path)
}

/// Plays LoadLibraryW: maps the payload and lists it under the requested path
fn load_library(
    expected_start: usize,
    image: Vec<u8>,
) -> impl FnMut(&FakeTarget, Address, Address) -> MemoryResult<u32> {
    move |target, start, parameter| {
        assert_eq!(start, Address::new(expected_start));
        let path = target.memory.read_wide_string(parameter, 260)?;
        let name = Path::new(&path)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let module = target.load(&name, &path, PAYLOAD_BASE, &image);
        Ok(module.base_address.as_u64() as u32)
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|window| window == needle)
}

fn quick() -> InjectOptions {
    InjectOptions {
        timeout: Duration::from_millis(50),
        ..InjectOptions::default()
    }
}

#[test]
fn test_inject_module_x64() {
    let target = target_with_kernel32(ProcessArchitecture::X64);
    let (_dir, path) = payload_on_disk(ProcessArchitecture::X64);
    target.on_thread(load_library(
        LOAD_LIBRARY_W,
        payload(ProcessArchitecture::X64).build_mapped(),
    ));

    let module = Injector::new(&target).inject_module(&path).unwrap();
    assert_eq!(module.base_address, Address::new(PAYLOAD_BASE));
    assert_eq!(module.name, "payload.dll");
    assert!(module.matches_path(&path));

    // The path buffer is gone once the loader returned
    assert_eq!(target.memory.allocation_count(), 0);
    assert_eq!(target.starts().len(), 1);
}

#[test]
fn test_inject_module_x86() {
    let target = target_with_kernel32(ProcessArchitecture::X86);
    let (_dir, path) = payload_on_disk(ProcessArchitecture::X86);
    target.on_thread(load_library(
        LOAD_LIBRARY_W,
        payload(ProcessArchitecture::X86).build_mapped(),
    ));

    let module = Injector::new(&target).inject_module(&path).unwrap();
    assert_eq!(module.base_address, Address::new(PAYLOAD_BASE));
}

#[test]
fn test_loader_through_forwarder() {
    let target = FakeTarget::new(ProcessArchitecture::X64);
    let forwarding = DllBuilder::new(ProcessArchitecture::X64, "KERNEL32.dll")
        .forward("LoadLibraryW", "KERNELBASE.LoadLibraryW")
        .build_mapped();
    let real = DllBuilder::new(ProcessArchitecture::X64, "KERNELBASE.dll")
        .export("LoadLibraryW", CODE_RVA + 0x40)
        .build_mapped();
    target.load("kernel32.dll", "C:\\Windows\\System32\\kernel32.dll", KERNEL32_BASE, &forwarding);
    target.load("KernelBase.dll", "C:\\Windows\\System32\\KernelBase.dll", KERNELBASE_BASE, &real);

    let (_dir, path) = payload_on_disk(ProcessArchitecture::X64);
    target.on_thread(load_library(
        KERNELBASE_BASE + CODE_RVA as usize + 0x40,
        payload(ProcessArchitecture::X64).build_mapped(),
    ));

    let module = Injector::new(&target).inject_module(&path).unwrap();
    assert_eq!(module.base_address, Address::new(PAYLOAD_BASE));
}

#[test]
fn test_host_address_used_when_kernel32_unlisted() {
    let mut target = FakeTarget::new(ProcessArchitecture::X64);
    target.know("kernel32.dll", "LoadLibraryW", Address::new(0x7200_0000));
    let (_dir, path) = payload_on_disk(ProcessArchitecture::X64);
    target.on_thread(load_library(
        0x7200_0000,
        payload(ProcessArchitecture::X64).build_mapped(),
    ));

    let module = Injector::new(&target).inject_module(&path).unwrap();
    assert_eq!(module.base_address, Address::new(PAYLOAD_BASE));
}

#[test]
fn test_no_kernel32_and_no_host_address() {
    let target = FakeTarget::new(ProcessArchitecture::X64);
    let (_dir, path) = payload_on_disk(ProcessArchitecture::X64);

    let result = Injector::new(&target).inject_module(&path);
    assert!(matches!(result, Err(MemoryError::ModuleNotFound(_))));
    assert!(target.starts().is_empty());
}

#[test]
fn test_missing_file_is_rejected_before_touching_target() {
    let target = target_with_kernel32(ProcessArchitecture::X64);
    let dir = tempfile::tempdir().unwrap();

    let result = Injector::new(&target).inject_module(&dir.path().join("absent.dll"));
    assert!(matches!(result, Err(MemoryError::ModuleNotFound(_))));
    assert!(target.starts().is_empty());
    assert_eq!(target.memory.allocation_count(), 0);
}

#[test]
fn test_loader_returning_null() {
    let target = target_with_kernel32(ProcessArchitecture::X64);
    let (_dir, path) = payload_on_disk(ProcessArchitecture::X64);
    target.on_thread(|_, _, _| Ok(0));

    let err = Injector::new(&target).inject_module(&path).unwrap_err();
    assert!(matches!(err, MemoryError::InjectionFailure(_)));
    assert!(err.to_string().contains("NULL"));
}

#[test]
fn test_loaded_base_not_in_module_list() {
    let target = target_with_kernel32(ProcessArchitecture::X64);
    let (_dir, path) = payload_on_disk(ProcessArchitecture::X64);
    target.on_thread(|_, _, _| Ok(0x6900_0000));

    let result = Injector::new(&target).inject_module(&path);
    assert!(matches!(result, Err(MemoryError::InjectionFailure(_))));
}

#[test]
fn test_timeout_leaks_path_buffer() {
    let target = target_with_kernel32(ProcessArchitecture::X64);
    let (_dir, path) = payload_on_disk(ProcessArchitecture::X64);
    // No script: the loader thread never finishes

    let result = Injector::with_options(&target, quick()).inject_module(&path);
    assert!(matches!(
        result,
        Err(MemoryError::RemoteExecutionTimeout { timeout_ms: 50, .. })
    ));

    assert_eq!(target.memory.allocation_count(), 1);
    let buffer = target.starts()[0].parameter;
    assert_eq!(
        target.memory.read_wide_string(buffer, 260).unwrap(),
        path.to_string_lossy()
    );
}

#[test]
fn test_search_order_needs_absolute_path() {
    let target = target_with_kernel32(ProcessArchitecture::X64);
    let options = InjectOptions {
        resolve_path: false,
        add_to_search_order: true,
        ..InjectOptions::default()
    };

    let result = Injector::with_options(&target, options).inject_module(Path::new("payload.dll"));
    assert!(matches!(result, Err(MemoryError::InjectionFailure(_))));
}

#[test]
fn test_search_order_goes_through_load_library_ex() {
    let target = target_with_kernel32(ProcessArchitecture::X64);
    let (_dir, path) = payload_on_disk(ProcessArchitecture::X64);
    let image = payload(ProcessArchitecture::X64).build_mapped();
    let expected_path = path.to_string_lossy().into_owned();

    target.on_thread(move |target, start, slot| {
        // A call stub, not LoadLibraryExW itself
        assert_ne!(start, Address::new(LOAD_LIBRARY_EX_W));
        let code = target.memory.read(start, 0x80)?;
        assert!(contains(&code, &(LOAD_LIBRARY_EX_W as u64).to_le_bytes()));
        // dwFlags = LOAD_WITH_ALTERED_SEARCH_PATH
        assert!(contains(&code, &[0x49, 0xB8, 0x08, 0, 0, 0, 0, 0, 0, 0]));

        let module = target.load("payload.dll", &expected_path, PAYLOAD_BASE, &image);
        target.complete_call(slot, module.base_address.as_u64())?;
        Ok(module.base_address.as_u64() as u32)
    });

    let options = InjectOptions {
        add_to_search_order: true,
        ..InjectOptions::default()
    };
    let module = Injector::with_options(&target, options)
        .inject_module(&path)
        .unwrap();
    assert_eq!(module.base_address, Address::new(PAYLOAD_BASE));
}

#[test]
fn test_call_export_by_name_and_ordinal() {
    let target = target_with_kernel32(ProcessArchitecture::X64);
    let module = target.load(
        "payload.dll",
        "C:\\mods\\payload.dll",
        PAYLOAD_BASE,
        &payload(ProcessArchitecture::X64).build_mapped(),
    );
    target.on_thread(|target, start, slot| {
        let code = target.memory.read(start, 0x60)?;
        let init = (PAYLOAD_BASE + CODE_RVA as usize) as u64;
        let value = if contains(&code, &init.to_le_bytes()) { 1 } else { 2 };
        target.complete_call(slot, value)?;
        Ok(value as u32)
    });

    let injector = Injector::new(&target);
    let by_name = injector.call_export(&module, "Init").unwrap();
    assert_eq!(by_name.return_value, 1);

    // Shutdown is the second export, ordinal base 1
    let by_ordinal = injector.call_export(&module, "#2").unwrap();
    assert_eq!(by_ordinal.return_value, 2);

    assert_eq!(target.memory.allocation_count(), 0);
}

#[test]
fn test_call_missing_export() {
    let target = target_with_kernel32(ProcessArchitecture::X64);
    let module = target.load(
        "payload.dll",
        "C:\\mods\\payload.dll",
        PAYLOAD_BASE,
        &payload(ProcessArchitecture::X64).build_mapped(),
    );

    let result = Injector::new(&target).call_export(&module, "Missing");
    match result {
        Err(MemoryError::ExportNotFound { module, export }) => {
            assert_eq!(module, "payload.dll");
            assert_eq!(export, "Missing");
        }
        other => panic!("expected missing export, got {:?}", other),
    }
    assert!(target.starts().is_empty());
}

#[test]
fn test_free_module() {
    let target = target_with_kernel32(ProcessArchitecture::X64);
    let module = target.load(
        "payload.dll",
        "C:\\mods\\payload.dll",
        PAYLOAD_BASE,
        &payload(ProcessArchitecture::X64).build_mapped(),
    );
    target.on_thread(|target, start, slot| {
        let code = target.memory.read(start, 0x60)?;
        assert!(contains(&code, &(FREE_LIBRARY as u64).to_le_bytes()));
        target.complete_call(slot, 1)?;
        Ok(1)
    });
    Injector::new(&target).free_module(&module).unwrap();

    target.on_thread(|target, _, slot| {
        target.complete_call(slot, 0)?;
        Ok(0)
    });
    let result = Injector::new(&target).free_module(&module);
    assert!(matches!(result, Err(MemoryError::InjectionFailure(_))));
}

#[test]
fn test_initialize_loader_runs_empty_thread() {
    let target = target_with_kernel32(ProcessArchitecture::X86);
    target.on_thread(|_, _, parameter| {
        assert!(parameter.is_null());
        Ok(0)
    });

    Injector::new(&target).initialize_loader().unwrap();
    let starts = target.starts();
    assert_eq!(&starts[0].code[..3], &[0xC2, 0x04, 0x00]);
    assert_eq!(target.memory.allocation_count(), 0);
}

#[test]
fn test_forwarder_to_unloaded_module() {
    let target = FakeTarget::new(ProcessArchitecture::X64);
    let image = DllBuilder::new(ProcessArchitecture::X64, "shim.dll")
        .forward("Open", "api-ms-win-core-file-l1-1-0.CreateFileW")
        .build_mapped();
    target.load("shim.dll", "C:\\shim.dll", 0x6A00_0000, &image);

    let result = find_procedure(&target, "shim.dll", &Symbol::Name("Open".into()));
    assert!(matches!(result, Err(MemoryError::ModuleNotFound(_))));
}

#[test]
fn test_forwarder_cycle_is_bounded() {
    let target = FakeTarget::new(ProcessArchitecture::X64);
    let a = DllBuilder::new(ProcessArchitecture::X64, "a.dll")
        .forward("Loop", "b.Loop")
        .build_mapped();
    let b = DllBuilder::new(ProcessArchitecture::X64, "b.dll")
        .forward("Loop", "a.Loop")
        .build_mapped();
    target.load("a.dll", "C:\\a.dll", 0x6A00_0000, &a);
    target.load("b.dll", "C:\\b.dll", 0x6B00_0000, &b);

    let err = find_procedure(&target, "a", &Symbol::Name("Loop".into())).unwrap_err();
    assert!(matches!(err, MemoryError::PeParse(_)));
    assert!(err.to_string().contains(&MAX_FORWARD_DEPTH.to_string()));
}

#[test]
fn test_unknown_module() {
    let target = target_with_kernel32(ProcessArchitecture::X64);
    let result = find_procedure(&target, "user32.dll", &Symbol::Name("MessageBoxW".into()));
    assert!(matches!(result, Err(MemoryError::ModuleNotFound(_))));
}
