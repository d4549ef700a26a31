//! PSAPI wrappers for module enumeration

use crate::windows::utils::{wide_to_string, WinError};
use crate::windows::bindings::kernel32::Win32Result;
use std::mem;
use winapi::shared::minwindef::{DWORD, FALSE, HMODULE};
use winapi::um::psapi::{
    EnumProcessModulesEx, GetModuleBaseNameW, GetModuleFileNameExW, GetModuleInformation,
    MODULEINFO,
};
use winapi::um::winnt::HANDLE;

/// 32-bit and 64-bit modules alike
const LIST_MODULES_ALL: DWORD = 0x03;
const INITIAL_MODULE_CAPACITY: usize = 256;
const WIDE_PATH_CAPACITY: usize = 32_768;

/// Module handles in load order
///
/// # Safety
/// The handle must be a valid process handle with PROCESS_QUERY_INFORMATION and PROCESS_VM_READ
pub unsafe fn enum_process_modules(handle: HANDLE) -> Win32Result<Vec<HMODULE>> {
    let mut modules: Vec<HMODULE> = vec![std::ptr::null_mut(); INITIAL_MODULE_CAPACITY];

    loop {
        let mut bytes_needed: DWORD = 0;
        let capacity_bytes = (modules.len() * mem::size_of::<HMODULE>()) as DWORD;
        let result = EnumProcessModulesEx(
            handle,
            modules.as_mut_ptr(),
            capacity_bytes,
            &mut bytes_needed,
            LIST_MODULES_ALL,
        );
        if result == FALSE {
            return Err(WinError::new("EnumProcessModulesEx"));
        }

        let count = bytes_needed as usize / mem::size_of::<HMODULE>();
        if count <= modules.len() {
            modules.truncate(count);
            return Ok(modules);
        }
        // The list grew between calls; retry with room to spare
        modules.resize(count + 16, std::ptr::null_mut());
    }
}

/// # Safety
/// The handle must be a valid process handle and `module` a handle from it
pub unsafe fn get_module_information(handle: HANDLE, module: HMODULE) -> Win32Result<MODULEINFO> {
    let mut info: MODULEINFO = mem::zeroed();
    let result = GetModuleInformation(
        handle,
        module,
        &mut info,
        mem::size_of::<MODULEINFO>() as DWORD,
    );
    if result == FALSE {
        return Err(WinError::new("GetModuleInformation"));
    }
    Ok(info)
}

/// # Safety
/// The handle must be a valid process handle and `module` a handle from it
pub unsafe fn get_module_base_name(handle: HANDLE, module: HMODULE) -> Win32Result<String> {
    let mut buffer = vec![0u16; WIDE_PATH_CAPACITY];
    let length = GetModuleBaseNameW(handle, module, buffer.as_mut_ptr(), buffer.len() as DWORD);
    if length == 0 {
        return Err(WinError::new("GetModuleBaseNameW"));
    }
    Ok(wide_to_string(&buffer[..length as usize]))
}

/// # Safety
/// The handle must be a valid process handle and `module` a handle from it
pub unsafe fn get_module_file_name(handle: HANDLE, module: HMODULE) -> Win32Result<String> {
    let mut buffer = vec![0u16; WIDE_PATH_CAPACITY];
    let length = GetModuleFileNameExW(handle, module, buffer.as_mut_ptr(), buffer.len() as DWORD);
    if length == 0 {
        return Err(WinError::new("GetModuleFileNameExW"));
    }
    Ok(wide_to_string(&buffer[..length as usize]))
}
