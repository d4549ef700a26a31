//! Kernel32 wrappers for process, memory and thread operations

use crate::windows::utils::{to_wide, ErrorCode, WinError};
use std::ffi::CString;
use std::path::Path;
use std::{mem, ptr};
use winapi::shared::minwindef::{BOOL, DWORD, FALSE, LPVOID};
use winapi::um::handleapi::CloseHandle;
use winapi::um::libloaderapi::{GetModuleHandleW, GetProcAddress};
use winapi::um::memoryapi::{
    ReadProcessMemory, VirtualAllocEx, VirtualFreeEx, VirtualProtectEx, VirtualQueryEx,
    WriteProcessMemory,
};
use winapi::um::processthreadsapi::{
    CreateProcessW, CreateRemoteThread, FlushInstructionCache, GetCurrentProcess,
    GetExitCodeThread, OpenProcess, ResumeThread, TerminateProcess, PROCESS_INFORMATION,
    STARTUPINFOW,
};
use winapi::um::synchapi::WaitForSingleObject;
use winapi::um::winnt::{HANDLE, MEMORY_BASIC_INFORMATION};
use winapi::um::wow64apiset::IsWow64Process;

pub type Win32Result<T> = Result<T, WinError>;

pub const MEM_COMMIT: DWORD = 0x1000;
pub const MEM_RESERVE: DWORD = 0x2000;
pub const MEM_RELEASE: DWORD = 0x8000;
pub const CREATE_SUSPENDED: DWORD = 0x0000_0004;
pub const CREATE_UNICODE_ENVIRONMENT: DWORD = 0x0000_0400;

const WAIT_OBJECT_0: DWORD = 0x0000_0000;
const WAIT_TIMEOUT: DWORD = 0x0000_0102;
const RESUME_FAILED: DWORD = 0xFFFF_FFFF;

/// Result of waiting on a kernel object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Signaled,
    TimedOut,
}

/// Safe wrapper for OpenProcess
pub fn open_process(pid: u32, desired_access: u32) -> Win32Result<HANDLE> {
    let handle = unsafe { OpenProcess(desired_access, FALSE, pid) };
    if handle.is_null() {
        Err(WinError::new(format!("OpenProcess({})", pid)))
    } else {
        Ok(handle)
    }
}

/// Safe wrapper for CloseHandle
///
/// # Safety
/// The handle must be a valid Windows handle not owned elsewhere
pub unsafe fn close_handle(handle: HANDLE) -> Win32Result<()> {
    if handle.is_null() {
        return Ok(());
    }
    check(CloseHandle(handle), "CloseHandle")
}

/// Reads as much of `buffer` as the target allows.
///
/// A partial copy with at least one byte transferred is reported as success
/// with the short count.
///
/// # Safety
/// The handle must be a valid process handle with PROCESS_VM_READ
pub unsafe fn read_process_memory(
    handle: HANDLE,
    address: usize,
    buffer: &mut [u8],
) -> Win32Result<usize> {
    let mut bytes_read = 0;
    let result = ReadProcessMemory(
        handle,
        address as LPVOID,
        buffer.as_mut_ptr() as LPVOID,
        buffer.len(),
        &mut bytes_read,
    );

    if result == FALSE {
        let error = WinError::new(format!("ReadProcessMemory(0x{:X})", address));
        if error.code() == ErrorCode::PartialCopy && bytes_read > 0 {
            return Ok(bytes_read);
        }
        return Err(error);
    }
    Ok(bytes_read)
}

/// Safe wrapper for WriteProcessMemory
///
/// # Safety
/// The handle must be a valid process handle with PROCESS_VM_WRITE and PROCESS_VM_OPERATION
pub unsafe fn write_process_memory(
    handle: HANDLE,
    address: usize,
    data: &[u8],
) -> Win32Result<usize> {
    let mut bytes_written = 0;
    let result = WriteProcessMemory(
        handle,
        address as LPVOID,
        data.as_ptr() as LPVOID,
        data.len(),
        &mut bytes_written,
    );
    if result == FALSE {
        return Err(WinError::new(format!("WriteProcessMemory(0x{:X})", address)));
    }
    Ok(bytes_written)
}

/// Queries the region containing `address`; `None` past the user address space
///
/// # Safety
/// The handle must be a valid process handle with PROCESS_QUERY_INFORMATION
pub unsafe fn virtual_query_ex(
    handle: HANDLE,
    address: usize,
) -> Win32Result<Option<MEMORY_BASIC_INFORMATION>> {
    let mut mbi: MEMORY_BASIC_INFORMATION = mem::zeroed();
    let result = VirtualQueryEx(
        handle,
        address as LPVOID,
        &mut mbi,
        mem::size_of::<MEMORY_BASIC_INFORMATION>(),
    );

    if result == 0 {
        let error = WinError::new(format!("VirtualQueryEx(0x{:X})", address));
        if error.code() == ErrorCode::InvalidParameter {
            return Ok(None);
        }
        return Err(error);
    }
    Ok(Some(mbi))
}

/// Reserves and commits `size` bytes anywhere in the target
///
/// # Safety
/// The handle must be a valid process handle with PROCESS_VM_OPERATION
pub unsafe fn virtual_alloc_ex(handle: HANDLE, size: usize, protection: u32) -> Win32Result<usize> {
    let address = VirtualAllocEx(
        handle,
        ptr::null_mut(),
        size,
        MEM_COMMIT | MEM_RESERVE,
        protection,
    );
    if address.is_null() {
        return Err(WinError::new(format!("VirtualAllocEx({} bytes)", size)));
    }
    Ok(address as usize)
}

/// Releases a whole allocation
///
/// # Safety
/// The handle must be a valid process handle with PROCESS_VM_OPERATION
pub unsafe fn virtual_free_ex(handle: HANDLE, address: usize) -> Win32Result<()> {
    check(
        VirtualFreeEx(handle, address as LPVOID, 0, MEM_RELEASE),
        &format!("VirtualFreeEx(0x{:X})", address),
    )
}

/// Changes protection and returns the previous value
///
/// # Safety
/// The handle must be a valid process handle with PROCESS_VM_OPERATION
pub unsafe fn virtual_protect_ex(
    handle: HANDLE,
    address: usize,
    size: usize,
    protection: u32,
) -> Win32Result<u32> {
    let mut old: DWORD = 0;
    check(
        VirtualProtectEx(handle, address as LPVOID, size, protection, &mut old),
        &format!("VirtualProtectEx(0x{:X})", address),
    )?;
    Ok(old)
}

/// # Safety
/// The handle must be a valid process handle
pub unsafe fn flush_instruction_cache(handle: HANDLE, address: usize, size: usize) -> Win32Result<()> {
    check(
        FlushInstructionCache(handle, address as LPVOID, size),
        "FlushInstructionCache",
    )
}

/// Starts a thread in the target at `start` with a single pointer argument
///
/// # Safety
/// The handle must carry PROCESS_CREATE_THREAD, and `start` must be code in
/// the target that follows the thread-routine ABI
pub unsafe fn create_remote_thread(
    handle: HANDLE,
    start: usize,
    parameter: usize,
) -> Win32Result<HANDLE> {
    // Null maps to None rather than to an invalid function pointer
    let routine = mem::transmute::<usize, Option<unsafe extern "system" fn(LPVOID) -> DWORD>>(start);
    let thread = CreateRemoteThread(
        handle,
        ptr::null_mut(),
        0,
        routine,
        parameter as LPVOID,
        0,
        ptr::null_mut(),
    );
    if thread.is_null() {
        return Err(WinError::new(format!("CreateRemoteThread(0x{:X})", start)));
    }
    Ok(thread)
}

/// # Safety
/// The handle must be a valid waitable handle with SYNCHRONIZE
pub unsafe fn wait_for_single_object(handle: HANDLE, timeout_ms: u32) -> Win32Result<WaitOutcome> {
    match WaitForSingleObject(handle, timeout_ms) {
        WAIT_OBJECT_0 => Ok(WaitOutcome::Signaled),
        WAIT_TIMEOUT => Ok(WaitOutcome::TimedOut),
        _ => Err(WinError::new("WaitForSingleObject")),
    }
}

/// # Safety
/// The handle must be a valid thread handle with THREAD_QUERY_INFORMATION
pub unsafe fn get_exit_code_thread(thread: HANDLE) -> Win32Result<u32> {
    let mut code: DWORD = 0;
    check(GetExitCodeThread(thread, &mut code), "GetExitCodeThread")?;
    Ok(code)
}

/// Returns the previous suspend count
///
/// # Safety
/// The handle must be a valid thread handle with THREAD_SUSPEND_RESUME
pub unsafe fn resume_thread(thread: HANDLE) -> Win32Result<u32> {
    let previous = ResumeThread(thread);
    if previous == RESUME_FAILED {
        return Err(WinError::new("ResumeThread"));
    }
    Ok(previous)
}

/// # Safety
/// The handle must be a valid process handle with PROCESS_TERMINATE
pub unsafe fn terminate_process(handle: HANDLE, exit_code: u32) -> Win32Result<()> {
    check(TerminateProcess(handle, exit_code), "TerminateProcess")
}

/// # Safety
/// The handle must be a valid process handle with PROCESS_QUERY_LIMITED_INFORMATION
pub unsafe fn is_wow64_process(handle: HANDLE) -> Win32Result<bool> {
    let mut wow64: BOOL = FALSE;
    check(IsWow64Process(handle, &mut wow64), "IsWow64Process")?;
    Ok(wow64 != FALSE)
}

/// Whether the host itself runs under WoW64
pub fn current_process_is_wow64() -> Win32Result<bool> {
    unsafe { is_wow64_process(GetCurrentProcess()) }
}

/// Launches `application` and returns its process and main-thread handles
pub fn create_process(
    application: &Path,
    command_line: &str,
    working_dir: &Path,
    flags: u32,
) -> Win32Result<PROCESS_INFORMATION> {
    let application = to_wide(application);
    let mut command_line = to_wide(command_line);
    let working_dir = to_wide(working_dir);

    unsafe {
        let mut startup: STARTUPINFOW = mem::zeroed();
        startup.cb = mem::size_of::<STARTUPINFOW>() as DWORD;
        let mut info: PROCESS_INFORMATION = mem::zeroed();

        check(
            CreateProcessW(
                application.as_ptr(),
                command_line.as_mut_ptr(),
                ptr::null_mut(),
                ptr::null_mut(),
                FALSE,
                flags | CREATE_UNICODE_ENVIRONMENT,
                ptr::null_mut(),
                working_dir.as_ptr(),
                &mut startup,
                &mut info,
            ),
            "CreateProcessW",
        )?;
        Ok(info)
    }
}

/// Address of `name` in a module already loaded into the host
pub fn local_proc_address(module: &str, name: &str) -> Option<usize> {
    let module = to_wide(module);
    let name = CString::new(name).ok()?;
    unsafe {
        let handle = GetModuleHandleW(module.as_ptr());
        if handle.is_null() {
            return None;
        }
        let address = GetProcAddress(handle, name.as_ptr());
        if address.is_null() {
            None
        } else {
            Some(address as usize)
        }
    }
}

fn check(result: BOOL, context: &str) -> Win32Result<()> {
    if result == FALSE {
        Err(WinError::new(context))
    } else {
        Ok(())
    }
}
