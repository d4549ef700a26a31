//! SeDebugPrivilege for opening processes owned by other users

use crate::core::types::{MemoryError, MemoryResult};
use crate::windows::types::Handle;
use crate::windows::utils::{to_wide, ErrorCode};
use std::ptr;
use winapi::shared::minwindef::{DWORD, FALSE};
use winapi::um::processthreadsapi::{GetCurrentProcess, OpenProcessToken};
use winapi::um::securitybaseapi::AdjustTokenPrivileges;
use winapi::um::winbase::LookupPrivilegeValueW;
use winapi::um::winnt::{
    HANDLE, LUID, LUID_AND_ATTRIBUTES, SE_PRIVILEGE_ENABLED, TOKEN_ADJUST_PRIVILEGES,
    TOKEN_PRIVILEGES, TOKEN_QUERY,
};

const ERROR_NOT_ALL_ASSIGNED: u32 = 1300;

/// Enables SeDebugPrivilege on the host's token
pub fn enable_debug_privilege() -> MemoryResult<()> {
    unsafe {
        let mut raw_token: HANDLE = ptr::null_mut();
        if OpenProcessToken(
            GetCurrentProcess(),
            TOKEN_ADJUST_PRIVILEGES | TOKEN_QUERY,
            &mut raw_token,
        ) == FALSE
        {
            return Err(MemoryError::last_os_error());
        }
        let token = Handle::from_raw(raw_token, "OpenProcessToken").map_err(|e| e.to_memory_error(0))?;

        let mut luid = LUID {
            LowPart: 0,
            HighPart: 0,
        };
        let privilege_name = to_wide("SeDebugPrivilege");
        if LookupPrivilegeValueW(ptr::null(), privilege_name.as_ptr(), &mut luid) == FALSE {
            return Err(MemoryError::last_os_error());
        }

        let mut privileges = TOKEN_PRIVILEGES {
            PrivilegeCount: 1,
            Privileges: [LUID_AND_ATTRIBUTES {
                Luid: luid,
                Attributes: SE_PRIVILEGE_ENABLED,
            }],
        };

        if AdjustTokenPrivileges(
            token.raw(),
            FALSE,
            &mut privileges,
            std::mem::size_of::<TOKEN_PRIVILEGES>() as DWORD,
            ptr::null_mut(),
            ptr::null_mut(),
        ) == FALSE
        {
            return Err(MemoryError::last_os_error());
        }

        // AdjustTokenPrivileges succeeds even when the token lacks the privilege
        if let ErrorCode::Unknown(ERROR_NOT_ALL_ASSIGNED) = ErrorCode::last_error() {
            return Err(MemoryError::WindowsApi(
                "SeDebugPrivilege is not held by this account".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg_attr(miri, ignore = "FFI not supported in Miri")]
    fn test_enable_debug_privilege_is_repeatable() {
        // Non-elevated accounts get an error; either way the outcome is stable
        let first = enable_debug_privilege().is_ok();
        let second = enable_debug_privilege().is_ok();
        assert_eq!(first, second);
    }
}
