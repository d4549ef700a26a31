//! Owned Win32 HANDLE

use crate::windows::bindings::kernel32;
use crate::windows::utils::WinError;
use std::ptr;
use winapi::um::handleapi::INVALID_HANDLE_VALUE;
use winapi::um::winnt::HANDLE;

/// A kernel handle closed on drop
pub struct Handle {
    handle: HANDLE,
}

impl Handle {
    /// Takes ownership of the result of a handle-returning call.
    ///
    /// Null and `INVALID_HANDLE_VALUE` are failures; the last error is captured
    /// under `context`.
    pub fn from_raw(handle: HANDLE, context: &str) -> Result<Self, WinError> {
        if handle.is_null() || handle == INVALID_HANDLE_VALUE {
            return Err(WinError::new(context));
        }
        Ok(Handle { handle })
    }

    /// Get the raw handle
    pub fn raw(&self) -> HANDLE {
        self.handle
    }

    /// Closes now, reporting a failure instead of ignoring it
    pub fn close(mut self) -> Result<(), WinError> {
        let handle = std::mem::replace(&mut self.handle, ptr::null_mut());
        unsafe { kernel32::close_handle(handle) }
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        if !self.handle.is_null() {
            unsafe {
                let _ = kernel32::close_handle(self.handle);
            }
        }
    }
}

// Kernel handles are process-wide values; the OS serializes access to the object
unsafe impl Send for Handle {}
unsafe impl Sync for Handle {}
