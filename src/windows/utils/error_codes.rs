//! Win32 error codes and their mapping onto engine errors

use crate::core::types::MemoryError;
use std::fmt;
use ::windows::core::{HRESULT, HSTRING};
use winapi::um::errhandlingapi::GetLastError;

/// Win32 error codes the engine distinguishes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Success,
    FileNotFound,
    PathNotFound,
    AccessDenied,
    InvalidHandle,
    NotEnoughMemory,
    OutOfMemory,
    InvalidParameter,
    BadExeFormat,
    PartialCopy,
    InvalidAddress,
    NoAccess,
    CommitmentLimit,
    Unknown(u32),
}

impl From<u32> for ErrorCode {
    fn from(code: u32) -> Self {
        match code {
            0 => ErrorCode::Success,
            2 => ErrorCode::FileNotFound,
            3 => ErrorCode::PathNotFound,
            5 => ErrorCode::AccessDenied,
            6 => ErrorCode::InvalidHandle,
            8 => ErrorCode::NotEnoughMemory,
            14 => ErrorCode::OutOfMemory,
            87 => ErrorCode::InvalidParameter,
            193 => ErrorCode::BadExeFormat,
            299 => ErrorCode::PartialCopy,
            487 => ErrorCode::InvalidAddress,
            998 => ErrorCode::NoAccess,
            1455 => ErrorCode::CommitmentLimit,
            _ => ErrorCode::Unknown(code),
        }
    }
}

impl ErrorCode {
    /// Get the last Windows error
    pub fn last_error() -> Self {
        unsafe { ErrorCode::from(GetLastError()) }
    }

    /// Codes that mean "this address range cannot be touched"
    pub fn is_bad_address(&self) -> bool {
        matches!(
            self,
            ErrorCode::PartialCopy | ErrorCode::InvalidAddress | ErrorCode::NoAccess
        )
    }

    pub fn raw(&self) -> u32 {
        match *self {
            ErrorCode::Success => 0,
            ErrorCode::FileNotFound => 2,
            ErrorCode::PathNotFound => 3,
            ErrorCode::AccessDenied => 5,
            ErrorCode::InvalidHandle => 6,
            ErrorCode::NotEnoughMemory => 8,
            ErrorCode::OutOfMemory => 14,
            ErrorCode::InvalidParameter => 87,
            ErrorCode::BadExeFormat => 193,
            ErrorCode::PartialCopy => 299,
            ErrorCode::InvalidAddress => 487,
            ErrorCode::NoAccess => 998,
            ErrorCode::CommitmentLimit => 1455,
            ErrorCode::Unknown(code) => code,
        }
    }

    pub fn is_out_of_memory(&self) -> bool {
        matches!(
            self,
            ErrorCode::NotEnoughMemory | ErrorCode::OutOfMemory | ErrorCode::CommitmentLimit
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::Success => write!(f, "Success"),
            ErrorCode::FileNotFound => write!(f, "File not found"),
            ErrorCode::PathNotFound => write!(f, "Path not found"),
            ErrorCode::AccessDenied => write!(f, "Access denied"),
            ErrorCode::InvalidHandle => write!(f, "Invalid handle"),
            ErrorCode::NotEnoughMemory | ErrorCode::OutOfMemory => write!(f, "Not enough memory"),
            ErrorCode::InvalidParameter => write!(f, "Invalid parameter"),
            ErrorCode::BadExeFormat => write!(f, "Not a valid executable"),
            ErrorCode::PartialCopy => write!(f, "Partial copy"),
            ErrorCode::InvalidAddress => write!(f, "Invalid address"),
            ErrorCode::NoAccess => write!(f, "Invalid access to memory location"),
            ErrorCode::CommitmentLimit => write!(f, "Commitment limit reached"),
            ErrorCode::Unknown(code) => write!(f, "Unknown error: {}", code),
        }
    }
}

/// A failed Win32 call: the captured error code plus what was being attempted
#[derive(Debug, Clone)]
pub struct WinError {
    code: ErrorCode,
    context: String,
}

impl WinError {
    /// Captures `GetLastError` for the call that just failed
    pub fn new(context: impl Into<String>) -> Self {
        WinError {
            code: ErrorCode::last_error(),
            context: context.into(),
        }
    }

    pub fn with_code(code: ErrorCode, context: impl Into<String>) -> Self {
        WinError {
            code,
            context: context.into(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// Maps onto the engine's error kinds for an operation against `pid`
    pub fn to_memory_error(self, pid: u32) -> MemoryError {
        match self.code {
            ErrorCode::AccessDenied => MemoryError::access_denied(pid, self.context),
            ErrorCode::InvalidHandle => MemoryError::InvalidContext(self.to_string()),
            code if code.is_bad_address() => MemoryError::InvalidAddress(self.to_string()),
            code if code.is_out_of_memory() => MemoryError::OutOfMemory { size: 0 },
            _ => MemoryError::WindowsApiError(self.into()),
        }
    }
}

impl From<WinError> for ::windows::core::Error {
    fn from(error: WinError) -> Self {
        ::windows::core::Error::new(
            HRESULT::from_win32(error.code.raw()),
            HSTRING::from(error.to_string()),
        )
    }
}

impl fmt::Display for WinError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.context, self.code)
    }
}
