//! Windows utility functions

pub mod error_codes;
pub mod string_conv;

pub use error_codes::{ErrorCode, WinError};
pub use string_conv::{to_wide, wide_to_string};
