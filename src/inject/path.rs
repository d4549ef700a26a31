use crate::core::types::{MemoryError, MemoryResult};
use std::env;
use std::path::{Path, PathBuf};

/// Resolves a relative module path against the host executable's directory.
///
/// The result must name an existing file.
pub fn resolve_module_path(path: &Path) -> MemoryResult<PathBuf> {
    let exe = env::current_exe()?;
    let base = exe.parent().unwrap_or_else(|| Path::new("."));
    resolve_against(base, path)
}

/// Like [`resolve_module_path`] with an explicit base directory
pub fn resolve_against(base: &Path, path: &Path) -> MemoryResult<PathBuf> {
    let resolved = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    };
    if !resolved.is_file() {
        return Err(MemoryError::ModuleNotFound(resolved.display().to_string()));
    }
    Ok(resolved)
}
