//! Loaded-module snapshots

use crate::core::types::ModuleInfo;
use std::path::Path;

/// First module whose short name matches, with or without extension
pub fn find_module_by_name<'a>(modules: &'a [ModuleInfo], name: &str) -> Option<&'a ModuleInfo> {
    modules.iter().find(|module| module.matches_name(name))
}

/// First module loaded from `path`, compared case-insensitively
pub fn find_module_by_path<'a>(modules: &'a [ModuleInfo], path: &Path) -> Option<&'a ModuleInfo> {
    modules.iter().find(|module| module.matches_path(path))
}

#[cfg(windows)]
pub use self::os::ModuleEnumerator;

#[cfg(windows)]
mod os {
    use super::*;
    use crate::core::types::{Address, MemoryResult};
    use crate::process::ProcessContext;
    use crate::windows::bindings::psapi;
    use std::path::PathBuf;
    use tracing::debug;

    /// Walks the loader's module list of one target
    pub struct ModuleEnumerator<'a> {
        context: &'a ProcessContext,
    }

    impl<'a> ModuleEnumerator<'a> {
        pub fn new(context: &'a ProcessContext) -> Self {
            ModuleEnumerator { context }
        }

        /// Snapshot of all modules in load order
        pub fn enumerate(&self) -> MemoryResult<Vec<ModuleInfo>> {
            let process = self.context.raw_handle()?;
            let pid = self.context.pid();

            let handles = unsafe { psapi::enum_process_modules(process) }
                .map_err(|e| e.to_memory_error(pid))?;

            let mut modules = Vec::with_capacity(handles.len());
            for module in handles {
                // Modules can unload between the list and the per-module queries
                let info = match unsafe { psapi::get_module_information(process, module) } {
                    Ok(info) => info,
                    Err(e) => {
                        debug!("Skipping module {:p}: {}", module, e);
                        continue;
                    }
                };
                let name = unsafe { psapi::get_module_base_name(process, module) }
                    .unwrap_or_default();
                let path = unsafe { psapi::get_module_file_name(process, module) }
                    .map(PathBuf::from)
                    .unwrap_or_default();

                modules.push(ModuleInfo::new(
                    name,
                    path,
                    Address::new(info.lpBaseOfDll as usize),
                    info.SizeOfImage as usize,
                ));
            }

            debug!("Enumerated {} modules in PID {}", modules.len(), pid);
            Ok(modules)
        }

        pub fn find_by_name(&self, name: &str) -> MemoryResult<Option<ModuleInfo>> {
            Ok(find_module_by_name(&self.enumerate()?, name).cloned())
        }

        pub fn find_by_path(&self, path: &Path) -> MemoryResult<Option<ModuleInfo>> {
            Ok(find_module_by_path(&self.enumerate()?, path).cloned())
        }

        /// The executable image
        pub fn main_module(&self) -> MemoryResult<Option<ModuleInfo>> {
            Ok(self.enumerate()?.into_iter().next())
        }
    }

}
