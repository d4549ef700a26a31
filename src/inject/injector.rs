use super::path::resolve_module_path;
use super::procedure::{find_export_address, find_procedure};
use crate::core::types::{Address, MemoryError, MemoryResult, ModuleInfo, ProcessArchitecture};
use crate::invoke::{CallResult, CallingConvention, InvokeOptions, RemoteInvoker};
use crate::memory::{encode_wide, ProtectionFlags, RemoteAllocation};
use crate::pe::Symbol;
use crate::process::{find_module_by_name, find_module_by_path, RemoteTarget};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

const LOADER_MODULE: &str = "kernel32.dll";
const LOAD_WITH_ALTERED_SEARCH_PATH: u64 = 0x0000_0008;

/// Knobs for module injection
#[derive(Debug, Clone)]
pub struct InjectOptions {
    /// Resolve relative paths against the host executable's directory and
    /// require the file to exist
    pub resolve_path: bool,
    /// Load with LOAD_WITH_ALTERED_SEARCH_PATH; needs an absolute path
    pub add_to_search_order: bool,
    /// Wait limit for each remote thread
    pub timeout: Duration,
}

impl Default for InjectOptions {
    fn default() -> Self {
        Self {
            resolve_path: true,
            add_to_search_order: false,
            timeout: Duration::from_millis(10_000),
        }
    }
}

/// Loads modules into one target and calls their exports.
///
/// Nothing is rolled back: a module that loaded stays loaded even if a
/// later step fails.
pub struct Injector<'a, T: RemoteTarget + ?Sized> {
    target: &'a T,
    options: InjectOptions,
}

impl<'a, T: RemoteTarget + ?Sized> Injector<'a, T> {
    pub fn new(target: &'a T) -> Self {
        Self::with_options(target, InjectOptions::default())
    }

    pub fn with_options(target: &'a T, options: InjectOptions) -> Self {
        Injector { target, options }
    }

    pub fn options(&self) -> &InjectOptions {
        &self.options
    }

    /// Loads `path` into the target and returns the loaded module
    pub fn inject_module(&self, path: &Path) -> MemoryResult<ModuleInfo> {
        let path = if self.options.resolve_path {
            resolve_module_path(path)?
        } else {
            path.to_path_buf()
        };
        if self.options.add_to_search_order && !path.is_absolute() {
            return Err(MemoryError::InjectionFailure(format!(
                "changing the search order needs an absolute path, got {}",
                path.display()
            )));
        }

        let remote_path = RemoteAllocation::with_data(
            self.target,
            &encode_wide(&path.to_string_lossy()),
            ProtectionFlags::read_write(),
        )?;

        let (returned, mask) = if self.options.add_to_search_order {
            let load = self.loader_procedure("LoadLibraryExW")?;
            let result = RemoteInvoker::with_options(self.target, self.invoke_options()).call(
                load,
                &[remote_path.base().as_u64(), 0, LOAD_WITH_ALTERED_SEARCH_PATH],
                CallingConvention::Stdcall,
            );
            (result.map(|r| r.return_value), self.pointer_mask())
        } else {
            let load = self.loader_procedure("LoadLibraryW")?;
            // The thread routine ABI matches LoadLibraryW, but only 32 bits come back
            let result = self
                .target
                .run_remote_thread(load, remote_path.base(), self.options.timeout);
            (result.map(u64::from), u64::from(u32::MAX))
        };

        let returned = match returned {
            Ok(value) => value & mask,
            Err(e) if e.is_timeout() => {
                // The loader thread may still be reading the path
                remote_path.leak();
                return Err(e);
            }
            Err(e) => return Err(e),
        };
        remote_path.free()?;

        let module = self.locate_loaded(&path, returned, mask)?;
        info!("Injected {} at {}", path.display(), module.base_address);
        Ok(module)
    }

    /// Calls a zero-argument export of `module` with the default convention
    pub fn call_export(&self, module: &ModuleInfo, export: impl Into<Symbol>) -> MemoryResult<CallResult> {
        let symbol = export.into();
        let address = find_export_address(self.target, module, &symbol)?;
        debug!("{}!{} is at {}", module.name, symbol, address);
        RemoteInvoker::with_options(self.target, self.invoke_options()).call(
            address,
            &[],
            CallingConvention::Default,
        )
    }

    /// Unloads `module` with FreeLibrary
    pub fn free_module(&self, module: &ModuleInfo) -> MemoryResult<()> {
        let free = self.loader_procedure("FreeLibrary")?;
        let result = RemoteInvoker::with_options(self.target, self.invoke_options()).call(
            free,
            &[module.base_address.as_u64()],
            CallingConvention::Stdcall,
        )?;
        if result.return_u32() == 0 {
            return Err(MemoryError::InjectionFailure(format!(
                "FreeLibrary failed for {}",
                module.name
            )));
        }
        info!("Unloaded {} from PID {}", module.name, self.target.pid());
        Ok(())
    }

    /// Runs an empty thread so a freshly created, suspended process finishes
    /// loader initialisation and can list its modules
    pub fn initialize_loader(&self) -> MemoryResult<()> {
        let stub: &[u8] = match self.target.architecture() {
            ProcessArchitecture::X64 => &[0xC3],            // ret
            ProcessArchitecture::X86 => &[0xC2, 0x04, 0x00], // ret 4
        };
        let allocation = RemoteAllocation::with_data(self.target, stub, ProtectionFlags::execute_read())?;
        self.target.flush_instruction_cache(allocation.base(), stub.len())?;

        match self
            .target
            .run_remote_thread(allocation.base(), Address::null(), self.options.timeout)
        {
            Ok(_) => allocation.free(),
            Err(e) if e.is_timeout() => {
                allocation.leak();
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Loader entry point in the target's kernel32
    fn loader_procedure(&self, name: &str) -> MemoryResult<Address> {
        let symbol = Symbol::Name(name.to_string());
        match find_procedure(self.target, LOADER_MODULE, &symbol) {
            Ok(address) => Ok(address),
            Err(e) => match self.target.known_procedure(LOADER_MODULE, name) {
                Some(address) => {
                    debug!("Using host address of {} after: {}", name, e);
                    Ok(address)
                }
                None => Err(e),
            },
        }
    }

    /// Finds the freshly loaded module by path or name and matching base
    fn locate_loaded(&self, path: &Path, returned: u64, mask: u64) -> MemoryResult<ModuleInfo> {
        let modules = self.target.modules()?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        let same_base = |module: &&ModuleInfo| module.base_address.as_u64() & mask == returned;
        let by_path = find_module_by_path(&modules, path).filter(same_base);
        let by_name = || find_module_by_name(&modules, &file_name).filter(same_base);

        match by_path.or_else(by_name) {
            Some(module) => Ok(module.clone()),
            None if returned == 0 => Err(MemoryError::InjectionFailure(format!(
                "the loader returned NULL for {}",
                path.display()
            ))),
            None => {
                warn!("Loader returned 0x{:X} but no such module is listed", returned);
                Err(MemoryError::InjectionFailure(format!(
                    "{} reported loaded at 0x{:X} but is not in the module list",
                    path.display(),
                    returned
                )))
            }
        }
    }

    fn invoke_options(&self) -> InvokeOptions {
        InvokeOptions {
            timeout: self.options.timeout,
        }
    }

    fn pointer_mask(&self) -> u64 {
        match self.target.architecture() {
            ProcessArchitecture::X86 => u64::from(u32::MAX),
            ProcessArchitecture::X64 => u64::MAX,
        }
    }
}
