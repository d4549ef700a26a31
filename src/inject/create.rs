//! Launch a process suspended, inject into it, then let it run

use super::injector::{InjectOptions, Injector};
use crate::core::types::{MemoryResult, ModuleInfo};
use crate::invoke::CallResult;
use crate::pe::Symbol;
use crate::process::{LaunchOptions, LaunchedProcess, ProcessContext};
use std::path::Path;
use tracing::{info, warn};

/// Outcome of [`create_and_inject`]
pub struct CreatedTarget {
    pub process: LaunchedProcess,
    pub module: ModuleInfo,
    /// Result of the export call, when one was requested
    pub export_result: Option<CallResult>,
}

/// Starts `launch.path` suspended, loads `module` into it, optionally calls
/// `export`, and resumes the main thread unless `keep_suspended` is set.
///
/// If any step fails the new process is terminated, except after a remote
/// execution timeout where a thread of ours may still be running in it.
pub fn create_and_inject(
    launch: &LaunchOptions,
    module: &Path,
    export: Option<&str>,
    options: &InjectOptions,
    keep_suspended: bool,
) -> MemoryResult<CreatedTarget> {
    let launch = LaunchOptions {
        suspended: true,
        ..launch.clone()
    };
    let mut process = ProcessContext::launch(&launch)?;

    let outcome = inject_into(process.context(), module, export, options).and_then(|injected| {
        if !keep_suspended {
            process.resume()?;
        }
        Ok(injected)
    });

    match outcome {
        Ok((module, export_result)) => {
            info!("Created PID {} with {} loaded", process.pid(), module.name);
            Ok(CreatedTarget {
                process,
                module,
                export_result,
            })
        }
        Err(e) => {
            if e.is_timeout() {
                warn!("Leaving PID {} alive after a remote timeout", process.pid());
            } else if let Err(kill) = process.terminate(0) {
                warn!("Could not terminate PID {}: {}", process.pid(), kill);
            }
            Err(e)
        }
    }
}

fn inject_into(
    context: &ProcessContext,
    module: &Path,
    export: Option<&str>,
    options: &InjectOptions,
) -> MemoryResult<(ModuleInfo, Option<CallResult>)> {
    let injector = Injector::with_options(context, options.clone());
    injector.initialize_loader()?;
    let loaded = injector.inject_module(module)?;
    let export_result = match export {
        Some(name) => Some(injector.call_export(&loaded, Symbol::parse(name))?),
        None => None,
    };
    Ok((loaded, export_result))
}
