//! Export address lookup inside a target

use crate::core::types::{Address, MemoryError, MemoryResult, ModuleInfo};
use crate::pe::{parse_exports_in_memory, Symbol};
use crate::process::{find_module_by_name, RemoteTarget};
use tracing::debug;

/// Longest forwarder chain followed before giving up
pub const MAX_FORWARD_DEPTH: usize = 8;

/// Address of `symbol` exported by the loaded module named `module`
pub fn find_procedure<T: RemoteTarget + ?Sized>(
    target: &T,
    module: &str,
    symbol: &Symbol,
) -> MemoryResult<Address> {
    let modules = target.modules()?;
    let info = find_module_by_name(&modules, module)
        .ok_or_else(|| MemoryError::ModuleNotFound(module.to_string()))?;
    resolve(target, info.clone(), symbol.clone(), Some(modules))
}

/// Address of `symbol` in an already located module
pub fn find_export_address<T: RemoteTarget + ?Sized>(
    target: &T,
    module: &ModuleInfo,
    symbol: &Symbol,
) -> MemoryResult<Address> {
    resolve(target, module.clone(), symbol.clone(), None)
}

fn resolve<T: RemoteTarget + ?Sized>(
    target: &T,
    mut module: ModuleInfo,
    mut symbol: Symbol,
    mut modules: Option<Vec<ModuleInfo>>,
) -> MemoryResult<Address> {
    for _ in 0..=MAX_FORWARD_DEPTH {
        let exports = parse_exports_in_memory(target, &module)?;
        let entry = exports
            .find(&symbol)
            .ok_or_else(|| MemoryError::export_not_found(&module.name, &symbol))?;

        let forwarder = match &entry.forwarder {
            None => return Ok(entry.address(module.base_address)),
            Some(forwarder) => forwarder.clone(),
        };
        debug!("{}!{} forwards to {}", module.name, symbol, forwarder);

        // The module list is only needed once something is forwarded
        let list = match modules.take() {
            Some(list) => list,
            None => target.modules()?,
        };
        module = find_module_by_name(&list, &forwarder.module)
            .cloned()
            .ok_or_else(|| {
                MemoryError::ModuleNotFound(format!(
                    "{} (forwarded from {}!{})",
                    forwarder.module, module.name, symbol
                ))
            })?;
        modules = Some(list);
        symbol = forwarder.symbol;
    }

    Err(MemoryError::PeParse(format!(
        "forwarder chain for {} is deeper than {}",
        symbol, MAX_FORWARD_DEPTH
    )))
}
