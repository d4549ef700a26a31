use super::codegen::{build_stub, RESULT_SLOT_SIZE};
use super::{CallDescriptor, CallResult, CallingConvention};
use crate::core::types::{Address, MemoryError, MemoryResult};
use crate::memory::{MemoryExt, ProtectionFlags, RemoteAllocation};
use crate::process::RemoteTarget;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Knobs for remote calls
#[derive(Debug, Clone)]
pub struct InvokeOptions {
    /// How long to wait for the remote thread
    pub timeout: Duration,
}

impl Default for InvokeOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(5000),
        }
    }
}

/// Runs functions inside one target
pub struct RemoteInvoker<'a, T: RemoteTarget + ?Sized> {
    target: &'a T,
    options: InvokeOptions,
}

impl<'a, T: RemoteTarget + ?Sized> RemoteInvoker<'a, T> {
    pub fn new(target: &'a T) -> Self {
        Self::with_options(target, InvokeOptions::default())
    }

    pub fn with_options(target: &'a T, options: InvokeOptions) -> Self {
        RemoteInvoker { target, options }
    }

    pub fn options(&self) -> &InvokeOptions {
        &self.options
    }

    /// Calls `function(args...)` and waits for it to return.
    ///
    /// `call.target` must lie in committed executable memory. On timeout the
    /// stub stays allocated because the thread may still be running it.
    pub fn invoke(&self, call: &CallDescriptor) -> MemoryResult<CallResult> {
        let architecture = self.target.architecture();
        let code = build_stub(architecture, call)?;

        if !self.target.can_execute(call.target) {
            return Err(MemoryError::InvalidAddress(format!(
                "call target {} is not committed executable memory",
                call.target
            )));
        }

        let allocation = RemoteAllocation::new(
            self.target,
            RESULT_SLOT_SIZE + code.len(),
            ProtectionFlags::execute_read_write(),
        )?;
        let slot = allocation.base();
        let entry = slot.add(RESULT_SLOT_SIZE)?;

        self.target.write(slot, &[0u8; RESULT_SLOT_SIZE])?;
        self.target.write(entry, &code)?;
        self.target.flush_instruction_cache(entry, code.len())?;

        debug!(
            "Invoking {} ({} args, {}) via stub at {}",
            call.target,
            call.args.len(),
            call.convention.resolve(architecture)?,
            entry
        );

        let thread_exit_code = match self.target.run_remote_thread(entry, slot, self.options.timeout) {
            Ok(code) => code,
            Err(e) if e.is_timeout() => {
                warn!("Call to {} timed out; leaving its stub in place", call.target);
                allocation.leak();
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        let return_value: u64 = self.target.read_value(slot)?;
        allocation.free()?;

        let result = CallResult {
            return_value,
            thread_exit_code,
        };
        info!("Call to {} returned {}", call.target, result);
        Ok(result)
    }

    /// Shorthand for [`invoke`](Self::invoke)
    pub fn call(
        &self,
        function: Address,
        args: &[u64],
        convention: CallingConvention,
    ) -> MemoryResult<CallResult> {
        self.invoke(&CallDescriptor {
            target: function,
            args: args.to_vec(),
            convention,
        })
    }
}
