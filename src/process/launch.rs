//! Launching a target and building its command line

/// Quotes one argument so `CommandLineToArgvW` parses it back unchanged
pub fn quote_argument(argument: &str) -> String {
    let needs_quotes = argument.is_empty()
        || argument
            .chars()
            .any(|c| matches!(c, ' ' | '\t' | '\n' | '\x0B' | '"'));
    if !needs_quotes {
        return argument.to_string();
    }

    let mut quoted = String::with_capacity(argument.len() + 2);
    quoted.push('"');

    let mut backslashes = 0usize;
    for c in argument.chars() {
        match c {
            '\\' => backslashes += 1,
            '"' => {
                // Escape every pending backslash and the quote itself
                quoted.extend(std::iter::repeat('\\').take(backslashes * 2 + 1));
                quoted.push('"');
                backslashes = 0;
            }
            _ => {
                quoted.extend(std::iter::repeat('\\').take(backslashes));
                quoted.push(c);
                backslashes = 0;
            }
        }
    }
    // Backslashes before the closing quote must be doubled
    quoted.extend(std::iter::repeat('\\').take(backslashes * 2));
    quoted.push('"');
    quoted
}

/// Program path followed by its arguments, each quoted as needed
pub fn build_command_line<S: AsRef<str>>(program: &str, args: &[S]) -> String {
    let mut line = quote_argument(program);
    for arg in args {
        line.push(' ');
        line.push_str(&quote_argument(arg.as_ref()));
    }
    line
}

#[cfg(windows)]
pub use self::os::{LaunchOptions, LaunchedProcess};

#[cfg(windows)]
mod os {
    use super::build_command_line;
    use crate::core::types::{MemoryError, MemoryResult, ProcessId, ThreadId};
    use crate::process::context::acquire_privilege;
    use crate::process::handle::{ProcessAccess, ProcessHandle};
    use crate::process::ProcessContext;
    use crate::windows::bindings::kernel32;
    use crate::windows::types::Handle;
    use std::path::{Path, PathBuf};
    use tracing::{info, warn};

    /// How to start a new target
    #[derive(Debug, Clone)]
    pub struct LaunchOptions {
        pub path: PathBuf,
        /// Defaults to the executable's directory
        pub working_dir: Option<PathBuf>,
        pub args: Vec<String>,
        /// Start with the main thread suspended
        pub suspended: bool,
        pub enable_debug_privilege: bool,
    }

    impl LaunchOptions {
        pub fn new(path: impl Into<PathBuf>) -> Self {
            Self {
                path: path.into(),
                working_dir: None,
                args: Vec::new(),
                suspended: false,
                enable_debug_privilege: true,
            }
        }

        pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
            self.working_dir = Some(dir.into());
            self
        }

        pub fn args<I, S>(mut self, args: I) -> Self
        where
            I: IntoIterator<Item = S>,
            S: Into<String>,
        {
            self.args = args.into_iter().map(Into::into).collect();
            self
        }

        pub fn suspended(mut self, suspended: bool) -> Self {
            self.suspended = suspended;
            self
        }

        fn resolved_working_dir(&self) -> PathBuf {
            if let Some(dir) = &self.working_dir {
                return dir.clone();
            }
            match self.path.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
                _ => PathBuf::from("."),
            }
        }
    }

    /// A process started by the engine, with its main thread
    pub struct LaunchedProcess {
        context: ProcessContext,
        main_thread: Handle,
        thread_id: ThreadId,
        suspended: bool,
    }

    impl LaunchedProcess {
        pub fn context(&self) -> &ProcessContext {
            &self.context
        }

        pub fn pid(&self) -> ProcessId {
            self.context.pid()
        }

        pub fn thread_id(&self) -> ThreadId {
            self.thread_id
        }

        pub fn is_suspended(&self) -> bool {
            self.suspended
        }

        /// Lets the main thread run. Calling it on a running process does nothing.
        pub fn resume(&mut self) -> MemoryResult<()> {
            if !self.suspended {
                return Ok(());
            }
            unsafe { kernel32::resume_thread(self.main_thread.raw()) }
                .map_err(|e| e.to_memory_error(self.pid()))?;
            self.suspended = false;
            info!("Resumed PID {}", self.pid());
            Ok(())
        }

        pub fn terminate(&self, exit_code: u32) -> MemoryResult<()> {
            let process = self.context.raw_handle()?;
            unsafe { kernel32::terminate_process(process, exit_code) }
                .map_err(|e| e.to_memory_error(self.pid()))?;
            warn!("Terminated PID {}", self.pid());
            Ok(())
        }

        /// Drops the thread handle and keeps the attachment
        pub fn into_context(self) -> ProcessContext {
            self.context
        }
    }

    impl ProcessContext {
        /// Starts `options.path` and attaches to it
        pub fn launch(options: &LaunchOptions) -> MemoryResult<LaunchedProcess> {
            let path_text = options.path.display().to_string();
            if !options.path.is_file() {
                return Err(MemoryError::launch_failed(&path_text, "file not found"));
            }

            let privilege = acquire_privilege(options.enable_debug_privilege);
            let command_line = build_command_line(&path_text, &options.args);
            let working_dir = options.resolved_working_dir();
            let flags = if options.suspended {
                kernel32::CREATE_SUSPENDED
            } else {
                0
            };

            let info = kernel32::create_process(&options.path, &command_line, &working_dir, flags)
                .map_err(|e| MemoryError::launch_failed(&path_text, e.to_string()))?;

            // Own both handles before anything else can fail
            let process = Handle::from_raw(info.hProcess, "CreateProcessW")
                .map_err(|e| MemoryError::launch_failed(&path_text, e.to_string()))?;
            let main_thread = Handle::from_raw(info.hThread, "CreateProcessW")
                .map_err(|e| MemoryError::launch_failed(&path_text, e.to_string()))?;

            let handle = ProcessHandle::from_owned(process, info.dwProcessId, ProcessAccess::ALL_ACCESS);
            let context = ProcessContext::from_handle(handle, file_name(&options.path), privilege)?;

            info!(
                "Launched {} as PID {} ({}{})",
                path_text,
                context.pid(),
                context.architecture(),
                if options.suspended { ", suspended" } else { "" }
            );

            Ok(LaunchedProcess {
                context,
                main_thread,
                thread_id: info.dwThreadId,
                suspended: options.suspended,
            })
        }
    }

    fn file_name(path: &Path) -> String {
        path.file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string())
    }

}
