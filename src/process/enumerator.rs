//! Process lookup through a ToolHelp32 snapshot

use crate::core::types::{MemoryResult, ProcessId};
use crate::windows::types::Handle;
use crate::windows::utils::wide_to_string;
use std::mem;
use winapi::shared::minwindef::FALSE;
use winapi::um::tlhelp32::{
    CreateToolhelp32Snapshot, Process32FirstW, Process32NextW, PROCESSENTRY32W,
    TH32CS_SNAPPROCESS,
};

/// One process as listed by the snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEntry {
    pub pid: ProcessId,
    pub parent_pid: ProcessId,
    pub name: String,
}

impl ProcessEntry {
    /// Case-insensitive executable-name match
    pub fn name_matches(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

/// Iterates a point-in-time process snapshot
pub struct ProcessEnumerator {
    snapshot: Handle,
    started: bool,
}

impl ProcessEnumerator {
    pub fn new() -> MemoryResult<Self> {
        let raw = unsafe { CreateToolhelp32Snapshot(TH32CS_SNAPPROCESS, 0) };
        let snapshot =
            Handle::from_raw(raw, "CreateToolhelp32Snapshot").map_err(|e| e.to_memory_error(0))?;
        Ok(ProcessEnumerator {
            snapshot,
            started: false,
        })
    }
}

impl Iterator for ProcessEnumerator {
    type Item = ProcessEntry;

    fn next(&mut self) -> Option<Self::Item> {
        unsafe {
            let mut entry: PROCESSENTRY32W = mem::zeroed();
            entry.dwSize = mem::size_of::<PROCESSENTRY32W>() as u32;

            let success = if self.started {
                Process32NextW(self.snapshot.raw(), &mut entry)
            } else {
                self.started = true;
                Process32FirstW(self.snapshot.raw(), &mut entry)
            };
            if success == FALSE {
                return None;
            }

            Some(ProcessEntry {
                pid: entry.th32ProcessID,
                parent_pid: entry.th32ParentProcessID,
                name: wide_to_string(&entry.szExeFile),
            })
        }
    }
}

/// First process whose executable name matches, case-insensitively
pub fn find_process_by_name(name: &str) -> MemoryResult<Option<ProcessEntry>> {
    Ok(ProcessEnumerator::new()?.find(|entry| entry.name_matches(name)))
}
