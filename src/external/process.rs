//! Detection of a running Engine DJ instance
//!
//! Engine DJ keeps its library database open while it runs. Writing to it
//! from outside at the same time can corrupt it, so every write is preceded
//! by a look at the process table.

use sysinfo::System;

/// Executable names of Engine DJ: Windows, then macOS
const ENGINE_PROCESS_NAMES: &[&str] = &["Engine DJ.exe", "Engine DJ"];

pub trait ProcessWatch: Send {
    /// Description of the running Engine DJ process, None if it is not running
    fn running_engine(&mut self) -> Option<String>;
}

pub fn is_engine_process(name: &str) -> bool {
    let name = name.trim();
    ENGINE_PROCESS_NAMES
        .iter()
        .any(|candidate| name.eq_ignore_ascii_case(candidate))
}

/// Reads the live process table through sysinfo
pub struct SystemProcessWatch {
    system: System,
}

impl SystemProcessWatch {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }
}

impl Default for SystemProcessWatch {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessWatch for SystemProcessWatch {
    fn running_engine(&mut self) -> Option<String> {
        self.system.refresh_processes();
        let (pid, process) = self
            .system
            .processes()
            .iter()
            .find(|(_, process)| is_engine_process(process.name()))?;

        let found = format!("{} pid {}", process.name(), pid);
        log::warn!("Engine DJ process detected: {}", found);
        Some(found)
    }
}
