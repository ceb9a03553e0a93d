//! Journal of Engine DJ deletions still owed
//!
//! When a file has been trashed but its library record could not be
//! deleted, the path is written here and the deletion is retried at the
//! start of the next session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingDeletion {
    pub path: PathBuf,
    pub queued_at: DateTime<Utc>,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct PendingDeletions {
    /// None keeps the journal in memory only
    file: Option<PathBuf>,
    entries: Vec<PendingDeletion>,
}

impl PendingDeletions {
    pub const JOURNAL_FILE: &'static str = "pending_store_deletions.json";

    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load the journal at `file`; a missing file is an empty journal
    pub fn load(file: &Path) -> Result<Self, String> {
        let entries = if file.exists() {
            let contents = std::fs::read_to_string(file)
                .map_err(|e| format!("Failed to read pending deletions: {}", e))?;
            serde_json::from_str(&contents)
                .map_err(|e| format!("Failed to parse pending deletions: {}", e))?
        } else {
            Vec::new()
        };

        Ok(Self {
            file: Some(file.to_path_buf()),
            entries,
        })
    }

    /// Load the journal at `file`, setting an unreadable one aside as
    /// `<file>.corrupt` and starting empty
    pub fn open(file: &Path) -> Self {
        match Self::load(file) {
            Ok(journal) => journal,
            Err(e) => {
                let aside = corrupt_path(file);
                log::error!("{}; moving {:?} to {:?}", e, file, aside);
                if let Err(e) = std::fs::rename(file, &aside) {
                    log::warn!("Could not set aside {:?}: {}", file, e);
                }
                Self {
                    file: Some(file.to_path_buf()),
                    entries: Vec::new(),
                }
            }
        }
    }

    pub fn entries(&self) -> &[PendingDeletion] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record a deletion to retry, saved immediately. On a save failure the
    /// entry is dropped again so memory matches disk.
    pub fn push(&mut self, path: &Path, reason: impl Into<String>) -> Result<(), String> {
        if self.contains(path) {
            return Ok(());
        }
        self.entries.push(PendingDeletion {
            path: path.to_path_buf(),
            queued_at: Utc::now(),
            reason: reason.into(),
        });
        if let Err(e) = self.save() {
            self.entries.pop();
            return Err(e);
        }
        Ok(())
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.entries.iter().any(|e| e.path == path)
    }

    /// Drop the entry for `path`, if any
    pub fn remove(&mut self, path: &Path) -> Result<(), String> {
        self.retain(|e| e.path != path)
    }

    /// Keep only the entries for which `still_pending` returns true, then save
    pub fn retain(&mut self, mut still_pending: impl FnMut(&PendingDeletion) -> bool) -> Result<(), String> {
        let before = self.entries.len();
        self.entries.retain(|e| still_pending(e));
        if self.entries.len() != before {
            self.save()?;
        }
        Ok(())
    }

    pub fn save(&self) -> Result<(), String> {
        let Some(file) = &self.file else {
            return Ok(());
        };

        if self.entries.is_empty() {
            if file.exists() {
                std::fs::remove_file(file)
                    .map_err(|e| format!("Failed to remove pending deletions: {}", e))?;
            }
            return Ok(());
        }

        let json = serde_json::to_string_pretty(&self.entries)
            .map_err(|e| format!("Failed to serialize pending deletions: {}", e))?;
        std::fs::write(file, json)
            .map_err(|e| format!("Failed to write pending deletions: {}", e))?;

        log::debug!("Saved {} pending deletion(s) to {:?}", self.entries.len(), file);
        Ok(())
    }
}

fn corrupt_path(file: &Path) -> PathBuf {
    let mut name = file.as_os_str().to_os_string();
    name.push(".corrupt");
    PathBuf::from(name)
}
