//! Small LRU cache for computed envelopes
//!
//! Keyed by path, with the modification time stored alongside: a lookup
//! with a different mtime finds the entry stale and drops it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use super::WaveformEnvelope;
use crate::core::EnvelopeKey;

struct CacheEntry {
    modified: SystemTime,
    envelope: Arc<WaveformEnvelope>,
    last_used: u64,
}

pub struct EnvelopeCache {
    capacity: usize,
    clock: u64,
    entries: HashMap<PathBuf, CacheEntry>,
}

impl EnvelopeCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            clock: 0,
            entries: HashMap::new(),
        }
    }

    #[cfg(test)]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Look up an envelope and mark it as consumed
    pub fn get(&mut self, key: &EnvelopeKey) -> Option<Arc<WaveformEnvelope>> {
        let now = self.tick();
        match self.entries.get_mut(&key.path) {
            Some(entry) if entry.modified == key.modified => {
                entry.last_used = now;
                Some(entry.envelope.clone())
            }
            Some(_) => {
                log::debug!("Discarding stale envelope for {}", key.path.display());
                self.entries.remove(&key.path);
                None
            }
            None => None,
        }
    }

    /// Check for a fresh entry without touching its recency
    pub fn contains(&self, key: &EnvelopeKey) -> bool {
        self.entries
            .get(&key.path)
            .is_some_and(|entry| entry.modified == key.modified)
    }

    pub fn insert(&mut self, key: EnvelopeKey, envelope: Arc<WaveformEnvelope>) {
        if !self.entries.contains_key(&key.path) {
            while self.entries.len() >= self.capacity {
                self.evict_least_recent();
            }
        }
        let now = self.tick();
        self.entries.insert(
            key.path,
            CacheEntry {
                modified: key.modified,
                envelope,
                last_used: now,
            },
        );
    }

    pub fn remove(&mut self, path: &Path) -> bool {
        self.entries.remove(path).is_some()
    }

    fn evict_least_recent(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_used)
            .map(|(path, _)| path.clone());

        if let Some(path) = oldest {
            log::trace!("Evicting envelope for {}", path.display());
            self.entries.remove(&path);
        }
    }
}
