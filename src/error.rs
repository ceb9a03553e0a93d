//! Error taxonomy for the audit pipeline
//!
//! Per-track errors (scan, waveform, decision path, notify) are contained to
//! the track that raised them. Only `StartupError` aborts a session.

use std::path::PathBuf;
use thiserror::Error;

use crate::core::Rating;

/// A file could not be read while building the work queue. Logged and skipped.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Cannot read '{path}': {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt or unreadable tag in '{path}': {reason}")]
    CorruptTag { path: PathBuf, reason: String },

    #[error("Cannot walk '{path}': {reason}")]
    Walk { path: PathBuf, reason: String },
}

impl ScanError {
    pub fn path(&self) -> &PathBuf {
        match self {
            ScanError::Unreadable { path, .. }
            | ScanError::CorruptTag { path, .. }
            | ScanError::Walk { path, .. } => path,
        }
    }
}

/// Decoding or analysis failed. The track stays reviewable without a waveform.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WaveformError {
    #[error("Failed to decode '{path}': {reason}")]
    Decode { path: PathBuf, reason: String },

    #[error("No audio samples in '{path}'")]
    Empty { path: PathBuf },

    #[error("Waveform job for '{path}' was cancelled")]
    Cancelled { path: PathBuf },
}

/// Writing tag fields back to a file failed.
#[derive(Debug, Error)]
pub enum TagWriteError {
    #[error("Failed to open '{path}' for tag update: {reason}")]
    Open { path: PathBuf, reason: String },

    #[error("Failed to save tag to '{path}': {reason}")]
    Save { path: PathBuf, reason: String },

    #[error("Failed to flush '{path}' to disk: {source}")]
    Sync {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Tag in '{path}' did not read back as written: {reason}")]
    Verify { path: PathBuf, reason: String },
}

/// The external DJ library database rejected an operation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Cannot open Engine DJ database '{path}': {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Engine DJ database not found at '{0}'")]
    NotFound(PathBuf),

    #[error("Engine DJ query failed: {0}")]
    Query(#[from] rusqlite::Error),

    #[error("Engine DJ is running ({0}); close it before its library is changed")]
    EngineRunning(String),
}

/// Moving a file to (or back from) the trash failed.
#[derive(Debug, Error)]
pub enum TrashError {
    #[error("File to trash does not exist: '{0}'")]
    Missing(PathBuf),

    #[error("Cannot restore '{0}': a file already exists there")]
    RestoreCollision(PathBuf),

    #[error("Trash operation on '{path}' failed: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("System trash refused '{path}': {reason}")]
    System { path: PathBuf, reason: String },

    #[error("Cannot restore '{0}' from this trash")]
    RestoreUnsupported(PathBuf),
}

/// Best-effort notification failure. Only ever logged.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Track '{0}' is missing artist or title, nothing to notify")]
    MissingIdentity(PathBuf),

    #[error("Notifier could not start: {0}")]
    Setup(String),
}

/// A Keep or Remove decision could not be completed. The track stays unseen.
#[derive(Debug, Error)]
pub enum DecisionError {
    #[error(transparent)]
    Tag(#[from] TagWriteError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Trash(#[from] TrashError),

    #[error("Cannot snapshot tags before decision: {0}")]
    Snapshot(#[from] ScanError),

    #[error(
        "Ratings disagree after keep for '{path}': expected {expected}, tag {tag:?}, store {store:?}"
    )]
    Inconsistent {
        path: PathBuf,
        expected: Rating,
        tag: Option<Rating>,
        store: Option<Rating>,
    },
}

/// Fatal conditions that abort startup with a diagnostic.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("None of the library roots are accessible: {}", display_paths(.0))]
    NoAccessibleRoots(Vec<PathBuf>),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to start waveform workers: {0}")]
    Workers(#[source] std::io::Error),
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| format!("'{}'", p.display()))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_error_path() {
        let err = ScanError::CorruptTag {
            path: PathBuf::from("/music/a.mp3"),
            reason: "bad frame".to_string(),
        };
        assert_eq!(err.path(), &PathBuf::from("/music/a.mp3"));
        assert!(err.to_string().contains("bad frame"));
    }

    #[test]
    fn test_no_accessible_roots_lists_every_root() {
        let err = StartupError::NoAccessibleRoots(vec![
            PathBuf::from("/missing/one"),
            PathBuf::from("/missing/two"),
        ]);
        let message = err.to_string();
        assert!(message.contains("'/missing/one'"));
        assert!(message.contains("'/missing/two'"));
    }

    #[test]
    fn test_decision_error_wraps_trash_error() {
        let err: DecisionError = TrashError::Missing(PathBuf::from("/x.mp3")).into();
        assert!(matches!(err, DecisionError::Trash(_)));
    }
}
