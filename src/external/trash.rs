//! Reversible file removal
//!
//! `SystemTrash` hands files to the operating system's trash (Recycle Bin,
//! macOS Trash, or the freedesktop trash of the file's own mount).
//! `DirectoryTrash` is a private trash folder with the freedesktop layout:
//! `<trash>/files/<name>` holds the file and `<trash>/info/<name>.trashinfo`
//! records where it came from. Names are made unique; nothing already in the
//! trash is ever overwritten.

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::error::TrashError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrashLocation {
    /// Inside a private trash folder
    Directory { file: PathBuf, info: PathBuf },
    /// Handed to the operating system's trash
    System,
}

impl fmt::Display for TrashLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrashLocation::Directory { file, .. } => write!(f, "{}", file.display()),
            TrashLocation::System => write!(f, "the system trash"),
        }
    }
}

/// Where a trashed file went
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrashedFile {
    pub original: PathBuf,
    pub location: TrashLocation,
}

pub trait TrashMover: Send {
    fn move_to_trash(&mut self, path: &Path) -> Result<TrashedFile, TrashError>;

    /// Put a trashed file back. Fails if something now occupies the original path.
    fn restore(&mut self, trashed: &TrashedFile) -> Result<(), TrashError>;
}

/// The operating system's trash, through the `trash` crate
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTrash;

impl TrashMover for SystemTrash {
    fn move_to_trash(&mut self, path: &Path) -> Result<TrashedFile, TrashError> {
        if !path.is_file() {
            return Err(TrashError::Missing(path.to_path_buf()));
        }
        trash::delete(path).map_err(|e| TrashError::System {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        log::info!("Moved to system trash: {}", path.display());
        Ok(TrashedFile {
            original: path.to_path_buf(),
            location: TrashLocation::System,
        })
    }

    #[cfg(any(
        target_os = "windows",
        all(
            unix,
            not(target_os = "macos"),
            not(target_os = "ios"),
            not(target_os = "android")
        )
    ))]
    fn restore(&mut self, trashed: &TrashedFile) -> Result<(), TrashError> {
        if trashed.original.exists() {
            return Err(TrashError::RestoreCollision(trashed.original.clone()));
        }
        let system_err = |e: trash::Error| TrashError::System {
            path: trashed.original.clone(),
            reason: e.to_string(),
        };

        // Most recent entry for this path
        let item = trash::os_limited::list()
            .map_err(system_err)?
            .into_iter()
            .filter(|item| item.original_path() == trashed.original)
            .max_by_key(|item| item.time_deleted)
            .ok_or_else(|| TrashError::Missing(trashed.original.clone()))?;

        trash::os_limited::restore_all([item]).map_err(system_err)?;
        log::info!("Restored from system trash: {}", trashed.original.display());
        Ok(())
    }

    #[cfg(not(any(
        target_os = "windows",
        all(
            unix,
            not(target_os = "macos"),
            not(target_os = "ios"),
            not(target_os = "android")
        )
    )))]
    fn restore(&mut self, trashed: &TrashedFile) -> Result<(), TrashError> {
        Err(TrashError::RestoreUnsupported(trashed.original.clone()))
    }
}

/// A private trash folder, used when one is configured
#[derive(Debug, Clone)]
pub struct DirectoryTrash {
    root: PathBuf,
}

impl DirectoryTrash {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn files_dir(&self) -> PathBuf {
        self.root.join("files")
    }

    fn info_dir(&self) -> PathBuf {
        self.root.join("info")
    }

    /// Claim a free name by creating its info file exclusively
    fn reserve_name(&self, path: &Path) -> Result<(String, fs::File, PathBuf), TrashError> {
        let io_err = |source| TrashError::Io {
            path: path.to_path_buf(),
            source,
        };

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| TrashError::Missing(path.to_path_buf()))?;
        let (stem, ext) = split_name(&file_name);

        for attempt in 0u32.. {
            let candidate = match (attempt, ext) {
                (0, _) => file_name.clone(),
                (n, Some(ext)) => format!("{}.{}.{}", stem, n, ext),
                (n, None) => format!("{}.{}", stem, n),
            };
            if self.files_dir().join(&candidate).exists() {
                continue;
            }

            let info_path = self.info_dir().join(format!("{}.trashinfo", candidate));
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&info_path)
            {
                Ok(file) => return Ok((candidate, file, info_path)),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(io_err(e)),
            }
        }
        Err(io_err(io::Error::other("no free trash name")))
    }
}

fn split_name(file_name: &str) -> (&str, Option<&str>) {
    match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (file_name, None),
    }
}

/// Percent-encode a path for the `Path=` key, keeping `/` and unreserved bytes
fn encode_path(path: &Path) -> String {
    let mut out = String::new();
    for byte in path.to_string_lossy().bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

/// Rename, falling back to copy and delete across filesystems
fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
            fs::copy(from, to)?;
            fs::File::open(to)?.sync_all()?;
            fs::remove_file(from)
        }
        Err(e) => Err(e),
    }
}

impl TrashMover for DirectoryTrash {
    fn move_to_trash(&mut self, path: &Path) -> Result<TrashedFile, TrashError> {
        if !path.is_file() {
            return Err(TrashError::Missing(path.to_path_buf()));
        }
        let io_err = |source| TrashError::Io {
            path: path.to_path_buf(),
            source,
        };

        fs::create_dir_all(self.files_dir()).map_err(io_err)?;
        fs::create_dir_all(self.info_dir()).map_err(io_err)?;

        let (name, mut info_file, info_path) = self.reserve_name(path)?;
        let info = format!(
            "[Trash Info]\nPath={}\nDeletionDate={}\n",
            encode_path(path),
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S")
        );

        let written = info_file
            .write_all(info.as_bytes())
            .and_then(|_| info_file.sync_all());
        let location = self.files_dir().join(&name);
        let moved = written.and_then(|_| move_file(path, &location));

        if let Err(e) = moved {
            let _ = fs::remove_file(&info_path);
            return Err(io_err(e));
        }

        log::info!("Moved to trash: {} -> {}", path.display(), location.display());
        Ok(TrashedFile {
            original: path.to_path_buf(),
            location: TrashLocation::Directory {
                file: location,
                info: info_path,
            },
        })
    }

    fn restore(&mut self, trashed: &TrashedFile) -> Result<(), TrashError> {
        let TrashLocation::Directory { file, info } = &trashed.location else {
            return Err(TrashError::RestoreUnsupported(trashed.original.clone()));
        };
        if trashed.original.exists() {
            return Err(TrashError::RestoreCollision(trashed.original.clone()));
        }
        if !file.is_file() {
            return Err(TrashError::Missing(file.clone()));
        }
        let io_err = |source| TrashError::Io {
            path: trashed.original.clone(),
            source,
        };

        if let Some(parent) = trashed.original.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        move_file(file, &trashed.original).map_err(io_err)?;

        if let Err(e) = fs::remove_file(info) {
            log::warn!(
                "Restored {} but could not remove {}: {}",
                trashed.original.display(),
                info.display(),
                e
            );
        }
        log::info!("Restored from trash: {}", trashed.original.display());
        Ok(())
    }
}
