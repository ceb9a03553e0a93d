//! Engine DJ library database adapter
//!
//! Engine DJ keys its `Track` rows by a path relative to the database,
//! `../<pool folder name>/<path inside the pool>`, and stores ratings as
//! `stars * 20` (0 for unrated). Only `rating` is ever updated; the other
//! columns are left alone. No write happens while Engine DJ itself is running.

use std::path::{Component, Path, PathBuf};

use rusqlite::{params, Connection, OpenFlags, OptionalExtension};

use super::process::{ProcessWatch, SystemProcessWatch};
use crate::core::state::MissingRecordPolicy;
use crate::core::Rating;
use crate::error::StoreError;

/// A row in Engine DJ's `Track` table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalRecord {
    pub id: i64,
    pub rating: Option<Rating>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Updated,
    Created,
    /// No record, and the policy says not to make one
    Skipped,
    /// The path is not tracked by this store at all
    Unmanaged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    Absent,
}

/// Single-writer access to an external DJ library
pub trait LibraryStore: Send {
    fn lookup(&self, path: &Path) -> Result<Option<ExternalRecord>, StoreError>;

    fn upsert(
        &mut self,
        path: &Path,
        rating: Rating,
        policy: MissingRecordPolicy,
    ) -> Result<UpsertOutcome, StoreError>;

    /// Undo an upsert: put back `previous`, or drop a row that did not exist before
    fn restore(&mut self, path: &Path, previous: Option<&ExternalRecord>) -> Result<(), StoreError>;

    /// Remove the record if present. Repeating it is harmless.
    fn delete(&mut self, path: &Path) -> Result<DeleteOutcome, StoreError>;
}

/// Convert stars to the stored value
pub fn to_db_rating(rating: Option<Rating>) -> i64 {
    rating.map(|r| i64::from(r.stars()) * 20).unwrap_or(0)
}

/// Convert a stored value to stars, rounding to the nearest star
pub fn from_db_rating(value: i64) -> Option<Rating> {
    if value <= 0 {
        return None;
    }
    let stars = ((value + 10) / 20).clamp(1, i64::from(Rating::MAX));
    Rating::new(stars as u8)
}

pub struct EngineDjStore {
    conn: Connection,
    pool_folder: PathBuf,
    watch: Box<dyn ProcessWatch>,
}

impl EngineDjStore {
    /// Open an existing Engine DJ database. It is never created.
    pub fn open(db_path: &Path, pool_folder: &Path) -> Result<Self, StoreError> {
        Self::open_with_watch(db_path, pool_folder, Box::new(SystemProcessWatch::new()))
    }

    pub fn open_with_watch(
        db_path: &Path,
        pool_folder: &Path,
        mut watch: Box<dyn ProcessWatch>,
    ) -> Result<Self, StoreError> {
        if !db_path.is_file() {
            return Err(StoreError::NotFound(db_path.to_path_buf()));
        }

        let open_err = |source| StoreError::Open {
            path: db_path.to_path_buf(),
            source,
        };

        let conn = Connection::open_with_flags(db_path, OpenFlags::SQLITE_OPEN_READ_WRITE)
            .map_err(open_err)?;
        conn.execute_batch("PRAGMA busy_timeout = 5000;")
            .map_err(open_err)?;

        // Fail now rather than on the first decision if this is not an Engine DJ library
        conn.prepare("SELECT id, path, rating FROM Track LIMIT 1")
            .map_err(open_err)?;

        log::info!(
            "Opened Engine DJ database {} (pool folder {})",
            db_path.display(),
            pool_folder.display()
        );
        if watch.running_engine().is_some() {
            log::warn!("Engine DJ is running; ratings and deletions will fail until it is closed");
        }

        Ok(Self {
            conn,
            pool_folder: pool_folder.to_path_buf(),
            watch,
        })
    }

    fn ensure_engine_closed(&mut self) -> Result<(), StoreError> {
        match self.watch.running_engine() {
            Some(process) => Err(StoreError::EngineRunning(process)),
            None => Ok(()),
        }
    }

    /// The store-relative path for an absolute file path, None outside the pool
    pub fn db_path_for(&self, path: &Path) -> Option<String> {
        relative_db_path(&self.pool_folder, path)
    }

    fn record_for(&self, db_path: &str) -> Result<Option<ExternalRecord>, StoreError> {
        let record = self
            .conn
            .query_row(
                "SELECT id, rating FROM Track WHERE path = ?1 ORDER BY id LIMIT 1",
                params![db_path],
                |row| {
                    Ok(ExternalRecord {
                        id: row.get(0)?,
                        rating: from_db_rating(row.get::<_, Option<i64>>(1)?.unwrap_or(0)),
                    })
                },
            )
            .optional()?;
        Ok(record)
    }
}

pub(crate) fn relative_db_path(pool_folder: &Path, path: &Path) -> Option<String> {
    let pool_name = pool_folder.file_name()?.to_string_lossy();
    let relative = path.strip_prefix(pool_folder).ok()?;

    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy()),
            _ => return None,
        }
    }
    if parts.is_empty() {
        return None;
    }
    Some(format!("../{}/{}", pool_name, parts.join("/")))
}

impl LibraryStore for EngineDjStore {
    fn lookup(&self, path: &Path) -> Result<Option<ExternalRecord>, StoreError> {
        match self.db_path_for(path) {
            Some(db_path) => self.record_for(&db_path),
            None => Ok(None),
        }
    }

    fn upsert(
        &mut self,
        path: &Path,
        rating: Rating,
        policy: MissingRecordPolicy,
    ) -> Result<UpsertOutcome, StoreError> {
        let Some(db_path) = self.db_path_for(path) else {
            log::debug!("Not in DJ pool folder, leaving Engine DJ alone: {}", path.display());
            return Ok(UpsertOutcome::Unmanaged);
        };
        self.ensure_engine_closed()?;

        let tx = self.conn.transaction()?;
        let existing: Option<i64> = tx
            .query_row(
                "SELECT id FROM Track WHERE path = ?1 ORDER BY id LIMIT 1",
                params![db_path],
                |row| row.get(0),
            )
            .optional()?;

        let outcome = match (existing, policy) {
            (Some(id), _) => {
                tx.execute(
                    "UPDATE Track SET rating = ?1 WHERE id = ?2",
                    params![to_db_rating(Some(rating)), id],
                )?;
                UpsertOutcome::Updated
            }
            (None, MissingRecordPolicy::CreateIfMissing) => {
                let filename = path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                tx.execute(
                    "INSERT INTO Track (path, filename, rating) VALUES (?1, ?2, ?3)",
                    params![db_path, filename, to_db_rating(Some(rating))],
                )?;
                UpsertOutcome::Created
            }
            (None, MissingRecordPolicy::SkipIfMissing) => UpsertOutcome::Skipped,
        };
        tx.commit()?;

        match outcome {
            UpsertOutcome::Updated => {
                log::info!("Updated Engine DJ rating for {} to {} stars", db_path, rating)
            }
            UpsertOutcome::Created => {
                log::info!("Created Engine DJ record for {} with {} stars", db_path, rating)
            }
            _ => log::debug!("Track not found in Engine DJ: {}", db_path),
        }
        Ok(outcome)
    }

    fn restore(&mut self, path: &Path, previous: Option<&ExternalRecord>) -> Result<(), StoreError> {
        let Some(db_path) = self.db_path_for(path) else {
            return Ok(());
        };
        self.ensure_engine_closed()?;

        match previous {
            Some(record) => {
                self.conn.execute(
                    "UPDATE Track SET rating = ?1 WHERE id = ?2",
                    params![to_db_rating(record.rating), record.id],
                )?;
            }
            None => {
                self.conn
                    .execute("DELETE FROM Track WHERE path = ?1", params![db_path])?;
            }
        }
        log::info!("Restored Engine DJ record for {}", db_path);
        Ok(())
    }

    fn delete(&mut self, path: &Path) -> Result<DeleteOutcome, StoreError> {
        let Some(db_path) = self.db_path_for(path) else {
            return Ok(DeleteOutcome::Absent);
        };
        self.ensure_engine_closed()?;

        let deleted = self
            .conn
            .execute("DELETE FROM Track WHERE path = ?1", params![db_path])?;
        if deleted > 0 {
            log::info!("Deleted {} record(s) from Engine DJ for {}", deleted, db_path);
            Ok(DeleteOutcome::Deleted)
        } else {
            log::debug!("No Engine DJ record to delete for {}", db_path);
            Ok(DeleteOutcome::Absent)
        }
    }
}

/// Stand-in used when no Engine DJ database is configured
#[derive(Debug, Default, Clone, Copy)]
pub struct NoExternalStore;

impl LibraryStore for NoExternalStore {
    fn lookup(&self, _path: &Path) -> Result<Option<ExternalRecord>, StoreError> {
        Ok(None)
    }

    fn upsert(
        &mut self,
        _path: &Path,
        _rating: Rating,
        _policy: MissingRecordPolicy,
    ) -> Result<UpsertOutcome, StoreError> {
        Ok(UpsertOutcome::Unmanaged)
    }

    fn restore(&mut self, _path: &Path, _previous: Option<&ExternalRecord>) -> Result<(), StoreError> {
        Ok(())
    }

    fn delete(&mut self, _path: &Path) -> Result<DeleteOutcome, StoreError> {
        Ok(DeleteOutcome::Absent)
    }
}
