//! Keep and Remove decisions across the tag and the Engine DJ library
//!
//! Keep is a sequence of steps, each with a compensating action: if any step
//! fails, the tag rating and the library record are put back the way they
//! were and the track stays unseen. Remove trashes the file first; the
//! library deletion and the notice afterwards never undo it.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::audio::{FieldChange, MetadataCodec, TagFields, TagUpdate};
use crate::core::state::MissingRecordPolicy;
use crate::core::{Rating, ResumeMarker, ResumeStateManager, Track};
use crate::error::{DecisionError, TagWriteError};
use crate::external::{
    DeleteOutcome, ExternalRecord, LibraryStore, NotifyDispatch, NotifyStats, Notifier,
    PendingDeletions, TrashMover, TrashedFile, UpsertOutcome,
};

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub policy: MissingRecordPolicy,
    pub default_rating: Rating,
    pub marker_value: String,
}

/// Ratings that disagreed before a Keep overwrote them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RatingDiscrepancy {
    pub tag: Option<Rating>,
    pub store: Option<Rating>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeepOutcome {
    pub rating: Rating,
    /// No rating had been chosen, the default was applied
    pub used_default: bool,
    pub store: UpsertOutcome,
    pub discrepancy: Option<RatingDiscrepancy>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreRemoval {
    Deleted,
    Absent,
    /// Deletion failed and was written to the journal for the next run
    Journaled,
    /// Deletion failed and the journal could not be written either; the
    /// record stays in the library until removed by hand
    Lost,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoveOutcome {
    pub trashed: TrashedFile,
    pub store: StoreRemoval,
    /// None when the notice could not be sent
    pub notified: Option<NotifyDispatch>,
}

/// State captured before a Keep touches anything
struct KeepSnapshot {
    fields: TagFields,
    record: Option<ExternalRecord>,
}

pub struct DecisionEngine {
    codec: Arc<dyn MetadataCodec>,
    store: Box<dyn LibraryStore>,
    trash: Box<dyn TrashMover>,
    notifier: Box<dyn Notifier>,
    journal: PendingDeletions,
    resume: ResumeStateManager,
    options: EngineOptions,
}

impl DecisionEngine {
    pub fn new(
        codec: Arc<dyn MetadataCodec>,
        store: Box<dyn LibraryStore>,
        trash: Box<dyn TrashMover>,
        notifier: Box<dyn Notifier>,
        journal: PendingDeletions,
        options: EngineOptions,
    ) -> Self {
        let resume = ResumeStateManager::new(codec.clone(), options.marker_value.clone());
        Self {
            codec,
            store,
            trash,
            notifier,
            journal,
            resume,
            options,
        }
    }

    pub fn pending_deletions(&self) -> &PendingDeletions {
        &self.journal
    }

    pub fn notify_stats(&self) -> Option<Arc<NotifyStats>> {
        self.notifier.stats()
    }

    /// Set the in-memory rating. Nothing is written until Keep.
    pub fn apply_rating(&self, track: &mut Track, rating: Rating) {
        log::debug!("Rating {} set to {}", track.path.display(), rating);
        track.rating = Some(rating);
    }

    /// Persist the rating to both stores, verify them, then mark the track decided
    pub fn keep(&mut self, track: &mut Track) -> Result<KeepOutcome, DecisionError> {
        let path = track.path.clone();
        let (rating, used_default) = match track.rating {
            Some(r) => (r, false),
            None => (self.options.default_rating, true),
        };
        if used_default {
            log::info!(
                "No rating chosen for {}, using default of {}",
                path.display(),
                rating
            );
        }

        let snapshot = KeepSnapshot {
            fields: self.codec.read(&path)?,
            record: self.store.lookup(&path)?,
        };
        let discrepancy = snapshot.record.as_ref().and_then(|record| {
            let tag = snapshot.fields.rating.rating();
            (record.rating != tag).then_some(RatingDiscrepancy {
                tag,
                store: record.rating,
            })
        });
        if let Some(d) = &discrepancy {
            log::warn!(
                "Rating mismatch before keep for {}: tag {:?}, Engine DJ {:?}; overwriting with {}",
                path.display(),
                d.tag.map(Rating::stars),
                d.store.map(Rating::stars),
                rating
            );
        }

        if let Err(e) = self.codec.write(&path, &TagUpdate::rating(rating)) {
            self.compensate(&path, &snapshot, false, false);
            return Err(e.into());
        }

        let store_outcome = match self.store.upsert(&path, rating, self.options.policy) {
            Ok(outcome) => outcome,
            Err(e) => {
                self.compensate(&path, &snapshot, false, false);
                return Err(e.into());
            }
        };
        let store_touched = matches!(store_outcome, UpsertOutcome::Updated | UpsertOutcome::Created);

        if let Err(e) = self.verify(&path, rating, store_outcome) {
            self.compensate(&path, &snapshot, store_touched, false);
            return Err(e);
        }

        if let Err(e) = self.resume.mark_decided(&path) {
            self.compensate(&path, &snapshot, store_touched, true);
            return Err(e.into());
        }

        track.rating = Some(rating);
        track.tag_rating = Some(rating);
        track.marker = ResumeMarker::Decided;

        log::info!(
            "Kept {} at {} stars (Engine DJ: {:?})",
            path.display(),
            rating,
            store_outcome
        );
        Ok(KeepOutcome {
            rating,
            used_default,
            store: store_outcome,
            discrepancy,
        })
    }

    /// Read both stores back and check they hold `rating`
    fn verify(
        &self,
        path: &Path,
        rating: Rating,
        store_outcome: UpsertOutcome,
    ) -> Result<(), DecisionError> {
        let tag = self
            .codec
            .read(path)
            .map_err(|e| TagWriteError::Verify {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?
            .rating
            .rating();

        let (store, store_ok) = match store_outcome {
            UpsertOutcome::Updated | UpsertOutcome::Created => {
                let store = self.store.lookup(path)?.and_then(|r| r.rating);
                (store, store == Some(rating))
            }
            // The record must really be absent for skipping to be acceptable
            UpsertOutcome::Skipped => {
                let record = self.store.lookup(path)?;
                (record.as_ref().and_then(|r| r.rating), record.is_none())
            }
            UpsertOutcome::Unmanaged => (None, true),
        };

        if tag != Some(rating) || !store_ok {
            return Err(DecisionError::Inconsistent {
                path: path.to_path_buf(),
                expected: rating,
                tag,
                store,
            });
        }
        Ok(())
    }

    /// Put the tag rating (and the store record, if it was touched) back
    fn compensate(
        &mut self,
        path: &Path,
        snapshot: &KeepSnapshot,
        restore_store: bool,
        restore_marker: bool,
    ) {
        let rating = TagUpdate::restore_rating(snapshot.fields.rating.rating());
        if let Err(e) = self.codec.write(path, &rating) {
            log::error!("Failed to restore rating of {} after failed keep: {}", path.display(), e);
        }

        // Separate write: the marker frame may be the one that cannot be written
        if restore_marker {
            let marker = TagUpdate {
                marker: match &snapshot.fields.marker {
                    Some(previous) => FieldChange::Set(previous.clone()),
                    None => FieldChange::Clear,
                },
                ..Default::default()
            };
            if let Err(e) = self.codec.write(path, &marker) {
                log::error!("Failed to restore marker of {} after failed keep: {}", path.display(), e);
            }
        }

        if restore_store && let Err(e) = self.store.restore(path, snapshot.record.as_ref()) {
            log::error!(
                "Failed to restore Engine DJ record of {} after failed keep: {}",
                path.display(),
                e
            );
        }
        log::warn!("Keep rolled back for {}", path.display());
    }

    /// Trash the file, drop its library record, and send the deletion notice
    pub fn remove(&mut self, track: &Track) -> Result<RemoveOutcome, DecisionError> {
        let trashed = self.trash.move_to_trash(&track.path)?;

        let store = match self.store.delete(&track.path) {
            Ok(DeleteOutcome::Deleted) => StoreRemoval::Deleted,
            Ok(DeleteOutcome::Absent) => StoreRemoval::Absent,
            Err(e) => {
                log::error!(
                    "Engine DJ deletion failed for {}, will retry next run: {}",
                    track.path.display(),
                    e
                );
                match self.journal.push(&track.path, e.to_string()) {
                    Ok(()) => StoreRemoval::Journaled,
                    Err(journal_err) => {
                        log::error!(
                            "Could not record pending deletion of {}; remove it from Engine DJ by hand: {}",
                            track.path.display(),
                            journal_err
                        );
                        StoreRemoval::Lost
                    }
                }
            }
        };

        let notified = match self.notifier.notify(&track.summary()) {
            Ok(dispatch) => Some(dispatch),
            Err(e) => {
                log::warn!("Deletion notice not sent: {}", e);
                None
            }
        };

        log::info!("Removed {}", track.path.display());
        Ok(RemoveOutcome {
            trashed,
            store,
            notified,
        })
    }

    /// Bring a removed file back from the trash. A deletion still owed to
    /// the library is dropped from the journal; a record already deleted and
    /// a notice already sent stay that way.
    pub fn undo_remove(&mut self, trashed: &TrashedFile) -> Result<(), DecisionError> {
        self.trash.restore(trashed)?;
        if self.journal.contains(&trashed.original)
            && let Err(e) = self.journal.remove(&trashed.original)
        {
            log::error!("Could not update pending deletions: {}", e);
        }
        log::info!("Undid remove of {}", trashed.original.display());
        Ok(())
    }

    /// Replay Engine DJ deletions that failed in earlier runs; returns how many cleared
    pub fn retry_pending_deletions(&mut self) -> usize {
        if self.journal.is_empty() {
            return 0;
        }

        let paths: Vec<PathBuf> = self.journal.entries().iter().map(|e| e.path.clone()).collect();
        let mut cleared: HashSet<PathBuf> = HashSet::new();
        for path in paths {
            match self.store.delete(&path) {
                Ok(_) => {
                    cleared.insert(path);
                }
                Err(e) => log::warn!("Pending deletion still failing for {}: {}", path.display(), e),
            }
        }

        if let Err(e) = self.journal.retain(|entry| !cleared.contains(&entry.path)) {
            log::error!("Could not update pending deletions: {}", e);
        }
        log::info!(
            "Retried pending deletions: {} cleared, {} remaining",
            cleared.len(),
            self.journal.entries().len()
        );
        cleared.len()
    }
}
