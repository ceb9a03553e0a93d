//! Test fixtures for tag, scan and decision tests
//!
//! Synthesizes small silent MP3 files (no encoder needed) and provides
//! in-memory stand-ins for the codec, library store, trash and notifier
//! with switchable failures.

#![cfg(test)]

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use lofty::id3::v2::{Frame, FrameFlags, FrameValue, Id3v2Tag, Popularimeter};
use lofty::{Accessor, TagExt};

use crate::audio::{FieldChange, MetadataCodec, RatingField, TagFields, TagUpdate};
use crate::core::state::MissingRecordPolicy;
use crate::core::{Rating, TrackSummary};
use crate::error::{NotifyError, ScanError, StoreError, TagWriteError, TrashError};
use crate::external::process::ProcessWatch;
use crate::external::{
    DeleteOutcome, ExternalRecord, LibraryStore, NotifyDispatch, Notifier, TrashLocation,
    TrashMover, TrashedFile, UpsertOutcome,
};

/// MPEG-1 Layer III, 128 kbps, 44.1 kHz, mono, no CRC
const FRAME_HEADER: [u8; 4] = [0xFF, 0xFB, 0x90, 0xC0];
const FRAME_LEN: usize = 417;

/// Write `frames` frames of digital silence (1152 samples each)
pub fn write_silent_mp3(path: &Path, frames: usize) {
    let mut data = Vec::with_capacity(frames * FRAME_LEN);
    for _ in 0..frames {
        let start = data.len();
        data.resize(start + FRAME_LEN, 0);
        data[start..start + 4].copy_from_slice(&FRAME_HEADER);
    }
    std::fs::write(path, data).expect("Failed to write fixture mp3");
}

#[derive(Debug, Clone, Default)]
pub struct FixtureTags<'a> {
    pub title: Option<&'a str>,
    pub artist: Option<&'a str>,
    pub genre: Option<&'a str>,
    pub year: Option<u32>,
    /// Written verbatim into TXXX:RATING
    pub raw_rating: Option<&'a str>,
    /// POPM frame as (email, rating byte)
    pub popm: Option<(&'a str, u8)>,
}

/// Write a silent mp3 carrying an ID3v2 tag with the given fields
pub fn write_tagged_mp3(path: &Path, tags: &FixtureTags) {
    write_silent_mp3(path, 8);

    let mut tag = Id3v2Tag::new();
    if let Some(title) = tags.title {
        tag.set_title(title.to_string());
    }
    if let Some(artist) = tags.artist {
        tag.set_artist(artist.to_string());
    }
    if let Some(genre) = tags.genre {
        tag.set_genre(genre.to_string());
    }
    if let Some(year) = tags.year {
        tag.set_year(year);
    }
    if let Some(rating) = tags.raw_rating {
        tag.insert_user_text("RATING".to_string(), rating.to_string());
    }
    if let Some((email, rating)) = tags.popm {
        let value = FrameValue::Popularimeter(Popularimeter {
            email: email.to_string(),
            rating,
            counter: 0,
        });
        tag.insert(Frame::new("POPM", value, FrameFlags::default()).expect("POPM frame"));
    }
    tag.save_to_path(path).expect("Failed to tag fixture mp3");
}

fn injected_store_error() -> StoreError {
    StoreError::Query(rusqlite::Error::SqliteFailure(
        rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
        Some("database is locked".to_string()),
    ))
}

// ---------------------------------------------------------------------------
// Metadata codec
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemoryCodecState {
    files: HashMap<PathBuf, TagFields>,
    failing_reads: HashSet<PathBuf>,
    fail_rating_writes: bool,
    fail_marker_writes: bool,
    write_count: usize,
}

/// Tags held in memory, keyed by path
#[derive(Default)]
pub struct MemoryCodec {
    state: Mutex<MemoryCodecState>,
}

impl MemoryCodec {
    pub fn insert(&self, path: &Path, fields: TagFields) {
        self.state.lock().unwrap().files.insert(path.to_path_buf(), fields);
    }

    pub fn fields(&self, path: &Path) -> Option<TagFields> {
        self.state.lock().unwrap().files.get(path).cloned()
    }

    pub fn fail_reads_for(&self, path: &Path) {
        self.state.lock().unwrap().failing_reads.insert(path.to_path_buf());
    }

    pub fn fail_rating_writes(&self, fail: bool) {
        self.state.lock().unwrap().fail_rating_writes = fail;
    }

    pub fn fail_marker_writes(&self, fail: bool) {
        self.state.lock().unwrap().fail_marker_writes = fail;
    }

    pub fn write_count(&self) -> usize {
        self.state.lock().unwrap().write_count
    }
}

impl MetadataCodec for MemoryCodec {
    fn read(&self, path: &Path) -> Result<TagFields, ScanError> {
        let state = self.state.lock().unwrap();
        if state.failing_reads.contains(path) {
            return Err(ScanError::CorruptTag {
                path: path.to_path_buf(),
                reason: "injected read failure".to_string(),
            });
        }
        state
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| ScanError::Unreadable {
                path: path.to_path_buf(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            })
    }

    fn write(&self, path: &Path, update: &TagUpdate) -> Result<(), TagWriteError> {
        let mut state = self.state.lock().unwrap();
        let rating_write = update.rating != FieldChange::Unchanged;
        let marker_write = update.marker != FieldChange::Unchanged;
        if (rating_write && state.fail_rating_writes) || (marker_write && state.fail_marker_writes)
        {
            return Err(TagWriteError::Save {
                path: path.to_path_buf(),
                reason: "injected write failure".to_string(),
            });
        }

        let fields = state.files.get_mut(path).ok_or_else(|| TagWriteError::Open {
            path: path.to_path_buf(),
            reason: "no such file".to_string(),
        })?;
        match &update.rating {
            FieldChange::Unchanged => {}
            FieldChange::Set(r) => fields.rating = RatingField::Valid(*r),
            FieldChange::Clear => fields.rating = RatingField::Missing,
        }
        match &update.marker {
            FieldChange::Unchanged => {}
            FieldChange::Set(v) => fields.marker = Some(v.clone()),
            FieldChange::Clear => fields.marker = None,
        }
        state.write_count += 1;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Library store
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryStoreState {
    pub records: HashMap<PathBuf, ExternalRecord>,
    next_id: i64,
    /// When set, only paths under this folder are managed
    pub pool: Option<PathBuf>,
    pub fail_upsert: bool,
    pub fail_lookup: bool,
    pub fail_delete: bool,
    pub restores: usize,
}

/// Shared handle so tests can inspect the store after handing it to the engine
#[derive(Clone, Default)]
pub struct MemoryStore {
    pub state: Arc<Mutex<MemoryStoreState>>,
}

impl MemoryStore {
    pub fn with_record(path: &Path, rating: Option<Rating>) -> Self {
        let store = Self::default();
        store.add(path, rating);
        store
    }

    pub fn add(&self, path: &Path, rating: Option<Rating>) {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = state.next_id;
        state
            .records
            .insert(path.to_path_buf(), ExternalRecord { id, rating });
    }

    pub fn rating(&self, path: &Path) -> Option<Rating> {
        self.state
            .lock()
            .unwrap()
            .records
            .get(path)
            .and_then(|r| r.rating)
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.state.lock().unwrap().records.contains_key(path)
    }

    pub fn set(&self, f: impl FnOnce(&mut MemoryStoreState)) {
        f(&mut self.state.lock().unwrap());
    }

    fn manages(&self, path: &Path) -> bool {
        match &self.state.lock().unwrap().pool {
            Some(pool) => path.starts_with(pool),
            None => true,
        }
    }
}

/// Process watch whose answer the test controls
#[derive(Clone, Default)]
pub struct ToggleWatch {
    running: Arc<AtomicBool>,
}

impl ToggleWatch {
    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }
}

impl ProcessWatch for ToggleWatch {
    fn running_engine(&mut self) -> Option<String> {
        self.running
            .load(Ordering::SeqCst)
            .then(|| "Engine DJ.exe pid 4242".to_string())
    }
}

impl LibraryStore for MemoryStore {
    fn lookup(&self, path: &Path) -> Result<Option<ExternalRecord>, StoreError> {
        let state = self.state.lock().unwrap();
        if state.fail_lookup {
            return Err(injected_store_error());
        }
        Ok(state.records.get(path).cloned())
    }

    fn upsert(
        &mut self,
        path: &Path,
        rating: Rating,
        policy: MissingRecordPolicy,
    ) -> Result<UpsertOutcome, StoreError> {
        if !self.manages(path) {
            return Ok(UpsertOutcome::Unmanaged);
        }
        let mut state = self.state.lock().unwrap();
        if state.fail_upsert {
            return Err(injected_store_error());
        }
        if let Some(record) = state.records.get_mut(path) {
            record.rating = Some(rating);
            return Ok(UpsertOutcome::Updated);
        }
        match policy {
            MissingRecordPolicy::SkipIfMissing => Ok(UpsertOutcome::Skipped),
            MissingRecordPolicy::CreateIfMissing => {
                state.next_id += 1;
                let id = state.next_id;
                state.records.insert(
                    path.to_path_buf(),
                    ExternalRecord {
                        id,
                        rating: Some(rating),
                    },
                );
                Ok(UpsertOutcome::Created)
            }
        }
    }

    fn restore(&mut self, path: &Path, previous: Option<&ExternalRecord>) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        state.restores += 1;
        match previous {
            Some(record) => {
                state.records.insert(path.to_path_buf(), record.clone());
            }
            None => {
                state.records.remove(path);
            }
        }
        Ok(())
    }

    fn delete(&mut self, path: &Path) -> Result<DeleteOutcome, StoreError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_delete {
            return Err(injected_store_error());
        }
        Ok(match state.records.remove(path) {
            Some(_) => DeleteOutcome::Deleted,
            None => DeleteOutcome::Absent,
        })
    }
}

// ---------------------------------------------------------------------------
// Trash and notifier
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryTrashState {
    pub trashed: Vec<PathBuf>,
    pub restored: Vec<PathBuf>,
    pub fail: bool,
}

/// Records trash moves without touching the filesystem
#[derive(Clone, Default)]
pub struct MemoryTrash {
    pub state: Arc<Mutex<MemoryTrashState>>,
}

impl MemoryTrash {
    pub fn failing() -> Self {
        let trash = Self::default();
        trash.state.lock().unwrap().fail = true;
        trash
    }

    pub fn trashed(&self) -> Vec<PathBuf> {
        self.state.lock().unwrap().trashed.clone()
    }
    pub fn set_fail(&self, fail: bool) {
        self.state.lock().unwrap().fail = fail;
    }
}

impl TrashMover for MemoryTrash {
    fn move_to_trash(&mut self, path: &Path) -> Result<TrashedFile, TrashError> {
        let mut state = self.state.lock().unwrap();
        if state.fail {
            return Err(TrashError::Io {
                path: path.to_path_buf(),
                source: std::io::Error::other("injected trash failure"),
            });
        }
        state.trashed.push(path.to_path_buf());
        Ok(TrashedFile {
            original: path.to_path_buf(),
            location: TrashLocation::System,
        })
    }

    fn restore(&mut self, trashed: &TrashedFile) -> Result<(), TrashError> {
        let mut state = self.state.lock().unwrap();
        if state.fail {
            return Err(TrashError::RestoreUnsupported(trashed.original.clone()));
        }
        state.trashed.retain(|p| p != &trashed.original);
        state.restored.push(trashed.original.clone());
        Ok(())
    }
}

/// Notifier that remembers what it was asked to send
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    pub sent: Arc<Mutex<Vec<TrackSummary>>>,
    pub fail: bool,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<TrackSummary> {
        self.sent.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, track: &TrackSummary) -> Result<NotifyDispatch, NotifyError> {
        if self.fail {
            return Err(NotifyError::Setup("injected notify failure".to_string()));
        }
        self.sent.lock().unwrap().push(track.clone());
        Ok(NotifyDispatch::Dispatched)
    }
}
