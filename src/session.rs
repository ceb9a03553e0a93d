//! One audit run: the work queue, the operator cursor, the waveform
//! pipeline and the decision engine
//!
//! A session is created by scanning the library once. Ending it stops the
//! pipeline and writes nothing further; everything that must survive a
//! restart has already been written into the files' tags.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::audio::MetadataCodec;
use crate::core::progress::{DecisionKind, EtaCalculator, ProgressEvent, ProgressSink};
use crate::core::{scan_library, Rating, ResumeStateManager, ScanFilter, ScanReport, Track};
use crate::decision::{DecisionEngine, EngineOptions, KeepOutcome, RemoveOutcome, StoreRemoval};
use crate::error::{DecisionError, StartupError};
use crate::external::{LibraryStore, Notifier, PendingDeletions, TrashMover, TrashedFile};
use crate::waveform::{EnvelopeAnalyzer, PipelineConfig, WaveformPipeline, WaveformStatus};

/// Fixed for the lifetime of a session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub roots: Vec<PathBuf>,
    pub filter: ScanFilter,
    pub pipeline: PipelineConfig,
    pub engine: EngineOptions,
}

/// The session's view of the outside world
pub struct Collaborators {
    pub codec: Arc<dyn MetadataCodec>,
    pub store: Box<dyn LibraryStore>,
    pub trash: Box<dyn TrashMover>,
    pub notifier: Box<dyn Notifier>,
    pub journal: PendingDeletions,
    pub analyzer: Arc<dyn EnvelopeAnalyzer>,
    pub sink: ProgressSink,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryState {
    Pending,
    Decided(DecisionKind),
}

/// A Remove that can still be undone
#[derive(Debug, Clone)]
struct Removal {
    index: usize,
    trashed: TrashedFile,
    store: StoreRemoval,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub queued: usize,
    pub kept: usize,
    pub removed: usize,
    pub remaining: usize,
    pub failed_decisions: usize,
    pub scan_errors: usize,
    pub already_decided: usize,
    pub filtered_out: usize,
    pub pending_store_deletions: usize,
    /// Removed files whose library record could be neither deleted nor journaled
    pub lost_store_deletions: usize,
    /// Audio files the scan looked at, queued or not
    pub files_seen: usize,
    pub peak_queued: usize,
    /// None when no notices were sent
    pub notices_delivered: Option<usize>,
    pub notices_failed: Option<usize>,
}

pub struct AuditSession {
    id: Uuid,
    started_at: DateTime<Utc>,
    config: SessionConfig,
    queue: Vec<Track>,
    states: Vec<EntryState>,
    cursor: usize,
    engine: DecisionEngine,
    pipeline: WaveformPipeline,
    sink: ProgressSink,
    eta: EtaCalculator,
    scan: ScanReport,
    files_seen: usize,
    removals: Vec<Removal>,
    failed_decisions: usize,
}

impl AuditSession {
    /// Scan the library, replay owed deletions and start prefetching waveforms
    pub fn start(config: SessionConfig, collaborators: Collaborators) -> Result<Self, StartupError> {
        let id = Uuid::new_v4();
        let started_at = Utc::now();
        log::info!(
            "Starting audit session {} over {} root(s)",
            id,
            config.roots.len()
        );

        let Collaborators {
            codec,
            store,
            trash,
            notifier,
            journal,
            analyzer,
            sink,
        } = collaborators;

        let resume = ResumeStateManager::new(codec.clone(), config.engine.marker_value.clone());
        let mut scan = scan_library(&config.roots, &config.filter, codec.as_ref(), &resume, &sink)?;
        let files_seen = scan.files_seen();
        let queue = std::mem::take(&mut scan.tracks);

        let mut engine =
            DecisionEngine::new(codec, store, trash, notifier, journal, config.engine.clone());
        engine.retry_pending_deletions();

        let keys = queue.iter().map(Track::envelope_key).collect();
        let pipeline = WaveformPipeline::start(keys, analyzer, config.pipeline, sink.clone())?;

        let mut eta = EtaCalculator::default();
        if !queue.is_empty() {
            eta.start_tracking();
        }

        Ok(Self {
            id,
            started_at,
            config,
            states: vec![EntryState::Pending; queue.len()],
            queue,
            cursor: 0,
            engine,
            pipeline,
            sink,
            eta,
            scan,
            files_seen,
            removals: Vec::new(),
            failed_decisions: 0,
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Every track scanned into this session, decided or not, in review order
    pub fn queue(&self) -> &[Track] {
        &self.queue
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// The undecided track under the cursor, if any
    pub fn current(&self) -> Option<&Track> {
        match self.states.get(self.cursor) {
            Some(EntryState::Pending) => self.queue.get(self.cursor),
            _ => None,
        }
    }

    pub fn remaining(&self) -> usize {
        self.states
            .iter()
            .filter(|s| matches!(s, EntryState::Pending))
            .count()
    }

    pub fn is_finished(&self) -> bool {
        self.remaining() == 0
    }

    /// Move the cursor to an undecided track. Returns false if there is none at `index`.
    pub fn jump_to(&mut self, index: usize) -> bool {
        if !matches!(self.states.get(index), Some(EntryState::Pending)) {
            return false;
        }
        self.set_cursor(index);
        true
    }

    /// Set the current track's rating in memory
    pub fn rate(&mut self, stars: u8) -> Option<Rating> {
        let rating = Rating::new(stars)?;
        if !matches!(self.states.get(self.cursor), Some(EntryState::Pending)) {
            return None;
        }
        let track = self.queue.get_mut(self.cursor)?;
        self.engine.apply_rating(track, rating);
        Some(rating)
    }

    /// Keep the current track. On error the cursor stays put so it can be retried.
    pub fn keep(&mut self) -> Result<Option<KeepOutcome>, DecisionError> {
        let index = self.cursor;
        if !matches!(self.states.get(index), Some(EntryState::Pending)) {
            return Ok(None);
        }
        let Some(track) = self.queue.get_mut(index) else {
            return Ok(None);
        };

        match self.engine.keep(track) {
            Ok(outcome) => {
                self.settle(index, DecisionKind::Keep);
                Ok(Some(outcome))
            }
            Err(e) => {
                self.failed_decisions += 1;
                log::error!("Keep failed for {}: {}", track.path.display(), e);
                Err(e)
            }
        }
    }

    /// Remove the current track. On error the cursor stays put so it can be retried.
    pub fn remove(&mut self) -> Result<Option<RemoveOutcome>, DecisionError> {
        let index = self.cursor;
        if !matches!(self.states.get(index), Some(EntryState::Pending)) {
            return Ok(None);
        }
        let Some(track) = self.queue.get(index) else {
            return Ok(None);
        };

        match self.engine.remove(track) {
            Ok(outcome) => {
                self.removals.push(Removal {
                    index,
                    trashed: outcome.trashed.clone(),
                    store: outcome.store,
                });
                self.settle(index, DecisionKind::Remove);
                Ok(Some(outcome))
            }
            Err(e) => {
                self.failed_decisions += 1;
                log::error!("Remove failed for {}: {}", track.path.display(), e);
                Err(e)
            }
        }
    }

    /// Bring back the most recently removed file and make it the current track
    ///
    /// Returns false when nothing has been removed in this session. On error
    /// the removal stays undoable.
    pub fn undo(&mut self) -> Result<bool, DecisionError> {
        let Some(removal) = self.removals.pop() else {
            return Ok(false);
        };
        if let Err(e) = self.engine.undo_remove(&removal.trashed) {
            log::error!("Undo failed for {}: {}", removal.trashed.original.display(), e);
            self.removals.push(removal);
            return Err(e);
        }

        let index = removal.index;
        self.states[index] = EntryState::Pending;
        self.pipeline.reinstate(index);
        self.set_cursor(index);
        self.sink.emit(ProgressEvent::Restored {
            path: self.queue[index].path.clone(),
        });
        Ok(true)
    }

    /// Waveform of the current track, waiting at most `timeout`
    pub fn waveform(&self, timeout: Duration) -> WaveformStatus {
        if self.current().is_none() {
            return WaveformStatus::Pending;
        }
        self.pipeline.wait_for(self.cursor, timeout)
    }

    /// "ETA: HH:MM" for the undecided tracks, empty until there is a pace to go on
    pub fn eta(&self) -> String {
        self.eta.eta_string(self.remaining())
    }

    /// Stop the pipeline and report what happened
    pub fn finish(mut self) -> SessionSummary {
        self.pipeline.shutdown();
        let notify_stats = self.engine.notify_stats();

        let count = |kind| {
            self.states
                .iter()
                .filter(|s| **s == EntryState::Decided(kind))
                .count()
        };
        let summary = SessionSummary {
            id: self.id,
            started_at: self.started_at,
            finished_at: Utc::now(),
            queued: self.queue.len(),
            kept: count(DecisionKind::Keep),
            removed: count(DecisionKind::Remove),
            remaining: self.remaining(),
            failed_decisions: self.failed_decisions,
            scan_errors: self.scan.errors.len(),
            already_decided: self.scan.decided_skipped,
            filtered_out: self.scan.filtered_out,
            pending_store_deletions: self.engine.pending_deletions().entries().len(),
            lost_store_deletions: self
                .removals
                .iter()
                .filter(|r| r.store == StoreRemoval::Lost)
                .count(),
            files_seen: self.files_seen,
            peak_queued: self.pipeline.peak_queued(),
            notices_delivered: None,
            notices_failed: None,
        };

        // Dropping the engine lets notices still in flight finish before they are counted
        let Self { engine, .. } = self;
        drop(engine);
        let summary = match notify_stats {
            Some(stats) => SessionSummary {
                notices_delivered: Some(stats.delivered_count()),
                notices_failed: Some(stats.failed_count()),
                ..summary
            },
            None => summary,
        };

        log::info!(
            "Audit session {} ended: {} kept, {} removed, {} remaining",
            summary.id,
            summary.kept,
            summary.removed,
            summary.remaining
        );
        summary
    }

    fn set_cursor(&mut self, index: usize) {
        self.cursor = index;
        self.pipeline.set_cursor(index);
        self.eta.start_tracking();
    }

    /// Record a decision and move on to the next undecided track
    fn settle(&mut self, index: usize, decision: DecisionKind) {
        self.states[index] = EntryState::Decided(decision);
        self.pipeline.cancel(index);
        self.eta.log_completion();
        self.sink.emit(ProgressEvent::Decided {
            path: self.queue[index].path.clone(),
            decision,
        });

        let next = (index + 1..self.states.len())
            .chain(0..index)
            .find(|&i| self.states[i] == EntryState::Pending);
        match next {
            Some(i) => self.set_cursor(i),
            None => {
                self.cursor = self.states.len();
                log::info!("All tracks in this session have been decided");
            }
        }
    }
}
