//! Background waveform computation ahead of the review cursor
//!
//! A feeder thread fills a bounded queue with tracks inside the lookahead
//! window; a fixed pool of worker threads drains it. All shared state sits
//! behind one mutex, with condvars for "work queued", "slot freed" and
//! "result stored".

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::{compute_envelope, EnvelopeCache, WaveformEnvelope};
use crate::audio::decode_mono;
use crate::core::progress::{ProgressEvent, ProgressSink};
use crate::core::EnvelopeKey;
use crate::error::{StartupError, WaveformError};

/// Turns a file into an envelope. Runs on worker threads.
pub trait EnvelopeAnalyzer: Send + Sync + 'static {
    fn analyze(&self, path: &Path) -> Result<WaveformEnvelope, WaveformError>;
}

/// Decode with symphonia, then run the band analysis
#[derive(Debug, Clone)]
pub struct DecodingAnalyzer {
    columns: usize,
}

impl DecodingAnalyzer {
    pub fn new(columns: usize) -> Self {
        Self {
            columns: columns.max(1),
        }
    }
}

impl EnvelopeAnalyzer for DecodingAnalyzer {
    fn analyze(&self, path: &Path) -> Result<WaveformEnvelope, WaveformError> {
        let audio = decode_mono(path)?;
        Ok(compute_envelope(&audio, self.columns))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    pub workers: usize,
    /// Maximum number of queued (not yet started) jobs
    pub prefetch_depth: usize,
    pub cache_capacity: usize,
}

impl PipelineConfig {
    pub fn new(workers: usize, prefetch_depth: Option<usize>, cache_capacity: usize) -> Self {
        let workers = workers.max(1);
        Self {
            workers,
            prefetch_depth: prefetch_depth.unwrap_or(2 * workers).max(1),
            cache_capacity,
        }
    }

    /// Number of tracks from the cursor that are eligible for prefetch
    pub fn lookahead(&self) -> usize {
        self.prefetch_depth + self.workers
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::new(4, None, 32)
    }
}

/// What the pipeline knows about one track's envelope
#[derive(Debug, Clone, PartialEq)]
pub enum WaveformStatus {
    Ready(Arc<WaveformEnvelope>),
    Unavailable(WaveformError),
    Pending,
}

struct Slot {
    key: EnvelopeKey,
    removed: bool,
}

struct PipelineState {
    slots: Vec<Slot>,
    cursor: usize,
    queue: VecDeque<usize>,
    in_flight: HashSet<usize>,
    /// In-flight jobs whose result must be thrown away
    abandoned: HashSet<usize>,
    cache: EnvelopeCache,
    failures: HashMap<usize, WaveformError>,
    peak_queued: usize,
    shutdown: bool,
}

impl PipelineState {
    fn is_settled(&self, index: usize) -> bool {
        let slot = &self.slots[index];
        slot.removed
            || self.failures.contains_key(&index)
            || self.in_flight.contains(&index)
            || self.cache.contains(&slot.key)
    }

    /// First track in the window that has no job yet
    fn next_candidate(&self, lookahead: usize) -> Option<usize> {
        let end = self.slots.len().min(self.cursor.saturating_add(lookahead));
        (self.cursor..end).find(|&i| !self.queue.contains(&i) && !self.is_settled(i))
    }

    fn note_queue_len(&mut self) {
        self.peak_queued = self.peak_queued.max(self.queue.len());
    }
}

struct Shared {
    state: Mutex<PipelineState>,
    work_available: Condvar,
    feeder_wake: Condvar,
    results: Condvar,
    config: PipelineConfig,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, PipelineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct WaveformPipeline {
    shared: Arc<Shared>,
    threads: Vec<JoinHandle<()>>,
}

impl WaveformPipeline {
    /// Spawn the feeder and worker threads over `tracks` (in review order)
    pub fn start(
        tracks: Vec<EnvelopeKey>,
        analyzer: Arc<dyn EnvelopeAnalyzer>,
        config: PipelineConfig,
        sink: ProgressSink,
    ) -> Result<Self, StartupError> {
        let cache_capacity = config.cache_capacity.max(config.lookahead() + 1);
        let shared = Arc::new(Shared {
            state: Mutex::new(PipelineState {
                slots: tracks
                    .into_iter()
                    .map(|key| Slot { key, removed: false })
                    .collect(),
                cursor: 0,
                queue: VecDeque::with_capacity(config.prefetch_depth),
                in_flight: HashSet::new(),
                abandoned: HashSet::new(),
                cache: EnvelopeCache::new(cache_capacity),
                failures: HashMap::new(),
                peak_queued: 0,
                shutdown: false,
            }),
            work_available: Condvar::new(),
            feeder_wake: Condvar::new(),
            results: Condvar::new(),
            config,
        });

        let mut pipeline = Self {
            shared: shared.clone(),
            threads: Vec::with_capacity(config.workers + 1),
        };

        let feeder_shared = shared.clone();
        let feeder = thread::Builder::new()
            .name("waveform-feeder".to_string())
            .spawn(move || feeder_loop(feeder_shared))
            .map_err(StartupError::Workers)?;
        pipeline.threads.push(feeder);

        for worker_id in 0..config.workers {
            let worker_shared = shared.clone();
            let analyzer = analyzer.clone();
            let sink = sink.clone();
            let worker = thread::Builder::new()
                .name(format!("waveform-worker-{}", worker_id))
                .spawn(move || worker_loop(worker_shared, analyzer, sink))
                .map_err(StartupError::Workers)?;
            pipeline.threads.push(worker);
        }

        log::info!(
            "Waveform pipeline started: {} workers, prefetch depth {}, cache {}",
            config.workers,
            config.prefetch_depth,
            cache_capacity
        );

        Ok(pipeline)
    }

    /// Move the review cursor. Queued jobs behind it are dropped.
    pub fn set_cursor(&self, index: usize) {
        let mut state = self.shared.lock();
        state.cursor = index;
        state.queue.retain(|&i| i >= index);
        drop(state);
        self.shared.feeder_wake.notify_one();
    }

    /// Put a track at the front of the queue
    pub fn request_priority(&self, index: usize) {
        let mut state = self.shared.lock();
        if index >= state.slots.len() || state.is_settled(index) {
            return;
        }

        state.queue.retain(|&i| i != index);
        state.queue.push_front(index);
        if state.queue.len() > self.shared.config.prefetch_depth {
            if let Some(evicted) = state.queue.pop_back() {
                log::trace!("Queue full, dropped prefetch of track {}", evicted);
            }
        }
        state.note_queue_len();
        drop(state);
        self.shared.work_available.notify_one();
    }

    /// Current status without blocking
    pub fn peek(&self, index: usize) -> WaveformStatus {
        let mut state = self.shared.lock();
        status_of(&mut state, index)
    }

    /// Block up to `timeout` for a track's envelope, prioritising it first
    pub fn wait_for(&self, index: usize, timeout: Duration) -> WaveformStatus {
        let deadline = Instant::now() + timeout;

        if let status @ (WaveformStatus::Ready(_) | WaveformStatus::Unavailable(_)) =
            self.peek(index)
        {
            return status;
        }
        self.request_priority(index);

        let mut state = self.shared.lock();
        loop {
            let status = status_of(&mut state, index);
            if !matches!(status, WaveformStatus::Pending) || state.shutdown {
                return status;
            }
            let now = Instant::now();
            if now >= deadline {
                return WaveformStatus::Pending;
            }
            state = self
                .shared
                .results
                .wait_timeout(state, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|e| e.into_inner().0);
        }
    }

    /// The track left the working set; drop or abandon its job
    pub fn cancel(&self, index: usize) {
        let mut state = self.shared.lock();
        let Some(slot) = state.slots.get_mut(index) else {
            return;
        };
        slot.removed = true;
        let path = slot.key.path.clone();

        state.queue.retain(|&i| i != index);
        if state.in_flight.contains(&index) {
            state.abandoned.insert(index);
        }
        state.cache.remove(&path);
        state.failures.remove(&index);
        drop(state);

        log::debug!("Cancelled waveform for {}", path.display());
        self.shared.feeder_wake.notify_one();
        self.shared.results.notify_all();
    }

    /// A cancelled track is back in the working set and eligible for prefetch again
    pub fn reinstate(&self, index: usize) {
        let mut state = self.shared.lock();
        let Some(slot) = state.slots.get_mut(index) else {
            return;
        };
        slot.removed = false;
        let path = slot.key.path.clone();
        drop(state);

        log::debug!("Reinstated waveform for {}", path.display());
        self.shared.feeder_wake.notify_one();
    }

    /// Highest number of queued jobs seen at once
    pub fn peak_queued(&self) -> usize {
        self.shared.lock().peak_queued
    }

    #[cfg(test)]
    pub fn queued(&self) -> usize {
        self.shared.lock().queue.len()
    }

    /// Stop all threads. Work in flight finishes first.
    pub fn shutdown(&mut self) {
        {
            let mut state = self.shared.lock();
            if state.shutdown && self.threads.is_empty() {
                return;
            }
            state.shutdown = true;
            state.queue.clear();
        }
        self.shared.work_available.notify_all();
        self.shared.feeder_wake.notify_all();
        self.shared.results.notify_all();

        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                log::error!("Waveform thread panicked during shutdown");
            }
        }
    }
}

impl Drop for WaveformPipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn status_of(state: &mut PipelineState, index: usize) -> WaveformStatus {
    let Some(slot) = state.slots.get(index) else {
        return WaveformStatus::Pending;
    };
    if slot.removed {
        return WaveformStatus::Unavailable(WaveformError::Cancelled {
            path: slot.key.path.clone(),
        });
    }
    if let Some(err) = state.failures.get(&index) {
        return WaveformStatus::Unavailable(err.clone());
    }
    let key = slot.key.clone();
    match state.cache.get(&key) {
        Some(envelope) => WaveformStatus::Ready(envelope),
        None => WaveformStatus::Pending,
    }
}

fn feeder_loop(shared: Arc<Shared>) {
    let lookahead = shared.config.lookahead();
    let mut state = shared.lock();

    while !state.shutdown {
        let candidate = if state.queue.len() < shared.config.prefetch_depth {
            state.next_candidate(lookahead)
        } else {
            None
        };
        if let Some(index) = candidate {
            state.queue.push_back(index);
            state.note_queue_len();
            shared.work_available.notify_one();
            continue;
        }
        // Queue full or nothing left in the window
        state = shared
            .feeder_wake
            .wait(state)
            .unwrap_or_else(PoisonError::into_inner);
    }
}

fn worker_loop(shared: Arc<Shared>, analyzer: Arc<dyn EnvelopeAnalyzer>, sink: ProgressSink) {
    loop {
        let (index, key) = {
            let mut state = shared.lock();
            loop {
                if state.shutdown {
                    return;
                }
                if let Some(index) = state.queue.pop_front() {
                    state.in_flight.insert(index);
                    break (index, state.slots[index].key.clone());
                }
                state = shared
                    .work_available
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        };
        shared.feeder_wake.notify_one();

        let started = Instant::now();
        let result = analyzer.analyze(&key.path);

        let mut state = shared.lock();
        state.in_flight.remove(&index);
        let discarded = state.abandoned.remove(&index) || state.slots[index].removed;

        if discarded {
            log::debug!("Discarding waveform for removed track {}", key.path.display());
        } else {
            match result {
                Ok(envelope) => {
                    log::debug!(
                        "Waveform ready for {} in {:.2}s",
                        key.path.display(),
                        started.elapsed().as_secs_f64()
                    );
                    let path = key.path.clone();
                    state.cache.insert(key, Arc::new(envelope));
                    sink.emit(ProgressEvent::WaveformReady { path });
                }
                Err(err) => {
                    log::warn!("{}", err);
                    state.failures.insert(index, err);
                }
            }
        }
        drop(state);

        shared.results.notify_all();
        shared.feeder_wake.notify_one();
    }
}
