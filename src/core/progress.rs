//! Progress events emitted per track, and pacing estimates
//!
//! The pipeline sends events over an mpsc channel; whatever front end is
//! attached aggregates them into counts and an ETA.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::mpsc;
use std::time::{Duration, Instant};

/// Terminal action recorded for a track
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionKind {
    Keep,
    Remove,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// Track entered the work queue
    Discovered { path: PathBuf },
    /// Envelope computed and cached
    WaveformReady { path: PathBuf },
    /// Keep or Remove completed
    Decided { path: PathBuf, decision: DecisionKind },
    /// File could not be scanned and was left out
    SkippedError { path: PathBuf, reason: String },
    /// A removed track was brought back for review
    Restored { path: PathBuf },
}

/// Sending half of the progress channel. A disabled sink drops events.
#[derive(Debug, Clone, Default)]
pub struct ProgressSink {
    tx: Option<mpsc::Sender<ProgressEvent>>,
}

impl ProgressSink {
    pub fn channel() -> (Self, mpsc::Receiver<ProgressEvent>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: ProgressEvent) {
        if let Some(tx) = &self.tx {
            // Receiver may be gone at shutdown; events are advisory
            let _ = tx.send(event);
        }
    }
}

/// Running totals built from the event stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressCounts {
    pub discovered: usize,
    pub waveform_ready: usize,
    pub kept: usize,
    pub removed: usize,
    pub skipped: usize,
}

impl ProgressCounts {
    pub fn apply(&mut self, event: &ProgressEvent) {
        match event {
            ProgressEvent::Discovered { .. } => self.discovered += 1,
            ProgressEvent::WaveformReady { .. } => self.waveform_ready += 1,
            ProgressEvent::Decided { decision, .. } => match decision {
                DecisionKind::Keep => self.kept += 1,
                DecisionKind::Remove => self.removed += 1,
            },
            ProgressEvent::SkippedError { .. } => self.skipped += 1,
            ProgressEvent::Restored { .. } => self.removed = self.removed.saturating_sub(1),
        }
    }

    pub fn decided(&self) -> usize {
        self.kept + self.removed
    }

    pub fn remaining(&self) -> usize {
        self.discovered.saturating_sub(self.decided())
    }
}

/// Estimates time remaining from the pace of recent decisions
#[derive(Debug)]
pub struct EtaCalculator {
    max_samples: usize,
    durations: VecDeque<Duration>,
    started: Option<Instant>,
}

impl Default for EtaCalculator {
    fn default() -> Self {
        Self::new(10)
    }
}

impl EtaCalculator {
    /// Fewer samples than this and no estimate is shown
    const MIN_SAMPLES: usize = 3;

    pub fn new(max_samples: usize) -> Self {
        Self {
            max_samples: max_samples.max(1),
            durations: VecDeque::new(),
            started: None,
        }
    }

    pub fn start_tracking(&mut self) {
        self.started = Some(Instant::now());
    }

    /// Close the current measurement, if one was started
    pub fn log_completion(&mut self) {
        if let Some(started) = self.started.take() {
            let elapsed = started.elapsed();
            self.record(elapsed);
            log::info!(
                "Track processed in {:.2}s. Pace based on last {} tracks.",
                elapsed.as_secs_f64(),
                self.durations.len()
            );
        }
    }

    pub fn record(&mut self, duration: Duration) {
        if self.durations.len() == self.max_samples {
            self.durations.pop_front();
        }
        self.durations.push_back(duration);
    }

    pub fn estimate(&self, remaining: usize) -> Option<Duration> {
        if self.durations.len() < Self::MIN_SAMPLES || remaining == 0 {
            return None;
        }
        let total: Duration = self.durations.iter().sum();
        let average = total / self.durations.len() as u32;
        Some(average * remaining as u32)
    }

    /// "ETA: HH:MM", or empty when there is no useful estimate (under a minute)
    pub fn eta_string(&self, remaining: usize) -> String {
        match self.estimate(remaining) {
            Some(eta) if eta.as_secs() >= 60 => {
                let minutes = eta.as_secs() / 60;
                format!("ETA: {:02}:{:02}", minutes / 60, minutes % 60)
            }
            _ => String::new(),
        }
    }
}
