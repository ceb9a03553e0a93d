//! Core audit logic and state
//!
//! This module contains:
//! - The track model and rating type
//! - Library scanning and filtering
//! - The resume marker that keeps decided tracks out of later runs
//! - Persisted settings
//! - Progress events and pacing estimates

pub mod progress;
pub mod resume;
pub mod scanning;
pub mod state;
mod track;

pub use resume::ResumeStateManager;
pub use scanning::{format_duration, scan_library, GenreFilter, ScanFilter, ScanReport, YearRange};
pub use track::{EnvelopeKey, Rating, ResumeMarker, Track, TrackSummary};
