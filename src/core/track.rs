//! Track model shared by the scanner, waveform pipeline and decision engine

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// A star rating between 1 and 5
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Rating(u8);

impl Rating {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 5;

    /// Create a rating, returning None when outside 1..=5
    pub fn new(stars: u8) -> Option<Self> {
        (Self::MIN..=Self::MAX).contains(&stars).then_some(Rating(stars))
    }

    pub fn stars(self) -> u8 {
        self.0
    }

    /// Parse the textual form stored in the tag ("4", " 4 ")
    pub fn parse(text: &str) -> Option<Self> {
        text.trim().parse::<u8>().ok().and_then(Self::new)
    }
}

impl fmt::Display for Rating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Whether the audit has already rendered a final decision for a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResumeMarker {
    #[default]
    Unseen,
    Decided,
}

/// Cache key for derived data: a changed mtime invalidates anything computed before
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EnvelopeKey {
    pub path: PathBuf,
    pub modified: SystemTime,
}

/// A track in the working set
#[derive(Debug, Clone)]
pub struct Track {
    /// Absolute, canonical path (the stable identity)
    pub path: PathBuf,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub genre: Option<String>,
    pub year: Option<u32>,
    /// Current in-memory rating (operator edits land here first)
    pub rating: Option<Rating>,
    /// Rating found in the tag when the track was scanned
    pub tag_rating: Option<Rating>,
    pub marker: ResumeMarker,
    pub modified: SystemTime,
}

impl Track {
    pub fn envelope_key(&self) -> EnvelopeKey {
        EnvelopeKey {
            path: self.path.clone(),
            modified: self.modified,
        }
    }

    pub fn summary(&self) -> TrackSummary {
        TrackSummary {
            path: self.path.clone(),
            artist: self.artist.clone(),
            title: self.title.clone(),
        }
    }

    /// "Artist - Title", falling back to the file name
    pub fn display_name(&self) -> String {
        match (&self.artist, &self.title) {
            (Some(artist), Some(title)) => format!("{} - {}", artist, title),
            (None, Some(title)) => title.clone(),
            _ => file_name(&self.path),
        }
    }
}

/// Identifying metadata handed to the notifier once the file itself is gone
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackSummary {
    pub path: PathBuf,
    pub artist: Option<String>,
    pub title: Option<String>,
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "Unknown".to_string())
}

#[cfg(test)]
impl Track {
    /// Create a Track for testing purposes with no tag data
    pub fn new_for_test(path: &str) -> Self {
        Self {
            path: PathBuf::from(path),
            title: None,
            artist: None,
            genre: None,
            year: None,
            rating: None,
            tag_rating: None,
            marker: ResumeMarker::Unseen,
            modified: SystemTime::UNIX_EPOCH,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rating_bounds() {
        assert!(Rating::new(0).is_none());
        assert_eq!(Rating::new(1).map(Rating::stars), Some(1));
        assert_eq!(Rating::new(5).map(Rating::stars), Some(5));
        assert!(Rating::new(6).is_none());
    }

    #[test]
    fn test_rating_parse() {
        assert_eq!(Rating::parse(" 4 "), Rating::new(4));
        assert_eq!(Rating::parse("9"), None);
        assert_eq!(Rating::parse("four"), None);
        assert_eq!(Rating::parse(""), None);
    }

    #[test]
    fn test_display_name_prefers_tags() {
        let mut track = Track::new_for_test("/music/01 intro.mp3");
        assert_eq!(track.display_name(), "01 intro.mp3");

        track.title = Some("Intro".to_string());
        assert_eq!(track.display_name(), "Intro");

        track.artist = Some("Someone".to_string());
        assert_eq!(track.display_name(), "Someone - Intro");
    }

    #[test]
    fn test_envelope_key_tracks_mtime() {
        let mut track = Track::new_for_test("/music/a.mp3");
        let before = track.envelope_key();
        track.modified = SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(10);
        assert_ne!(before, track.envelope_key());
    }
}
