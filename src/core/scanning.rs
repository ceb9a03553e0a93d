//! Library discovery and filtering
//!
//! Walks the library roots, reads each MP3's tag, drops tracks that are
//! already decided or fall outside the filter, and returns the remaining
//! tracks in path order.

use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::progress::{ProgressEvent, ProgressSink};
use super::resume::ResumeStateManager;
use super::{ResumeMarker, Track};
use crate::audio::{is_audio_file, MetadataCodec, TagFields};
use crate::error::{ScanError, StartupError};

/// Which genres to review
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum GenreFilter {
    #[default]
    All,
    /// Lowercased, trimmed genre names
    Only(HashSet<String>),
}

impl GenreFilter {
    pub fn only<I, S>(genres: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let set: HashSet<String> = genres
            .into_iter()
            .map(|g| normalize_genre(g.as_ref()))
            .filter(|g| !g.is_empty())
            .collect();
        if set.is_empty() {
            GenreFilter::All
        } else {
            GenreFilter::Only(set)
        }
    }

    pub fn matches(&self, genre: Option<&str>) -> bool {
        match self {
            GenreFilter::All => true,
            GenreFilter::Only(set) => genre.is_some_and(|g| set.contains(&normalize_genre(g))),
        }
    }
}

fn normalize_genre(genre: &str) -> String {
    genre.trim().to_lowercase()
}

/// Inclusive year bounds, either side optional
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct YearRange {
    pub from: Option<u32>,
    pub to: Option<u32>,
}

impl YearRange {
    pub fn is_bounded(&self) -> bool {
        self.from.is_some() || self.to.is_some()
    }

    pub fn matches(&self, year: Option<u32>) -> bool {
        if !self.is_bounded() {
            return true;
        }
        let Some(year) = year else {
            return false;
        };
        self.from.is_none_or(|from| year >= from) && self.to.is_none_or(|to| year <= to)
    }
}

/// Immutable filter applied for a whole session
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ScanFilter {
    pub genres: GenreFilter,
    pub years: YearRange,
}

impl ScanFilter {
    pub fn matches(&self, fields: &TagFields) -> bool {
        self.genres.matches(fields.genre.as_deref()) && self.years.matches(fields.year)
    }
}

/// Result of a scan
#[derive(Debug, Default)]
pub struct ScanReport {
    /// Tracks to review, in path order
    pub tracks: Vec<Track>,
    pub errors: Vec<ScanError>,
    pub decided_skipped: usize,
    pub filtered_out: usize,
}

impl ScanReport {
    pub fn files_seen(&self) -> usize {
        self.tracks.len() + self.errors.len() + self.decided_skipped + self.filtered_out
    }
}

/// Scan `roots` for tracks to review
///
/// Per-file problems are logged, reported and skipped. Fails only when
/// none of the roots can be read.
pub fn scan_library(
    roots: &[PathBuf],
    filter: &ScanFilter,
    codec: &dyn MetadataCodec,
    resume: &ResumeStateManager,
    sink: &ProgressSink,
) -> Result<ScanReport, StartupError> {
    let mut report = ScanReport::default();
    let mut inaccessible = Vec::new();
    let mut files: BTreeSet<PathBuf> = BTreeSet::new();

    for root in roots {
        let canonical_root = match fs::canonicalize(root) {
            Ok(p) if p.is_dir() => p,
            Ok(_) => {
                log::warn!("Library root is not a directory: {}", root.display());
                inaccessible.push(root.clone());
                continue;
            }
            Err(e) => {
                log::warn!("Library root is not accessible: {} ({})", root.display(), e);
                inaccessible.push(root.clone());
                continue;
            }
        };

        collect_audio_files(&canonical_root, &mut files, &mut report.errors);
    }

    if inaccessible.len() == roots.len() {
        return Err(StartupError::NoAccessibleRoots(inaccessible));
    }

    for e in &report.errors {
        sink.emit(ProgressEvent::SkippedError {
            path: e.path().clone(),
            reason: e.to_string(),
        });
    }

    for path in files {
        match scan_file(&path, codec) {
            Ok((fields, track)) => {
                if resume.classify(&path, &fields) == ResumeMarker::Decided {
                    log::trace!("Already decided: {}", path.display());
                    report.decided_skipped += 1;
                } else if !filter.matches(&fields) {
                    report.filtered_out += 1;
                } else {
                    sink.emit(ProgressEvent::Discovered {
                        path: track.path.clone(),
                    });
                    report.tracks.push(track);
                }
            }
            Err(e) => {
                log::warn!("Skipping file: {}", e);
                sink.emit(ProgressEvent::SkippedError {
                    path: e.path().clone(),
                    reason: e.to_string(),
                });
                report.errors.push(e);
            }
        }
    }

    log::info!(
        "Scan complete: {} to review, {} already decided, {} filtered out, {} errors",
        report.tracks.len(),
        report.decided_skipped,
        report.filtered_out,
        report.errors.len()
    );

    Ok(report)
}

/// Canonical paths of every MP3 under `root`; overlapping roots collapse in the set
fn collect_audio_files(root: &Path, files: &mut BTreeSet<PathBuf>, errors: &mut Vec<ScanError>) {
    for entry in WalkDir::new(root).follow_links(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let path = e.path().unwrap_or(root).to_path_buf();
                log::warn!("Cannot walk {}: {}", path.display(), e);
                errors.push(ScanError::Walk {
                    path,
                    reason: e.to_string(),
                });
                continue;
            }
        };

        if !entry.file_type().is_file() || !is_audio_file(entry.path()) {
            continue;
        }

        match fs::canonicalize(entry.path()) {
            Ok(canonical) => {
                files.insert(canonical);
            }
            Err(e) => errors.push(ScanError::Unreadable {
                path: entry.path().to_path_buf(),
                source: e,
            }),
        }
    }
}

fn scan_file(path: &Path, codec: &dyn MetadataCodec) -> Result<(TagFields, Track), ScanError> {
    let modified = fs::metadata(path)
        .and_then(|m| m.modified())
        .map_err(|e| ScanError::Unreadable {
            path: path.to_path_buf(),
            source: e,
        })?;

    let fields = codec.read(path)?;
    let track = Track {
        path: path.to_path_buf(),
        title: fields.title.clone(),
        artist: fields.artist.clone(),
        genre: fields.genre.clone(),
        year: fields.year,
        rating: fields.rating.rating(),
        tag_rating: fields.rating.rating(),
        marker: ResumeMarker::Unseen,
        modified,
    };
    Ok((fields, track))
}

/// Format duration in seconds to MM:SS format
pub fn format_duration(seconds: f64) -> String {
    let total_seconds = seconds.max(0.0) as u64;
    let minutes = total_seconds / 60;
    let secs = total_seconds % 60;
    format!("{}:{:02}", minutes, secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::Id3Codec;
    use crate::test_fixtures::{write_tagged_mp3, FixtureTags, MemoryCodec};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn scan(roots: &[PathBuf], filter: &ScanFilter) -> Result<ScanReport, StartupError> {
        let codec = Arc::new(Id3Codec::default());
        let resume = ResumeStateManager::new(codec.clone(), "true");
        scan_library(roots, filter, codec.as_ref(), &resume, &ProgressSink::disabled())
    }

    fn tagged(dir: &Path, name: &str, genre: Option<&str>, year: Option<u32>) -> PathBuf {
        let path = dir.join(name);
        write_tagged_mp3(
            &path,
            &FixtureTags {
                genre,
                year,
                ..Default::default()
            },
        );
        path
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0.0), "0:00");
        assert_eq!(format_duration(65.5), "1:05");
        assert_eq!(format_duration(3600.0), "60:00");
    }

    #[test]
    fn test_genre_filter_is_case_insensitive() {
        let filter = GenreFilter::only([" house ", "Tech House"]);
        assert!(filter.matches(Some("HOUSE")));
        assert!(filter.matches(Some("tech house ")));
        assert!(!filter.matches(Some("Techno")));
        assert!(!filter.matches(None));
        assert_eq!(GenreFilter::only(Vec::<String>::new()), GenreFilter::All);
    }

    #[test]
    fn test_year_range() {
        let unbounded = YearRange::default();
        assert!(unbounded.matches(None));

        let range = YearRange {
            from: Some(2010),
            to: Some(2015),
        };
        assert!(range.matches(Some(2010)));
        assert!(range.matches(Some(2015)));
        assert!(!range.matches(Some(2016)));
        assert!(!range.matches(None));

        let open_end = YearRange {
            from: Some(2020),
            to: None,
        };
        assert!(open_end.matches(Some(2024)));
        assert!(!open_end.matches(Some(2019)));
    }

    #[test]
    fn test_genre_filter_selects_matching_files() {
        let dir = TempDir::new().unwrap();
        tagged(dir.path(), "a.mp3", Some("House"), None);
        tagged(dir.path(), "b.mp3", Some("Techno"), None);
        tagged(dir.path(), "c.mp3", Some("house"), None);

        let filter = ScanFilter {
            genres: GenreFilter::only(["House"]),
            ..Default::default()
        };
        let report = scan(&[dir.path().to_path_buf()], &filter).unwrap();

        let names: Vec<_> = report
            .tracks
            .iter()
            .map(|t| t.path.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.mp3", "c.mp3"]);
        assert_eq!(report.filtered_out, 1);
    }

    #[test]
    fn test_genre_and_year_filters_combine() {
        let dir = TempDir::new().unwrap();
        tagged(dir.path(), "a.mp3", Some("House"), Some(2020));
        tagged(dir.path(), "b.mp3", Some("House"), Some(2019));
        tagged(dir.path(), "c.mp3", Some("Techno"), Some(2020));

        let filter = ScanFilter {
            genres: GenreFilter::only(["house"]),
            years: YearRange {
                from: Some(2020),
                to: Some(2020),
            },
        };
        let report = scan(&[dir.path().to_path_buf()], &filter).unwrap();

        assert_eq!(report.tracks.len(), 1);
        let track = &report.tracks[0];
        assert!(track.path.ends_with("a.mp3"));
        assert_eq!(track.genre.as_deref(), Some("House"));
        assert_eq!(track.year, Some(2020));
        assert_eq!(report.filtered_out, 2);
        assert_eq!(report.files_seen(), 3);
    }

    #[test]
    fn test_scan_order_is_lexicographic_and_recursive() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("b/nested")).unwrap();
        tagged(dir.path(), "b/nested/z.mp3", None, None);
        tagged(dir.path(), "c.mp3", None, None);
        tagged(dir.path(), "a.MP3", None, None);
        std::fs::write(dir.path().join("notes.txt"), "not audio").unwrap();

        let report = scan(&[dir.path().to_path_buf()], &ScanFilter::default()).unwrap();
        let paths: Vec<_> = report.tracks.iter().map(|t| t.path.clone()).collect();
        let mut sorted = paths.clone();
        sorted.sort();
        assert_eq!(paths.len(), 3);
        assert_eq!(paths, sorted);
    }

    #[test]
    fn test_overlapping_roots_are_deduplicated() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        tagged(dir.path(), "sub/a.mp3", None, None);

        let roots = vec![dir.path().to_path_buf(), dir.path().join("sub")];
        let report = scan(&roots, &ScanFilter::default()).unwrap();
        assert_eq!(report.tracks.len(), 1);
    }

    #[test]
    fn test_decided_tracks_are_skipped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("done.mp3");
        write_tagged_mp3(
            &path,
            &FixtureTags {
                raw_rating: Some("5"),
                ..Default::default()
            },
        );
        tagged(dir.path(), "todo.mp3", None, None);

        let codec = Arc::new(Id3Codec::default());
        let resume = ResumeStateManager::new(codec.clone(), "true");
        resume.mark_decided(&path).unwrap();

        let report = scan_library(
            &[dir.path().to_path_buf()],
            &ScanFilter::default(),
            codec.as_ref(),
            &resume,
            &ProgressSink::disabled(),
        )
        .unwrap();
        assert_eq!(report.tracks.len(), 1);
        assert_eq!(report.decided_skipped, 1);
    }

    #[test]
    fn test_unreadable_tag_is_reported_and_skipped() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let good = root.join("good.mp3");
        let bad = root.join("bad.mp3");
        std::fs::write(&good, b"").unwrap();
        std::fs::write(&bad, b"").unwrap();

        let codec = Arc::new(MemoryCodec::default());
        codec.insert(&good, TagFields::default());
        codec.fail_reads_for(&bad);
        let resume = ResumeStateManager::new(codec.clone(), "true");

        let (sink, rx) = ProgressSink::channel();
        let report =
            scan_library(&[root], &ScanFilter::default(), codec.as_ref(), &resume, &sink).unwrap();
        drop(sink);

        assert_eq!(report.tracks.len(), 1);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].path(), &bad);

        let events: Vec<_> = rx.iter().collect();
        assert_eq!(
            events,
            vec![
                ProgressEvent::SkippedError {
                    path: bad.clone(),
                    reason: report.errors[0].to_string(),
                },
                ProgressEvent::Discovered { path: good.clone() },
            ]
        );
    }

    #[test]
    fn test_all_roots_missing_is_fatal() {
        let result = scan(&[PathBuf::from("/nonexistent/library")], &ScanFilter::default());
        assert!(matches!(result, Err(StartupError::NoAccessibleRoots(_))));
    }

    #[test]
    fn test_one_missing_root_is_tolerated() {
        let dir = TempDir::new().unwrap();
        tagged(dir.path(), "a.mp3", None, None);

        let roots = vec![PathBuf::from("/nonexistent/library"), dir.path().to_path_buf()];
        let report = scan(&roots, &ScanFilter::default()).unwrap();
        assert_eq!(report.tracks.len(), 1);
    }

    #[test]
    fn test_empty_library_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        let report = scan(&[dir.path().to_path_buf()], &ScanFilter::default()).unwrap();
        assert!(report.tracks.is_empty());
        assert_eq!(report.files_seen(), 0);
    }
}
