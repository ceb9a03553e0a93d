//! DJ Library Audit
//!
//! Walks a DJ library one track at a time. The operator rates and keeps a
//! track, or removes it; ratings end up in both the file's tag and the
//! Engine DJ database, removed files go to the trash.

mod audio;
mod cli;
mod console;
mod core;
mod decision;
mod error;
mod external;
mod logging;
mod session;
#[cfg(test)]
mod test_fixtures;
mod waveform;

use clap::Parser;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use audio::{Id3Codec, MetadataCodec};
use cli::{Cli, Command, FilterArgs};
use core::progress::{ProgressCounts, ProgressEvent, ProgressSink};
use core::state::AuditSettings;
use core::{format_duration, scan_library, Rating, ResumeStateManager};
use decision::EngineOptions;
use error::StartupError;
use external::{
    DirectoryTrash, DisabledNotifier, EngineDjStore, HttpNotifier, LibraryStore, NoExternalStore,
    Notifier, PendingDeletions, SystemTrash, TrashMover,
};
use session::{AuditSession, Collaborators, SessionConfig, SessionSummary};
use waveform::{DecodingAnalyzer, PipelineConfig};

/// How long the console waits for the current track's waveform before showing the prompt
const WAVEFORM_WAIT: Duration = Duration::from_secs(10);

fn main() -> ExitCode {
    let cli = Cli::parse();
    let log_path = logging::init_logging(cli.log_level());

    let settings = AuditSettings::load();
    if let Err(e) = settings.validate() {
        eprintln!("Error: {}", e);
        return ExitCode::FAILURE;
    }

    let result = match cli.command {
        Command::Audit {
            roots,
            filter,
            workers,
            depth,
        } => run_audit(&settings, roots, &filter, workers, depth, log_path.as_deref()),
        Command::List { roots, filter } => run_list(&settings, &roots, &filter),
        Command::Reset { files } => run_reset(&settings, &files),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            log::error!("{}", e);
            eprintln!("Fatal error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn codec_for(settings: &AuditSettings) -> Arc<dyn MetadataCodec> {
    Arc::new(Id3Codec::new(settings.tag_layout()))
}

/// The Engine DJ library, or tags only when it is not configured or cannot be opened
fn open_store(settings: &AuditSettings) -> Box<dyn LibraryStore> {
    // Both or neither, checked by `validate`
    let (Some(db), Some(pool)) = (&settings.engine_db_path, &settings.dj_pool_folder) else {
        log::info!("No Engine DJ database configured, ratings go to tags only");
        return Box::new(NoExternalStore);
    };

    let pool = match pool.canonicalize() {
        Ok(pool) => pool,
        Err(e) => {
            log::warn!(
                "DJ pool folder {} is not accessible ({}); ratings go to tags only",
                pool.display(),
                e
            );
            return Box::new(NoExternalStore);
        }
    };
    match EngineDjStore::open(db, &pool) {
        Ok(store) => Box::new(store),
        Err(e) => {
            log::warn!("{}; ratings go to tags only", e);
            Box::new(NoExternalStore)
        }
    }
}

/// A configured trash folder, otherwise the operating system's trash
fn open_trash(settings: &AuditSettings) -> Box<dyn TrashMover> {
    match &settings.trash_dir {
        Some(dir) => {
            log::info!("Removed files go to {}", dir.display());
            Box::new(DirectoryTrash::new(dir))
        }
        None => Box::new(SystemTrash),
    }
}

fn open_notifier(settings: &AuditSettings) -> Box<dyn Notifier> {
    let Some(url) = settings.active_api_url() else {
        return Box::new(DisabledNotifier);
    };
    match HttpNotifier::new(url, Duration::from_secs(settings.notify_timeout_secs)) {
        Ok(notifier) => Box::new(notifier),
        Err(e) => {
            log::warn!("Deletion notices disabled: {}", e);
            Box::new(DisabledNotifier)
        }
    }
}

fn open_journal() -> PendingDeletions {
    match AuditSettings::app_data_dir() {
        Ok(dir) => PendingDeletions::open(&dir.join(PendingDeletions::JOURNAL_FILE)),
        Err(e) => {
            log::warn!("{}; failed Engine DJ deletions will not be retried next run", e);
            PendingDeletions::in_memory()
        }
    }
}

/// Drain progress events into counts on a background thread
fn spawn_progress_logger() -> (ProgressSink, thread::JoinHandle<ProgressCounts>) {
    let (sink, events) = ProgressSink::channel();
    let handle = thread::spawn(move || {
        let mut counts = ProgressCounts::default();
        for event in events {
            match &event {
                ProgressEvent::SkippedError { path, reason } => {
                    log::debug!("Skipped {}: {}", path.display(), reason)
                }
                ProgressEvent::WaveformReady { path } => {
                    log::trace!("Waveform ready for {}", path.display())
                }
                _ => {}
            }
            counts.apply(&event);
        }
        counts
    });
    (sink, handle)
}

fn run_audit(
    settings: &AuditSettings,
    roots: Vec<PathBuf>,
    filter: &FilterArgs,
    workers: Option<usize>,
    depth: Option<usize>,
    log_path: Option<&Path>,
) -> Result<ExitCode, StartupError> {
    let filter = filter.to_filter(settings).map_err(StartupError::Config)?;
    let default_rating = Rating::new(settings.default_rating).ok_or_else(|| {
        StartupError::Config(format!("invalid default_rating {}", settings.default_rating))
    })?;

    let config = SessionConfig {
        roots,
        filter,
        pipeline: PipelineConfig::new(
            workers.unwrap_or(settings.worker_threads),
            depth.or(settings.configured_prefetch_depth()),
            settings.cache_capacity,
        ),
        engine: EngineOptions {
            policy: settings.missing_record_policy,
            default_rating,
            marker_value: settings.marker_value.clone(),
        },
    };

    let (sink, progress) = spawn_progress_logger();
    let collaborators = Collaborators {
        codec: codec_for(settings),
        store: open_store(settings),
        trash: open_trash(settings),
        notifier: open_notifier(settings),
        journal: open_journal(),
        analyzer: Arc::new(DecodingAnalyzer::new(settings.waveform_columns)),
        sink,
    };

    let mut session = AuditSession::start(config, collaborators)?;

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    if let Err(e) = console::run(&mut session, stdin.lock(), &mut stdout, WAVEFORM_WAIT) {
        log::error!("Console error: {}", e);
    }

    let summary = session.finish();
    match progress.join() {
        Ok(counts) => log::info!(
            "Progress: {} of {} discovered track(s) decided, {} remaining, {} waveform(s) computed",
            counts.decided(),
            counts.discovered,
            counts.remaining(),
            counts.waveform_ready
        ),
        Err(_) => log::warn!("Progress thread panicked"),
    }
    print_summary(&summary, log_path);
    Ok(ExitCode::SUCCESS)
}

fn print_summary(summary: &SessionSummary, log_path: Option<&Path>) {
    let elapsed = (summary.finished_at - summary.started_at)
        .to_std()
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0);

    println!();
    println!(
        "Session {}: {} kept, {} removed, {} remaining (of {} queued) in {}",
        summary.id,
        summary.kept,
        summary.removed,
        summary.remaining,
        summary.queued,
        format_duration(elapsed)
    );
    println!(
        "{} file(s) scanned: {} already decided, {} filtered out",
        summary.files_seen, summary.already_decided, summary.filtered_out
    );
    if summary.scan_errors > 0 {
        println!("{} file(s) could not be read, see the log", summary.scan_errors);
    }
    if summary.failed_decisions > 0 {
        println!("{} decision(s) failed and were rolled back", summary.failed_decisions);
    }
    if summary.pending_store_deletions > 0 {
        println!(
            "{} Engine DJ deletion(s) will be retried next run",
            summary.pending_store_deletions
        );
    }
    if summary.lost_store_deletions > 0 {
        println!(
            "{} Engine DJ record(s) could not be deleted or queued; remove them in Engine DJ",
            summary.lost_store_deletions
        );
    }
    if let (Some(delivered), Some(failed)) = (summary.notices_delivered, summary.notices_failed) {
        println!("Deletion notices: {} delivered, {} failed", delivered, failed);
    }
    log::debug!("Peak waveform queue length: {}", summary.peak_queued);
    if let Some(path) = log_path {
        println!("Log: {}", path.display());
    }
}

fn run_list(
    settings: &AuditSettings,
    roots: &[PathBuf],
    filter: &FilterArgs,
) -> Result<ExitCode, StartupError> {
    let filter = filter.to_filter(settings).map_err(StartupError::Config)?;
    let codec = codec_for(settings);
    let resume = ResumeStateManager::new(codec.clone(), settings.marker_value.clone());

    let report = scan_library(roots, &filter, codec.as_ref(), &resume, &ProgressSink::disabled())?;
    for (i, track) in report.tracks.iter().enumerate() {
        let rating = track
            .tag_rating
            .map(|r| r.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!("{:>5}  [{}]  {}", i + 1, rating, track.display_name());
    }
    for error in &report.errors {
        println!("unreadable: {}", error);
    }
    println!(
        "{} scanned: {} to review, {} already decided, {} filtered out, {} unreadable",
        report.files_seen(),
        report.tracks.len(),
        report.decided_skipped,
        report.filtered_out,
        report.errors.len()
    );
    Ok(ExitCode::SUCCESS)
}

fn run_reset(settings: &AuditSettings, files: &[PathBuf]) -> Result<ExitCode, StartupError> {
    let resume = ResumeStateManager::new(codec_for(settings), settings.marker_value.clone());
    let mut failed = 0;

    for file in files {
        let was_decided = match resume.is_decided(file) {
            Ok(decided) => decided,
            Err(e) => {
                failed += 1;
                log::error!("{}", e);
                eprintln!("failed: {}: {}", file.display(), e);
                continue;
            }
        };
        match resume.clear(file) {
            Ok(true) if was_decided => println!("reset: {}", file.display()),
            // A marker without a valid rating never counted as decided
            Ok(true) => println!("cleared stale marker: {}", file.display()),
            Ok(false) => println!("not decided: {}", file.display()),
            Err(e) => {
                failed += 1;
                log::error!("{}", e);
                eprintln!("failed: {}: {}", file.display(), e);
            }
        }
    }

    Ok(if failed > 0 {
        ExitCode::from(1)
    } else {
        ExitCode::SUCCESS
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::engine_db::tests::create_engine_db;
    use tempfile::TempDir;

    fn settings_with_store(db: PathBuf, pool: PathBuf) -> AuditSettings {
        AuditSettings {
            engine_db_path: Some(db),
            dj_pool_folder: Some(pool),
            ..Default::default()
        }
    }

    #[test]
    fn test_missing_database_falls_back_to_tags_only() {
        let dir = TempDir::new().unwrap();
        let settings = settings_with_store(dir.path().join("m.db"), dir.path().to_path_buf());

        let store = open_store(&settings);
        assert_eq!(store.lookup(&dir.path().join("a.mp3")).unwrap(), None);
    }

    #[test]
    fn test_invalid_database_falls_back_to_tags_only() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("m.db");
        std::fs::write(&db, "not a database").unwrap();
        let settings = settings_with_store(db, dir.path().to_path_buf());

        let store = open_store(&settings);
        assert_eq!(store.lookup(&dir.path().join("a.mp3")).unwrap(), None);
    }

    #[test]
    fn test_missing_pool_folder_falls_back_to_tags_only() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("m.db");
        create_engine_db(&db, &[]);
        let settings = settings_with_store(db, dir.path().join("no_pool"));

        let store = open_store(&settings);
        assert_eq!(store.lookup(&dir.path().join("no_pool/a.mp3")).unwrap(), None);
    }

    #[test]
    fn test_valid_database_is_opened() {
        let dir = TempDir::new().unwrap();
        let pool = dir.path().join("DJ_Pool");
        std::fs::create_dir_all(&pool).unwrap();
        let db = dir.path().join("m.db");
        create_engine_db(&db, &[("../DJ_Pool/a.mp3", 80)]);

        let store = open_store(&settings_with_store(db, pool.clone()));
        let record = store.lookup(&pool.canonicalize().unwrap().join("a.mp3")).unwrap();
        assert_eq!(record.and_then(|r| r.rating), Rating::new(4));
    }

    #[test]
    fn test_configured_trash_dir_is_used() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.mp3");
        std::fs::write(&file, b"audio").unwrap();
        let settings = AuditSettings {
            trash_dir: Some(dir.path().join("Trash")),
            ..Default::default()
        };

        let trashed = open_trash(&settings).move_to_trash(&file).unwrap();
        assert!(!file.exists());
        assert!(trashed.location.to_string().contains("Trash"));
    }
}
