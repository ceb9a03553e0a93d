//! Logging configuration for DJ Library Audit
//!
//! Logs are written to both the terminal and a file at:
//! `<data_local_dir>/DJ Library Audit/logs/djaudit.log`
//!
//! The file keeps the Debug-level detail of every decision, so it doubles as
//! an audit trail of what was kept, removed or rolled back.

use log::LevelFilter;
use simplelog::{
    ColorChoice, CombinedLogger, Config, ConfigBuilder, SharedLogger, TermLogger, TerminalMode,
    WriteLogger,
};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

const LOG_FILE: &str = "djaudit.log";

/// Rotate to `.old` beyond this size
const MAX_LOG_BYTES: u64 = 10 * 1024 * 1024;

pub fn get_log_directory() -> Option<PathBuf> {
    dirs::data_local_dir().map(|d| d.join("DJ Library Audit").join("logs"))
}

/// Initialize the logging system
///
/// Terminal at `terminal_level`, file at Debug. Falls back to terminal-only
/// logging if the log file cannot be opened. Returns the log file path on success.
pub fn init_logging(terminal_level: LevelFilter) -> Option<PathBuf> {
    let log_dir = match get_log_directory() {
        Some(d) => d,
        None => {
            eprintln!("Warning: Could not determine log directory");
            init_terminal_only(terminal_level);
            return None;
        }
    };

    if let Err(e) = fs::create_dir_all(&log_dir) {
        eprintln!("Warning: Could not create log directory: {}", e);
        init_terminal_only(terminal_level);
        return None;
    }

    let log_path = log_dir.join(LOG_FILE);
    rotate_if_large(&log_path);

    let log_file = match OpenOptions::new().create(true).append(true).open(&log_path) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Warning: Could not open log file: {}", e);
            init_terminal_only(terminal_level);
            return None;
        }
    };

    let config = log_config();
    let loggers: Vec<Box<dyn SharedLogger>> = vec![
        TermLogger::new(
            terminal_level,
            config.clone(),
            TerminalMode::Mixed,
            ColorChoice::Auto,
        ),
        WriteLogger::new(LevelFilter::Debug, config, log_file),
    ];

    if CombinedLogger::init(loggers).is_err() {
        eprintln!("Warning: Logger already initialized");
    }

    log::info!("=== DJ Library Audit started ===");
    log::info!("Log file: {}", log_path.display());

    Some(log_path)
}

fn log_config() -> Config {
    ConfigBuilder::new()
        .set_time_format_rfc3339()
        .set_thread_level(LevelFilter::Off)
        .set_target_level(LevelFilter::Off)
        .build()
}

/// Move `log_path` aside once it grows past the size limit
fn rotate_if_large(log_path: &Path) -> bool {
    match fs::metadata(log_path) {
        Ok(metadata) if metadata.len() > MAX_LOG_BYTES => {
            let backup_path = log_path.with_extension("log.old");
            fs::rename(log_path, backup_path).is_ok()
        }
        _ => false,
    }
}

fn init_terminal_only(level: LevelFilter) {
    let term_logger = TermLogger::new(level, log_config(), TerminalMode::Mixed, ColorChoice::Auto);
    let _ = CombinedLogger::init(vec![term_logger]);
}
