//! Command-line arguments

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::core::state::AuditSettings;
use crate::core::{GenreFilter, ScanFilter, YearRange};

/// djaudit - review a DJ library track by track
///
/// Rate and keep, or remove, every MP3 under the given folders. Decisions
/// are written into the files themselves, so an interrupted audit resumes
/// where it stopped.
#[derive(Parser, Debug)]
#[command(name = "djaudit")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Verbose terminal output (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Review undecided tracks interactively
    Audit {
        #[arg(required = true, value_name = "ROOT")]
        roots: Vec<PathBuf>,

        #[command(flatten)]
        filter: FilterArgs,

        /// Waveform worker threads
        #[arg(short = 'j', long, value_name = "N")]
        workers: Option<usize>,

        /// Maximum queued waveform jobs (defaults to twice the workers)
        #[arg(long, value_name = "N")]
        depth: Option<usize>,
    },

    /// Print the tracks an audit would review, without changing anything
    List {
        #[arg(required = true, value_name = "ROOT")]
        roots: Vec<PathBuf>,

        #[command(flatten)]
        filter: FilterArgs,
    },

    /// Clear the decided marker so files are reviewed again
    Reset {
        #[arg(required = true, value_name = "FILE")]
        files: Vec<PathBuf>,
    },
}

#[derive(Args, Debug, Default, Clone)]
pub struct FilterArgs {
    /// Only review this genre (repeatable, case-insensitive)
    #[arg(long, value_name = "GENRE")]
    pub genre: Vec<String>,

    /// Only review the genres listed in settings.json
    #[arg(long, conflicts_with = "genre")]
    pub configured_genres: bool,

    /// Earliest release year to review
    #[arg(long, value_name = "YEAR")]
    pub year_from: Option<u32>,

    /// Latest release year to review
    #[arg(long, value_name = "YEAR")]
    pub year_to: Option<u32>,
}

impl FilterArgs {
    /// Build the session filter. Fails on an inverted year range.
    pub fn to_filter(&self, settings: &AuditSettings) -> Result<ScanFilter, String> {
        if let (Some(from), Some(to)) = (self.year_from, self.year_to)
            && from > to
        {
            return Err(format!("--year-from {} is after --year-to {}", from, to));
        }

        let genres = if self.configured_genres {
            GenreFilter::only(&settings.genres)
        } else {
            GenreFilter::only(&self.genre)
        };

        Ok(ScanFilter {
            genres,
            years: YearRange {
                from: self.year_from,
                to: self.year_to,
            },
        })
    }
}

impl Cli {
    pub fn log_level(&self) -> log::LevelFilter {
        match self.verbose {
            0 => log::LevelFilter::Info,
            1 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    }
}
