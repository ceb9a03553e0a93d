//! Line-oriented operator console for an audit session

use std::io::{self, BufRead, Write};
use std::time::Duration;

use crate::core::Track;
use crate::decision::StoreRemoval;
use crate::session::AuditSession;
use crate::waveform::WaveformStatus;

/// Overview characters from quiet to loud
const LEVELS: &[u8] = b" .:-=+*#%@";

const OVERVIEW_WIDTH: usize = 72;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleCommand {
    Rate(u8),
    Keep,
    Remove,
    /// Bring back the last removed file
    Undo,
    /// 1-based queue position
    Jump(usize),
    Help,
    Quit,
}

pub fn parse_command(line: &str) -> Option<ConsoleCommand> {
    let mut parts = line.split_whitespace();
    let head = parts.next()?.to_lowercase();
    let command = match head.as_str() {
        "1" | "2" | "3" | "4" | "5" => ConsoleCommand::Rate(head.parse().ok()?),
        "k" | "keep" => ConsoleCommand::Keep,
        "d" | "remove" => ConsoleCommand::Remove,
        "u" | "undo" => ConsoleCommand::Undo,
        "j" | "jump" => ConsoleCommand::Jump(parts.next()?.parse().ok().filter(|&n| n > 0)?),
        "h" | "?" | "help" => ConsoleCommand::Help,
        "q" | "quit" => ConsoleCommand::Quit,
        _ => return None,
    };
    if parts.next().is_some() {
        return None;
    }
    Some(command)
}

/// Render a loudness overview (values in 0.0..=1.0) as a line of characters
pub fn render_overview(levels: &[f32]) -> String {
    levels
        .iter()
        .map(|&level| {
            let top = (LEVELS.len() - 1) as f32;
            let index = (level.clamp(0.0, 1.0) * top).round() as usize;
            LEVELS[index.min(LEVELS.len() - 1)] as char
        })
        .collect()
}

fn describe(track: &Track) -> String {
    let mut details = Vec::new();
    if let Some(genre) = &track.genre {
        details.push(genre.clone());
    }
    if let Some(year) = track.year {
        details.push(year.to_string());
    }
    let rating = track
        .rating
        .map(|r| format!("{} stars", r))
        .unwrap_or_else(|| "unrated".to_string());

    if details.is_empty() {
        format!("{} [{}]", track.display_name(), rating)
    } else {
        format!("{} ({}) [{}]", track.display_name(), details.join(", "), rating)
    }
}

fn print_help<W: Write>(out: &mut W) -> io::Result<()> {
    writeln!(out, "  1-5     set rating")?;
    writeln!(out, "  k       keep (writes rating, marks decided)")?;
    writeln!(out, "  d       remove (moves file to trash)")?;
    writeln!(out, "  u       undo the last remove")?;
    writeln!(out, "  j N     jump to track N")?;
    writeln!(out, "  q       quit (progress is already saved)")
}

fn show_current<W: Write>(
    session: &AuditSession,
    out: &mut W,
    waveform_wait: Duration,
) -> io::Result<()> {
    let Some(track) = session.current() else {
        return Ok(());
    };

    let eta = session.eta();
    writeln!(out)?;
    writeln!(
        out,
        "[{}/{}] {}  {} left {}",
        session.cursor() + 1,
        session.queue().len(),
        describe(track),
        session.remaining(),
        eta
    )?;

    match session.waveform(waveform_wait) {
        WaveformStatus::Ready(envelope) => {
            writeln!(out, "  |{}|", render_overview(&envelope.overview(OVERVIEW_WIDTH)))?
        }
        WaveformStatus::Unavailable(e) => writeln!(out, "  (no waveform: {})", e)?,
        WaveformStatus::Pending => writeln!(out, "  (waveform still loading)")?,
    }
    Ok(())
}

/// Drive `session` from `input` until the queue is done, `q`, or end of input
pub fn run<R: BufRead, W: Write>(
    session: &mut AuditSession,
    input: R,
    out: &mut W,
    waveform_wait: Duration,
) -> io::Result<()> {
    if session.is_finished() {
        writeln!(out, "Nothing to review.")?;
        return Ok(());
    }

    writeln!(
        out,
        "{} track(s) to review across {} folder(s). Type h for help.",
        session.remaining(),
        session.config().roots.len()
    )?;
    show_current(session, out, waveform_wait)?;
    write!(out, "> ")?;
    out.flush()?;

    for line in input.lines() {
        let line = line?;
        let Some(command) = parse_command(&line) else {
            if !line.trim().is_empty() {
                writeln!(out, "Unknown command '{}'. Type h for help.", line.trim())?;
            }
            write!(out, "> ")?;
            out.flush()?;
            continue;
        };

        match command {
            ConsoleCommand::Rate(stars) => {
                if let Some(rating) = session.rate(stars) {
                    writeln!(out, "Rating set to {}", rating)?;
                }
            }
            ConsoleCommand::Keep => match session.keep() {
                Ok(Some(outcome)) => {
                    if let Some(d) = outcome.discrepancy {
                        writeln!(
                            out,
                            "Note: tag said {:?}, Engine DJ said {:?}",
                            d.tag.map(|r| r.stars()),
                            d.store.map(|r| r.stars())
                        )?;
                    }
                    writeln!(out, "Kept at {} stars", outcome.rating)?;
                    show_current(session, out, waveform_wait)?;
                }
                Ok(None) => {}
                Err(e) => writeln!(out, "Keep failed, nothing changed: {}", e)?,
            },
            ConsoleCommand::Remove => match session.remove() {
                Ok(Some(outcome)) => {
                    writeln!(out, "Moved to {}", outcome.trashed.location)?;
                    match outcome.store {
                        StoreRemoval::Journaled => {
                            writeln!(out, "Engine DJ record not deleted yet, will retry next run")?
                        }
                        StoreRemoval::Lost => writeln!(
                            out,
                            "Engine DJ record could not be deleted, remove it in Engine DJ"
                        )?,
                        StoreRemoval::Deleted | StoreRemoval::Absent => {}
                    }
                    show_current(session, out, waveform_wait)?;
                }
                Ok(None) => {}
                Err(e) => writeln!(out, "Remove failed: {}", e)?,
            },
            ConsoleCommand::Undo => match session.undo() {
                Ok(true) => {
                    writeln!(out, "Restored")?;
                    show_current(session, out, waveform_wait)?;
                }
                Ok(false) => writeln!(out, "Nothing to undo")?,
                Err(e) => writeln!(out, "Undo failed: {}", e)?,
            },
            ConsoleCommand::Jump(position) => {
                if session.jump_to(position - 1) {
                    show_current(session, out, waveform_wait)?;
                } else {
                    writeln!(out, "No undecided track at {}", position)?;
                }
            }
            ConsoleCommand::Help => print_help(out)?,
            ConsoleCommand::Quit => break,
        }

        if session.is_finished() {
            writeln!(out, "All tracks reviewed.")?;
            break;
        }
        write!(out, "> ")?;
        out.flush()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse_command("4"), Some(ConsoleCommand::Rate(4)));
        assert_eq!(parse_command(" K "), Some(ConsoleCommand::Keep));
        assert_eq!(parse_command("d"), Some(ConsoleCommand::Remove));
        assert_eq!(parse_command("u"), Some(ConsoleCommand::Undo));
        assert_eq!(parse_command("UNDO"), Some(ConsoleCommand::Undo));
        assert_eq!(parse_command("j 12"), Some(ConsoleCommand::Jump(12)));
        assert_eq!(parse_command("q"), Some(ConsoleCommand::Quit));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(parse_command(""), None);
        assert_eq!(parse_command("6"), None);
        assert_eq!(parse_command("j"), None);
        assert_eq!(parse_command("j 0"), None);
        assert_eq!(parse_command("k now"), None);
        assert_eq!(parse_command("u 2"), None);
    }

    #[test]
    fn test_render_overview_scales_levels() {
        assert_eq!(render_overview(&[0.0, 1.0, 2.0, -1.0]), " @@ ");
        assert_eq!(render_overview(&[]), "");
    }
}
