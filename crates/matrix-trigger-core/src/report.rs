//! Presentation of build outcomes.
//!
//! Provides:
//! - `BuildOutcome`, the per-build result the batch returns
//! - status decoration (ANSI colour per terminal state)
//! - the `Reporter` seam for progress dots and the final summary table

use std::collections::BTreeMap;
use std::io::Write;

use serde::{Deserialize, Serialize};

use crate::status::{BuildStatus, TerminalState};

const RESET: &str = "\x1b[0m";
const RED: &str = "\x1b[31;1m";
const GREEN: &str = "\x1b[32;1m";
const YELLOW: &str = "\x1b[33;1m";
const BLUE: &str = "\x1b[34;1m";
const MAGENTA: &str = "\x1b[35;1m";

/// Final result of one build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildOutcome {
    /// Identifier of the matrix row.
    pub id: String,
    /// Status text as reported by the platform.
    pub status: String,
    pub state: TerminalState,
    /// `status` wrapped in the colour of `state`.
    pub decorated_status: String,
    pub url: String,
    pub duration: String,
}

impl BuildOutcome {
    pub fn new(id: &str, status: &str, state: TerminalState, url: String, duration: String) -> Self {
        BuildOutcome {
            id: id.to_string(),
            status: status.to_string(),
            state,
            decorated_status: decorate(state, status),
            url,
            duration,
        }
    }
}

fn colour(state: TerminalState) -> &'static str {
    match state {
        TerminalState::Succeeded => GREEN,
        TerminalState::FailedError => RED,
        TerminalState::Aborted => YELLOW,
        TerminalState::AbortedWithSuccess => MAGENTA,
        TerminalState::Unknown => BLUE,
    }
}

/// Wrap `text` in the colour of `state`.
pub fn decorate(state: TerminalState, text: &str) -> String {
    format!("{}{}{}", colour(state), text, RESET)
}

/// Progress marker for one poll result.
pub fn progress_dot(status: BuildStatus) -> String {
    match status.phase() {
        crate::status::Phase::Pending => ".".to_string(),
        crate::status::Phase::Terminal(state) => decorate(state, "."),
    }
}

/// Receives progress and the final summary of a batch.
pub trait Reporter: Send + Sync {
    /// A snapshot of build `id` was classified.
    fn progress(&self, id: &str, status: BuildStatus);

    /// The batch finished; called on success and failure alike.
    fn summary(&self, outcomes: &BTreeMap<String, BuildOutcome>);
}

/// Writes coloured dots and the summary table to stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleReporter;

impl Reporter for ConsoleReporter {
    fn progress(&self, _id: &str, status: BuildStatus) {
        let mut stdout = std::io::stdout().lock();
        let _ = write!(stdout, "{}", progress_dot(status));
        let _ = stdout.flush();
    }

    fn summary(&self, outcomes: &BTreeMap<String, BuildOutcome>) {
        println!();
        println!("{}", render_table(outcomes));
        println!();
    }
}

/// Render the four-column summary table (ID, DURATION, URL, STATUS).
pub fn render_table(outcomes: &BTreeMap<String, BuildOutcome>) -> String {
    let header = ["ID", "DURATION", "URL", "STATUS"];
    let rows: Vec<[&str; 4]> = outcomes
        .values()
        .map(|o| [o.id.as_str(), o.duration.as_str(), o.url.as_str(), o.decorated_status.as_str()])
        .collect();

    let mut widths = header.map(visible_width);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row.iter()) {
            *width = (*width).max(visible_width(cell));
        }
    }

    let rule = |left: &str, mid: &str, right: &str| {
        let segments: Vec<String> = widths.iter().map(|w| "─".repeat(w + 2)).collect();
        format!("{left}{}{right}", segments.join(mid))
    };

    let mut lines = vec![rule("╔", "╤", "╗")];
    let header_cells: Vec<String> = header
        .iter()
        .zip(widths.iter())
        .map(|(cell, width)| center(cell, *width))
        .collect();
    lines.push(format!("║ {} ║", header_cells.join(" │ ")));
    lines.push(rule("╟", "┼", "╢"));

    for row in &rows {
        let cells: Vec<String> = row
            .iter()
            .enumerate()
            .map(|(i, cell)| {
                if i == 3 {
                    pad_left(cell, widths[i])
                } else {
                    pad_right(cell, widths[i])
                }
            })
            .collect();
        lines.push(format!("║ {} ║", cells.join(" │ ")));
    }

    lines.push(rule("╚", "╧", "╝"));
    lines.join("\n")
}

/// Display width of `text`, ignoring ANSI escape sequences.
fn visible_width(text: &str) -> usize {
    let mut width = 0;
    let mut in_escape = false;
    for ch in text.chars() {
        match (in_escape, ch) {
            (false, '\x1b') => in_escape = true,
            (true, 'm') => in_escape = false,
            (true, _) => {}
            (false, _) => width += 1,
        }
    }
    width
}

fn pad_right(text: &str, width: usize) -> String {
    format!("{text}{}", " ".repeat(width.saturating_sub(visible_width(text))))
}

fn pad_left(text: &str, width: usize) -> String {
    format!("{}{text}", " ".repeat(width.saturating_sub(visible_width(text))))
}

fn center(text: &str, width: usize) -> String {
    let gap = width.saturating_sub(visible_width(text));
    let left = gap / 2;
    format!("{}{text}{}", " ".repeat(left), " ".repeat(gap - left))
}
