//! Coloured status lines for the terminal
//!
//! Every user-facing progress message goes through here so the tags stay
//! consistent across commands. Errors go to stderr, everything else to stdout.

use crossterm::style::{Attribute, Color, Stylize};
use std::sync::atomic::{AtomicBool, Ordering};

static DEBUG: AtomicBool = AtomicBool::new(false);

/// Enable or disable `[DEBUG]` lines
pub fn set_debug(enabled: bool) {
    DEBUG.store(enabled, Ordering::Relaxed);
}

/// Whether `[DEBUG]` lines are printed
pub fn is_debug() -> bool {
    DEBUG.load(Ordering::Relaxed)
}

/// Status tag printed in front of each line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Error,
    Success,
    Info,
    Warning,
    Stage,
    Debug,
}

impl Level {
    fn tag(self) -> &'static str {
        match self {
            Level::Error => "[ERROR]",
            Level::Success => "[SUCCESS]",
            Level::Info => "[INFO]",
            Level::Warning => "[WARNING]",
            Level::Stage => "[STAGE]",
            Level::Debug => "[DEBUG]",
        }
    }

    fn color(self) -> Color {
        match self {
            Level::Error => Color::Red,
            Level::Success => Color::Green,
            Level::Info => Color::Cyan,
            Level::Warning => Color::Yellow,
            Level::Stage => Color::Magenta,
            Level::Debug => Color::DarkGrey,
        }
    }
}

/// Format a status line without colour
pub fn plain_line(level: Level, msg: &str) -> String {
    format!("{} {}", level.tag(), msg)
}

fn emit(level: Level, msg: &str) {
    let mut tag = level.tag().with(level.color());
    if level == Level::Stage {
        tag = tag.attribute(Attribute::Bold);
    }
    if level == Level::Error {
        eprintln!("{} {}", tag, msg);
    } else {
        println!("{} {}", tag, msg);
    }
}

pub fn error(msg: impl AsRef<str>) {
    emit(Level::Error, msg.as_ref());
}

pub fn success(msg: impl AsRef<str>) {
    emit(Level::Success, msg.as_ref());
}

pub fn info(msg: impl AsRef<str>) {
    emit(Level::Info, msg.as_ref());
}

pub fn warning(msg: impl AsRef<str>) {
    tracing::warn!("{}", msg.as_ref());
    emit(Level::Warning, msg.as_ref());
}

/// Marks the start of a major step
pub fn stage(msg: impl AsRef<str>) {
    emit(Level::Stage, msg.as_ref());
}

pub fn debug(msg: impl AsRef<str>) {
    if is_debug() {
        emit(Level::Debug, msg.as_ref());
    }
}

/// Render a title surrounded by `=` rules
pub fn banner_text(title: &str) -> String {
    let border = "=".repeat(title.chars().count() + 4);
    format!("\n{}\n  {}  \n{}\n", border, title, border)
}

/// Print a banner
pub fn banner(title: &str) {
    println!("{}", banner_text(title));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_line() {
        assert_eq!(plain_line(Level::Warning, "disk low"), "[WARNING] disk low");
        assert_eq!(plain_line(Level::Stage, "init"), "[STAGE] init");
    }

    #[test]
    fn test_banner_border_matches_title() {
        let text = banner_text("Swarm");
        let lines: Vec<&str> = text.trim().lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "=========");
        assert_eq!(lines[1], "  Swarm  ");
        assert_eq!(lines[0], lines[2]);
    }

    #[test]
    fn test_debug_toggle() {
        set_debug(true);
        assert!(is_debug());
        set_debug(false);
        assert!(!is_debug());
    }
}
