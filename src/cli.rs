//! CLI argument parsing and group configuration

use clap::Parser;
use std::path::{Path, PathBuf};

/// Run a group of cooperating ranks in one process with an interactive
/// coordinator on rank 0.
#[derive(Debug, Parser)]
#[command(name = "rankwire", version)]
pub struct Cli {
    /// Number of ranks in the group
    #[arg(short = 'n', long, default_value_t = 3)]
    pub ranks: usize,

    /// Read coordinator input from this file instead of stdin
    #[arg(short, long)]
    pub script: Option<PathBuf>,

    /// Start the background notifier on the coordinator at startup
    #[arg(long)]
    pub notifier: bool,

    /// Default log filter when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("A group needs at least one rank")]
    EmptyGroup,
    #[error("Failed to read script {path}: {source}")]
    Script {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Validated group settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupConfig {
    pub size: usize,
    pub start_notifier: bool,
}

impl Cli {
    pub fn group_config(&self) -> Result<GroupConfig, ConfigError> {
        if self.ranks == 0 {
            return Err(ConfigError::EmptyGroup);
        }
        Ok(GroupConfig {
            size: self.ranks,
            start_notifier: self.notifier,
        })
    }
}

/// Read a script file as a sequence of input lines.
///
/// Physical lines are joined while braces are unbalanced, so a braced script
/// body may span several lines.
pub fn read_script_lines(path: &Path) -> Result<Vec<String>, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Script {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(join_continued_lines(&text))
}

fn join_continued_lines(text: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut pending = String::new();
    let mut depth: i64 = 0;

    for line in text.lines() {
        if !pending.is_empty() {
            pending.push('\n');
        }
        pending.push_str(line);
        for c in line.chars() {
            match c {
                '{' => depth += 1,
                '}' => depth -= 1,
                _ => {}
            }
        }
        if depth <= 0 {
            depth = 0;
            let complete = std::mem::take(&mut pending);
            if !complete.trim().is_empty() {
                lines.push(complete);
            }
        }
    }
    if !pending.trim().is_empty() {
        lines.push(pending);
    }
    lines
}
