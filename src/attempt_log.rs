use chrono::Local;
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use crate::app_dirs::AppDirs;
use crate::error::Result;
use crate::puzzle::{Phase, Puzzle};
use crate::puzzle_config::Variant;
use crate::util::round_secs;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptRecord {
    pub date: String,
    pub variant: Variant,
    pub outcome: &'static str,
    pub elapsed_secs: f64,
    pub found: usize,
    pub guesses: usize,
}

impl AttemptRecord {
    /// None unless the puzzle reached a terminal state
    pub fn from_puzzle(puzzle: &Puzzle) -> Option<Self> {
        let (outcome, elapsed) = match puzzle.phase() {
            Phase::Completed => ("completed", puzzle.completion_time()?),
            Phase::Failed => ("failed", crate::puzzle::CHALLENGE_DURATION),
            Phase::Idle | Phase::Running => return None,
        };
        Some(Self {
            date: Local::now().format("%c").to_string(),
            variant: puzzle.variant(),
            outcome,
            elapsed_secs: round_secs(elapsed),
            found: puzzle.found_count(),
            guesses: puzzle.guess_count(),
        })
    }
}

/// Append-only CSV history of finished attempts
#[derive(Debug, Clone)]
pub struct AttemptLog {
    path: PathBuf,
}

impl AttemptLog {
    pub fn open_default() -> Option<Self> {
        AppDirs::attempt_log_path().map(Self::with_path)
    }

    pub fn with_path<P: AsRef<Path>>(p: P) -> Self {
        Self {
            path: p.as_ref().to_path_buf(),
        }
    }

    pub fn append(&self, record: &AttemptRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        // header only for a fresh file
        let needs_header = !self.path.exists();
        let file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(needs_header)
            .from_writer(file);
        writer.serialize(record)?;
        writer.flush()?;
        Ok(())
    }
}
