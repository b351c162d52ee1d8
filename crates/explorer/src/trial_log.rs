//! Append-only log of search trials.
//!
//! One event per line: `[YYYY-mm-dd HH:MM:SS] {json}`. The log is the only
//! state a search keeps between runs.

use crate::search::Objective;
use anyhow::{Context, Result};
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialOutcome {
    Achievable(u32),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TrialEvent {
    Started {
        objective: Objective,
        initial: u32,
    },
    Trial {
        iteration: usize,
        candidate: u32,
        outcome: TrialOutcome,
    },
    Converged {
        value: u32,
    },
    Exhausted {
        best: u32,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrialRecord {
    pub timestamp: String,
    /// 1-based line number in the log file.
    pub line: usize,
    pub event: TrialEvent,
}

/// The records between one `started` event and the next.
#[derive(Debug, Clone, PartialEq)]
pub struct TrialRun {
    pub objective: Objective,
    pub initial: u32,
    pub start_line: usize,
    pub records: Vec<TrialRecord>,
}

impl TrialRun {
    /// Final value of a run that already finished, and whether it converged.
    pub fn finished(&self) -> Option<(u32, bool)> {
        self.records.iter().rev().find_map(|record| match record.event {
            TrialEvent::Converged { value } => Some((value, true)),
            TrialEvent::Exhausted { best } => Some((best, false)),
            _ => None,
        })
    }

    pub fn evaluations(&self) -> usize {
        self.records
            .iter()
            .filter(|record| matches!(record.event, TrialEvent::Trial { .. }))
            .count()
    }
}

#[derive(Debug, Clone)]
pub struct TrialLog {
    path: PathBuf,
}

impl TrialLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, event: &TrialEvent) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("opening trial log {}", self.path.display()))?;

        let mut line = String::new();
        if !ends_with_newline(&mut file)? {
            // close off a torn record so this one starts on its own line
            line.push('\n');
        }
        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
        line.push_str(&format!("[{}] {}\n", timestamp, serde_json::to_string(event)?));
        file.write_all(line.as_bytes())
            .with_context(|| format!("appending to trial log {}", self.path.display()))?;
        Ok(())
    }

    /// Every parseable record. A missing file is an empty log; lines that do
    /// not parse (for example a torn final write) are skipped.
    pub fn read(&self) -> Result<Vec<TrialRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let text = fs::read_to_string(&self.path)
            .with_context(|| format!("reading trial log {}", self.path.display()))?;
        let mut records = Vec::new();
        for (idx, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match parse_line(line) {
                Some((timestamp, event)) => records.push(TrialRecord {
                    timestamp,
                    line: idx + 1,
                    event,
                }),
                None => warn!(
                    log = %self.path.display(),
                    line = idx + 1,
                    "skipping unreadable trial record"
                ),
            }
        }
        Ok(records)
    }

    /// Records grouped by the `started` event that opened them. Records that
    /// precede any `started` event are dropped.
    pub fn runs(&self) -> Result<Vec<TrialRun>> {
        let mut runs: Vec<TrialRun> = Vec::new();
        for record in self.read()? {
            match &record.event {
                TrialEvent::Started { objective, initial } => runs.push(TrialRun {
                    objective: *objective,
                    initial: *initial,
                    start_line: record.line,
                    records: Vec::new(),
                }),
                _ => match runs.last_mut() {
                    Some(run) => run.records.push(record),
                    None => warn!(
                        log = %self.path.display(),
                        line = record.line,
                        "trial record before any started event"
                    ),
                },
            }
        }
        Ok(runs)
    }
}

/// True for an empty file or one whose last byte is a newline.
fn ends_with_newline(file: &mut File) -> Result<bool> {
    if file.metadata()?.len() == 0 {
        return Ok(true);
    }
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

fn parse_line(line: &str) -> Option<(String, TrialEvent)> {
    let rest = line.strip_prefix('[')?;
    let (timestamp, json) = rest.split_once("] ")?;
    let event = serde_json::from_str(json).ok()?;
    Some((timestamp.to_string(), event))
}
