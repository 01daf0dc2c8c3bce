use crate::core::executor::{ApplySummary, FailedEntry};
use crate::core::planner::ActionPlan;
use crate::database::models::{EntryStatus, OperationKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const HISTORY_FILE: &str = ".cullrs-history.jsonl";

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterializedFile {
    pub source: PathBuf,
    pub output: PathBuf,
}

/// One apply run as recorded in the output folder's journal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyRecord {
    pub applied_at: DateTime<Utc>,
    pub output_root: PathBuf,
    pub operations: Vec<OperationKind>,
    pub completed: Vec<MaterializedFile>,
    pub failed: Vec<FailedEntry>,
}

impl ApplyRecord {
    pub fn from_plan(plan: &ActionPlan, summary: &ApplySummary) -> Self {
        let mut operations: Vec<OperationKind> = Vec::new();
        for entry in &plan.entries {
            if !operations.contains(&entry.operation) {
                operations.push(entry.operation);
            }
        }

        let completed = plan
            .entries
            .iter()
            .filter(|entry| entry.status == EntryStatus::Completed)
            .map(|entry| MaterializedFile {
                source: entry.source_path.clone(),
                output: entry.output_path.clone(),
            })
            .collect();

        Self {
            applied_at: Utc::now(),
            output_root: plan.output_root.clone(),
            operations,
            completed,
            failed: summary.failures.clone(),
        }
    }
}

pub fn history_path(output_root: &Path) -> PathBuf {
    output_root.join(HISTORY_FILE)
}

/// Appends one JSON line to the journal, creating it if needed.
pub fn append(output_root: &Path, record: &ApplyRecord) -> Result<(), HistoryError> {
    let path = history_path(output_root);
    let io_err = |source| HistoryError::Io {
        path: path.clone(),
        source,
    };

    std::fs::create_dir_all(output_root).map_err(io_err)?;
    let mut out = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(io_err)?;
    writeln!(out, "{}", serde_json::to_string(record)?).map_err(io_err)?;
    Ok(())
}

/// Records in append order. Malformed lines are logged and skipped; a
/// missing journal reads as empty.
pub fn load(output_root: &Path) -> Result<Vec<ApplyRecord>, HistoryError> {
    let path = history_path(output_root);
    let file = match File::open(&path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => return Err(HistoryError::Io { path, source }),
    };

    let mut records = Vec::new();
    for (i, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|source| HistoryError::Io {
            path: path.clone(),
            source,
        })?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<ApplyRecord>(&line) {
            Ok(record) => records.push(record),
            Err(e) => log::warn!("Skipping malformed history entry {}: {}", i, e),
        }
    }
    Ok(records)
}
