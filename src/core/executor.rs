use crate::core::hash::{ContentHasher, HashError};
use crate::core::planner::ActionPlan;
use crate::database::models::{EntryStatus, OperationKind, OutputMapping};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::sync::mpsc;

#[cfg(windows)]
const CROSS_DEVICE_ERROR: i32 = 17; // ERROR_NOT_SAME_DEVICE
#[cfg(not(windows))]
const CROSS_DEVICE_ERROR: i32 = 18; // EXDEV

#[derive(Debug, Error)]
pub enum OperationError {
    #[error("Cannot hardlink across filesystems: {source_path} -> {destination}")]
    CrossDevice {
        source_path: PathBuf,
        destination: PathBuf,
    },

    #[error("Destination already exists with different content: {0}")]
    DestinationExists(PathBuf),

    #[error("Source file is missing: {0}")]
    SourceMissing(PathBuf),

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Worker pool error: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

impl OperationError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Result of one plan entry, streamed to listeners as it happens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryOutcome {
    pub asset_id: String,
    pub source_path: PathBuf,
    pub output_path: PathBuf,
    pub status: EntryStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedEntry {
    pub asset_id: String,
    pub source_path: PathBuf,
    pub output_path: PathBuf,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplySummary {
    pub succeeded: usize,
    pub failed: usize,
    pub failures: Vec<FailedEntry>,
}

impl ApplySummary {
    pub fn is_complete_success(&self) -> bool {
        self.failed == 0
    }
}

/// Runs a previewed plan. Every entry is its own fault domain: a failure is
/// recorded on that entry and the rest of the batch carries on.
pub struct ActionExecutor {
    workers: usize,
    outcome_sender: Option<mpsc::UnboundedSender<EntryOutcome>>,
    cancelled: Arc<AtomicBool>,
    hasher: ContentHasher,
}

impl ActionExecutor {
    pub fn new() -> Self {
        Self {
            workers: num_cpus::get(),
            outcome_sender: None,
            cancelled: Arc::new(AtomicBool::new(false)),
            hasher: ContentHasher::new(),
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_outcome_sender(mut self, sender: mpsc::UnboundedSender<EntryOutcome>) -> Self {
        self.outcome_sender = Some(sender);
        self
    }

    /// Entries not yet started when this is called stay Pending.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    /// Executes every Pending or Failed entry and updates its status in
    /// place. Completed entries are left alone, so a partially applied plan
    /// can be applied again.
    pub fn apply(&self, plan: &mut ActionPlan) -> Result<ApplySummary, OperationError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .build()?;

        pool.install(|| {
            plan.entries.par_iter_mut().for_each(|entry| {
                if entry.status.is_completed() || self.cancelled.load(Ordering::Relaxed) {
                    return;
                }

                entry.status = match self.execute(entry) {
                    Ok(()) => EntryStatus::Completed,
                    Err(e) => {
                        log::warn!(
                            "Failed {} -> {}: {}",
                            entry.source_path.display(),
                            entry.output_path.display(),
                            e
                        );
                        EntryStatus::Failed {
                            error: e.to_string(),
                        }
                    }
                };

                if let Some(sender) = &self.outcome_sender {
                    let _ = sender.send(EntryOutcome {
                        asset_id: entry.asset_id.clone(),
                        source_path: entry.source_path.clone(),
                        output_path: entry.output_path.clone(),
                        status: entry.status.clone(),
                    });
                }
            });
        });

        let summary = summarize(plan);
        log::info!(
            "Apply finished: {} succeeded, {} failed",
            summary.succeeded,
            summary.failed
        );
        Ok(summary)
    }

    fn execute(&self, entry: &OutputMapping) -> Result<(), OperationError> {
        let source = &entry.source_path;
        let destination = &entry.output_path;

        if !source.is_file() {
            return Err(OperationError::SourceMissing(source.clone()));
        }

        if fs::symlink_metadata(destination).is_ok() {
            return self.check_existing(source, destination);
        }

        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).map_err(|e| OperationError::io(parent, e))?;
        }

        let result = match entry.operation {
            OperationKind::Copy => copy_atomically(source, destination),
            OperationKind::Hardlink => hard_link(source, destination),
        };

        match result {
            // Another writer got there between the check and the write.
            Err(OperationError::DestinationExists(_)) => self.check_existing(source, destination),
            other => other,
        }
    }

    /// An existing destination with the same content counts as done. A read
    /// failure while comparing is reported as I/O, not as a conflict.
    fn check_existing(&self, source: &Path, destination: &Path) -> Result<(), OperationError> {
        let identical = destination.is_file()
            && self
                .hasher
                .verify_identical_content(source, destination)
                .map_err(|HashError::Io(e)| OperationError::io(destination, e))?;
        if identical {
            log::debug!("{} already present", destination.display());
            Ok(())
        } else {
            Err(OperationError::DestinationExists(destination.to_path_buf()))
        }
    }
}

impl Default for ActionExecutor {
    fn default() -> Self {
        Self::new()
    }
}

pub fn summarize(plan: &ActionPlan) -> ApplySummary {
    let mut summary = ApplySummary::default();
    for entry in &plan.entries {
        match &entry.status {
            EntryStatus::Completed => summary.succeeded += 1,
            EntryStatus::Failed { error } => {
                summary.failed += 1;
                summary.failures.push(FailedEntry {
                    asset_id: entry.asset_id.clone(),
                    source_path: entry.source_path.clone(),
                    output_path: entry.output_path.clone(),
                    error: error.clone(),
                });
            }
            EntryStatus::Pending => {}
        }
    }
    summary
}

/// Copies into a temporary file next to the destination and moves it into
/// place only once complete. The destination is never observed half-written.
fn copy_atomically(source: &Path, destination: &Path) -> Result<(), OperationError> {
    let parent = destination
        .parent()
        .ok_or_else(|| OperationError::io(destination, io::ErrorKind::InvalidInput.into()))?;

    let mut temp = NamedTempFile::new_in(parent).map_err(|e| OperationError::io(parent, e))?;
    let mut reader = File::open(source).map_err(|e| OperationError::io(source, e))?;
    io::copy(&mut reader, temp.as_file_mut()).map_err(|e| OperationError::io(destination, e))?;
    temp.as_file()
        .sync_all()
        .map_err(|e| OperationError::io(destination, e))?;

    if let Ok(metadata) = fs::metadata(source) {
        if let Err(e) = fs::set_permissions(temp.path(), metadata.permissions()) {
            log::debug!(
                "Could not copy permissions to {}: {}",
                destination.display(),
                e
            );
        }
    }

    temp.persist_noclobber(destination).map_err(|e| {
        if e.error.kind() == io::ErrorKind::AlreadyExists {
            OperationError::DestinationExists(destination.to_path_buf())
        } else {
            OperationError::io(destination, e.error)
        }
    })?;
    Ok(())
}

/// No copy fallback: a cross-device link is reported as such.
fn hard_link(source: &Path, destination: &Path) -> Result<(), OperationError> {
    fs::hard_link(source, destination).map_err(|e| classify_link_error(source, destination, e))
}

fn classify_link_error(source: &Path, destination: &Path, error: io::Error) -> OperationError {
    if error.raw_os_error() == Some(CROSS_DEVICE_ERROR) {
        OperationError::CrossDevice {
            source_path: source.to_path_buf(),
            destination: destination.to_path_buf(),
        }
    } else if error.kind() == io::ErrorKind::AlreadyExists {
        OperationError::DestinationExists(destination.to_path_buf())
    } else {
        OperationError::io(destination, error)
    }
}
