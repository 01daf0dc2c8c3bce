use crate::core::filter::DEFAULT_FILE_TYPES;
use crate::core::planner::OutputConfig;
use crate::database::models::OperationKind;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const CONFIG_FILE: &str = "cullrs.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Similarity threshold {0} is outside [0, 100]")]
    InvalidThreshold(f64),

    #[error("At least one source root is required")]
    NoSourceRoots,

    #[error("Worker count must be at least 1")]
    InvalidWorkers,
}

fn default_file_types() -> Vec<String> {
    DEFAULT_FILE_TYPES.iter().map(|ext| ext.to_string()).collect()
}

fn default_threshold() -> f64 {
    90.0
}

fn default_operation() -> OperationKind {
    OperationKind::Copy
}

fn default_workers() -> usize {
    num_cpus::get()
}

fn default_progress_interval() -> u64 {
    250
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default)]
    pub name: String,
    pub source_roots: Vec<PathBuf>,
    #[serde(default)]
    pub output_root: Option<PathBuf>,
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    #[serde(default = "default_file_types")]
    pub file_types: Vec<String>,
    #[serde(default = "default_threshold")]
    pub similarity_threshold: f64,
    #[serde(default)]
    pub preserve_structure: bool,
    #[serde(default = "default_operation")]
    pub operation: OperationKind,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default)]
    pub advanced_scoring: bool,
    #[serde(default = "default_progress_interval")]
    pub progress_interval_ms: u64,
}

impl ProjectConfig {
    pub fn new(name: impl Into<String>, source_roots: Vec<PathBuf>) -> Self {
        Self {
            name: name.into(),
            source_roots,
            output_root: None,
            exclude_patterns: Vec::new(),
            file_types: default_file_types(),
            similarity_threshold: default_threshold(),
            preserve_structure: false,
            operation: default_operation(),
            workers: default_workers(),
            advanced_scoring: false,
            progress_interval_ms: default_progress_interval(),
        }
    }

    pub fn path_in(project_dir: &Path) -> PathBuf {
        project_dir.join(CONFIG_FILE)
    }

    /// Reads and validates `cullrs.json` from `project_dir`. A missing name
    /// defaults to the directory name.
    pub fn load(project_dir: &Path) -> Result<Self, ConfigError> {
        let path = Self::path_in(project_dir);
        let content = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;

        let mut config: ProjectConfig = serde_json::from_str(&content)?;
        if config.name.is_empty() {
            config.name = project_dir
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
        }
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, project_dir: &Path) -> Result<(), ConfigError> {
        self.validate()?;
        fs::create_dir_all(project_dir).map_err(|source| ConfigError::Io {
            path: project_dir.to_path_buf(),
            source,
        })?;

        let path = Self::path_in(project_dir);
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&path, json).map_err(|source| ConfigError::Io { path, source })?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source_roots.is_empty() {
            return Err(ConfigError::NoSourceRoots);
        }
        if !self.similarity_threshold.is_finite()
            || !(0.0..=100.0).contains(&self.similarity_threshold)
        {
            return Err(ConfigError::InvalidThreshold(self.similarity_threshold));
        }
        if self.workers == 0 {
            return Err(ConfigError::InvalidWorkers);
        }
        Ok(())
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    /// Output settings for the planner; `None` until an output root is set.
    pub fn output_config(&self) -> Option<OutputConfig> {
        let output_root = self.output_root.clone()?;
        Some(OutputConfig {
            output_root,
            source_roots: self.source_roots.clone(),
            preserve_structure: self.preserve_structure,
            operation: self.operation,
            include_removed: false,
            confirm_removed: false,
        })
    }
}
