use glob::Pattern;
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("Invalid exclude pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },
}

pub const DEFAULT_FILE_TYPES: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "tiff", "tif", "webp"];

/// Decides whether a filesystem entry is an eligible asset. Runs before any
/// file content is read, so excluded files cost no hashing work.
#[derive(Debug, Clone)]
pub struct PathFilter {
    file_types: HashSet<String>,
    exclude_patterns: Vec<Pattern>,
}

impl PathFilter {
    /// An empty `file_types` list falls back to [`DEFAULT_FILE_TYPES`].
    pub fn new(file_types: &[String], exclude_patterns: &[String]) -> Result<Self, FilterError> {
        let mut types: HashSet<String> = file_types
            .iter()
            .map(|ext| ext.trim().trim_start_matches('.').to_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect();
        if types.is_empty() {
            types = DEFAULT_FILE_TYPES.iter().map(|ext| ext.to_string()).collect();
        }

        let exclude_patterns = exclude_patterns
            .iter()
            .map(|pattern| {
                Pattern::new(pattern).map_err(|e| FilterError::InvalidPattern {
                    pattern: pattern.clone(),
                    message: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            file_types: types,
            exclude_patterns,
        })
    }

    /// True when any exclude pattern matches the absolute path, the path
    /// relative to its source root, or the bare file name.
    pub fn is_excluded(&self, path: &Path, root: &Path) -> bool {
        if self.exclude_patterns.is_empty() {
            return false;
        }
        let relative = path.strip_prefix(root).ok();
        let file_name = path.file_name().map(Path::new);

        self.exclude_patterns.iter().any(|pattern| {
            pattern.matches_path(path)
                || relative.is_some_and(|rel| pattern.matches_path(rel))
                || file_name.is_some_and(|name| pattern.matches_path(name))
        })
    }

    pub fn has_allowed_extension(&self, path: &Path) -> bool {
        path.extension()
            .map(|ext| self.file_types.contains(&ext.to_string_lossy().to_lowercase()))
            .unwrap_or(false)
    }

    /// Zero-byte files are eligible; size never disqualifies an entry.
    pub fn is_eligible(&self, path: &Path, root: &Path) -> bool {
        self.has_allowed_extension(path) && !self.is_excluded(path, root)
    }

    pub fn file_types(&self) -> &HashSet<String> {
        &self.file_types
    }
}

impl Default for PathFilter {
    fn default() -> Self {
        Self {
            file_types: DEFAULT_FILE_TYPES.iter().map(|ext| ext.to_string()).collect(),
            exclude_patterns: Vec::new(),
        }
    }
}
