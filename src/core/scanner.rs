use crate::core::exif::ExifService;
use crate::core::filter::{FilterError, PathFilter};
use crate::core::hash::ContentHasher;
use crate::core::perceptual::PerceptualHasher;
use crate::database::models::Asset;
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Invalid path: {path}")]
    InvalidPath { path: String },

    #[error("Source root is not readable: {path}: {source}")]
    UnreadableRoot {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Filter error: {0}")]
    Filter(#[from] FilterError),

    #[error("Worker pool error: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),

    #[error("Operation cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanProgress {
    pub files_processed: usize,
    pub total_files: usize,
    pub files_skipped: usize,
    pub current_file: String,
    pub estimated_time_remaining: Option<u64>, // seconds
    pub phase: ScanPhase,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ScanPhase {
    Discovery,
    Hashing,
    Fingerprinting,
    Complete,
}

/// A file that could not be indexed. Non-fatal: the scan goes on without it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedAsset {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct ScanOutcome {
    /// Indexed assets ordered by path.
    pub assets: Vec<Asset>,
    pub skipped: Vec<SkippedAsset>,
    pub started_at: DateTime<Utc>,
}

impl ScanOutcome {
    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }

    pub fn fingerprinted_count(&self) -> usize {
        self.assets
            .iter()
            .filter(|asset| asset.perceptual_hash.is_some())
            .count()
    }
}

#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// An eligible file found during traversal, before any content is read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFile {
    pub path: PathBuf,
    pub source_root: PathBuf,
    pub size: u64,
}

type Walk = Box<dyn Iterator<Item = walkdir::Result<walkdir::DirEntry>>>;

/// Lazy, single-threaded traversal of the source roots in lexicographic
/// order. Filtering happens here, so excluded files are never opened.
pub struct Discovery {
    roots: std::vec::IntoIter<PathBuf>,
    current: Option<(PathBuf, Walk)>,
    filter: PathFilter,
    cancellation: CancellationToken,
}

impl Discovery {
    fn open_walk(&self, root: &Path) -> Walk {
        let filter = self.filter.clone();
        let walk_root = root.to_path_buf();
        let walker = WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(move |entry| {
                // Prune excluded directories without descending into them.
                !(entry.depth() > 0
                    && entry.file_type().is_dir()
                    && filter.is_excluded(entry.path(), &walk_root))
            });
        Box::new(walker)
    }
}

impl Iterator for Discovery {
    type Item = Result<DiscoveredFile, SkippedAsset>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.cancellation.is_cancelled() {
                return None;
            }

            if self.current.is_none() {
                let root = self.roots.next()?;
                let walk = self.open_walk(&root);
                self.current = Some((root, walk));
            }
            let (root, walk) = self.current.as_mut()?;

            let entry = match walk.next() {
                Some(Ok(entry)) => entry,
                Some(Err(e)) => {
                    let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.clone());
                    return Some(Err(SkippedAsset {
                        path,
                        reason: e.to_string(),
                    }));
                }
                None => {
                    self.current = None;
                    continue;
                }
            };

            if !entry.file_type().is_file() || !self.filter.is_eligible(entry.path(), root) {
                continue;
            }

            return Some(match entry.metadata() {
                Ok(metadata) => Ok(DiscoveredFile {
                    path: entry.path().to_path_buf(),
                    source_root: root.clone(),
                    size: metadata.len(),
                }),
                Err(e) => Err(SkippedAsset {
                    path: entry.path().to_path_buf(),
                    reason: e.to_string(),
                }),
            });
        }
    }
}

/// Rate-limits progress events to at most one per interval; phase changes
/// bypass it.
struct ProgressThrottle {
    interval: Duration,
    last_emit: Mutex<Option<Instant>>,
}

impl ProgressThrottle {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_emit: Mutex::new(None),
        }
    }

    fn ready(&self) -> bool {
        let Ok(mut last) = self.last_emit.lock() else {
            return false;
        };
        let now = Instant::now();
        match *last {
            Some(previous) if now.duration_since(previous) < self.interval => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }

    fn reset(&self) {
        if let Ok(mut last) = self.last_emit.lock() {
            *last = Some(Instant::now());
        }
    }
}

pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_millis(250);

pub struct Scanner {
    filter: PathFilter,
    progress_sender: Option<mpsc::UnboundedSender<ScanProgress>>,
    progress_interval: Duration,
    cancellation: CancellationToken,
    workers: usize,
    hasher: ContentHasher,
    perceptual: PerceptualHasher,
    exif: ExifService,
}

impl Scanner {
    pub fn new(filter: PathFilter) -> Self {
        Self {
            filter,
            progress_sender: None,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            cancellation: CancellationToken::new(),
            workers: num_cpus::get(),
            hasher: ContentHasher::new(),
            perceptual: PerceptualHasher::new(),
            exif: ExifService::new(),
        }
    }

    pub fn from_patterns(
        file_types: &[String],
        exclude_patterns: &[String],
    ) -> Result<Self, ScanError> {
        Ok(Self::new(PathFilter::new(file_types, exclude_patterns)?))
    }

    pub fn with_progress_sender(mut self, sender: mpsc::UnboundedSender<ScanProgress>) -> Self {
        self.progress_sender = Some(sender);
        self
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    pub fn cancel_scan(&self) {
        self.cancellation.cancel();
    }

    /// Validates the roots and returns a lazy traversal over them.
    /// Each call starts a fresh traversal.
    pub fn discover(&self, roots: &[PathBuf]) -> Result<Discovery, ScanError> {
        let roots = roots
            .iter()
            .map(|root| validate_root(root))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Discovery {
            roots: roots.into_iter(),
            current: None,
            filter: self.filter.clone(),
            cancellation: self.cancellation.clone(),
        })
    }

    /// Traverses, hashes and fingerprints every eligible file under `roots`.
    ///
    /// Unreadable files are reported in [`ScanOutcome::skipped`]; only an
    /// invalid root or cancellation fails the scan.
    pub fn scan(&self, roots: &[PathBuf]) -> Result<ScanOutcome, ScanError> {
        if self.cancellation.is_cancelled() {
            return Err(ScanError::Cancelled);
        }

        let started_at = Utc::now();
        let throttle = ProgressThrottle::new(self.progress_interval);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .build()?;

        // Phase 1: Discovery
        self.send_progress(ScanProgress {
            files_processed: 0,
            total_files: 0,
            files_skipped: 0,
            current_file: "Discovering files...".to_string(),
            estimated_time_remaining: None,
            phase: ScanPhase::Discovery,
        });
        throttle.reset();

        let mut files = Vec::new();
        let mut skipped = Vec::new();
        for item in self.discover(roots)? {
            match item {
                Ok(file) => files.push(file),
                Err(skip) => {
                    log::warn!("Skipping {}: {}", skip.path.display(), skip.reason);
                    skipped.push(skip);
                }
            }
            if throttle.ready() {
                self.send_progress(ScanProgress {
                    files_processed: files.len(),
                    total_files: files.len(),
                    files_skipped: skipped.len(),
                    current_file: files
                        .last()
                        .map(|f| f.path.to_string_lossy().to_string())
                        .unwrap_or_default(),
                    estimated_time_remaining: None,
                    phase: ScanPhase::Discovery,
                });
            }
        }
        self.ensure_not_cancelled()?;
        log::info!(
            "Discovered {} eligible files ({} skipped)",
            files.len(),
            skipped.len()
        );

        // Phase 2: content hashes, dimensions and EXIF
        let total_files = files.len();
        let base_skipped = skipped.len();
        let indexed: Vec<Option<Result<Asset, SkippedAsset>>> = pool.install(|| {
            let processed = AtomicUsize::new(0);
            let start = Instant::now();
            files
                .par_iter()
                .map(|file| {
                    if self.cancellation.is_cancelled() {
                        return None;
                    }
                    let result = self.index_file(file, started_at);
                    let count = processed.fetch_add(1, Ordering::Relaxed) + 1;
                    if throttle.ready() {
                        self.send_progress(ScanProgress {
                            files_processed: count,
                            total_files,
                            files_skipped: base_skipped,
                            current_file: file.path.to_string_lossy().to_string(),
                            estimated_time_remaining: estimate_remaining(start, count, total_files),
                            phase: ScanPhase::Hashing,
                        });
                    }
                    Some(result)
                })
                .collect()
        });
        self.ensure_not_cancelled()?;

        let mut assets = Vec::with_capacity(total_files);
        for result in indexed.into_iter().flatten() {
            match result {
                Ok(asset) => assets.push(asset),
                Err(skip) => {
                    log::warn!("Skipping {}: {}", skip.path.display(), skip.reason);
                    skipped.push(skip);
                }
            }
        }
        // Nested or repeated roots yield the same file more than once. The
        // smallest source root wins whatever order the roots were given in.
        assets.sort_by(|a, b| {
            a.path
                .cmp(&b.path)
                .then_with(|| a.source_root.cmp(&b.source_root))
        });
        assets.dedup_by(|a, b| a.path == b.path);

        // Phase 3: perceptual fingerprints, only for files that decode
        self.send_progress(ScanProgress {
            files_processed: 0,
            total_files: assets.len(),
            files_skipped: skipped.len(),
            current_file: "Computing perceptual fingerprints...".to_string(),
            estimated_time_remaining: None,
            phase: ScanPhase::Fingerprinting,
        });
        throttle.reset();

        let total_assets = assets.len();
        let skipped_so_far = skipped.len();
        pool.install(|| {
            let processed = AtomicUsize::new(0);
            let start = Instant::now();
            assets.par_iter_mut().for_each(|asset| {
                if self.cancellation.is_cancelled() {
                    return;
                }
                self.fingerprint(asset);
                let count = processed.fetch_add(1, Ordering::Relaxed) + 1;
                if throttle.ready() {
                    self.send_progress(ScanProgress {
                        files_processed: count,
                        total_files: total_assets,
                        files_skipped: skipped_so_far,
                        current_file: asset.path.to_string_lossy().to_string(),
                        estimated_time_remaining: estimate_remaining(start, count, total_assets),
                        phase: ScanPhase::Fingerprinting,
                    });
                }
            });
        });
        self.ensure_not_cancelled()?;

        self.send_progress(ScanProgress {
            files_processed: total_assets,
            total_files: total_assets,
            files_skipped: skipped.len(),
            current_file: "Scan complete".to_string(),
            estimated_time_remaining: Some(0),
            phase: ScanPhase::Complete,
        });

        let outcome = ScanOutcome {
            assets,
            skipped,
            started_at,
        };
        log::info!(
            "Scan complete: {} assets, {} fingerprinted, {} skipped",
            outcome.assets.len(),
            outcome.fingerprinted_count(),
            outcome.skipped_count()
        );
        Ok(outcome)
    }

    /// Content hash plus cheap metadata. A hashing failure skips the file.
    fn index_file(
        &self,
        file: &DiscoveredFile,
        indexed_at: DateTime<Utc>,
    ) -> Result<Asset, SkippedAsset> {
        let hash = self.hasher.hash_file(&file.path).map_err(|e| SkippedAsset {
            path: file.path.clone(),
            reason: e.to_string(),
        })?;

        let mut asset = Asset::new(&file.path, &file.source_root, file.size, indexed_at);
        asset.hash = Some(hash);

        if let Ok((width, height)) = image::image_dimensions(&file.path) {
            asset.width = width;
            asset.height = height;
        }

        match self.exif.extract_exif(&file.path) {
            Ok(exif) => asset.exif_data = exif,
            Err(e) => log::debug!("No EXIF for {}: {}", file.path.display(), e),
        }

        Ok(asset)
    }

    fn fingerprint(&self, asset: &mut Asset) {
        match self.perceptual.hash_file(&asset.path) {
            Ok((hash, (width, height))) => {
                asset.perceptual_hash = Some(hash);
                if asset.width == 0 || asset.height == 0 {
                    asset.width = width;
                    asset.height = height;
                }
            }
            Err(e) => {
                log::debug!(
                    "{} did not decode as an image, exact matching only: {}",
                    asset.path.display(),
                    e
                );
            }
        }
    }

    fn ensure_not_cancelled(&self) -> Result<(), ScanError> {
        if self.cancellation.is_cancelled() {
            log::info!("Scan cancelled");
            Err(ScanError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn send_progress(&self, progress: ScanProgress) {
        if let Some(sender) = &self.progress_sender {
            let _ = sender.send(progress);
        }
    }

    pub fn filter(&self) -> &PathFilter {
        &self.filter
    }
}

fn validate_root(root: &Path) -> Result<PathBuf, ScanError> {
    if !root.is_dir() {
        return Err(ScanError::InvalidPath {
            path: root.to_string_lossy().to_string(),
        });
    }
    let canonical = fs::canonicalize(root).map_err(|source| ScanError::UnreadableRoot {
        path: root.to_string_lossy().to_string(),
        source,
    })?;
    fs::read_dir(&canonical).map_err(|source| ScanError::UnreadableRoot {
        path: root.to_string_lossy().to_string(),
        source,
    })?;
    Ok(canonical)
}

fn estimate_remaining(start: Instant, done: usize, total: usize) -> Option<u64> {
    let elapsed = start.elapsed().as_secs_f64();
    if done == 0 || elapsed <= 0.0 {
        return None;
    }
    let rate = done as f64 / elapsed;
    Some((total.saturating_sub(done) as f64 / rate).round() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};
    use std::collections::HashSet;
    use tempfile::TempDir;

    fn create_test_image(path: &Path, width: u32, height: u32) {
        let img = ImageBuffer::from_fn(width, height, |x, y| {
            let intensity = ((x + y) % 256) as u8;
            Rgb([intensity, intensity, intensity])
        });
        img.save(path).unwrap();
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn scanner(file_types: &[&str], excludes: &[&str]) -> Scanner {
        Scanner::from_patterns(&strings(file_types), &strings(excludes))
            .unwrap()
            .with_workers(2)
    }

    #[test]
    fn test_scan_empty_directory() {
        let temp_dir = TempDir::new().unwrap();
        let outcome = scanner(&["jpg", "png"], &[])
            .scan(&[temp_dir.path().to_path_buf()])
            .unwrap();

        assert!(outcome.assets.is_empty());
        assert_eq!(outcome.skipped_count(), 0);
    }

    #[test]
    fn test_scan_with_exclude_patterns() {
        let temp_dir = TempDir::new().unwrap();
        create_test_image(&temp_dir.path().join("included.jpg"), 32, 32);
        create_test_image(&temp_dir.path().join("excluded.tmp.jpg"), 32, 32);
        fs::create_dir(temp_dir.path().join("cache")).unwrap();
        create_test_image(&temp_dir.path().join("cache").join("thumb.jpg"), 16, 16);

        let outcome = scanner(&["jpg"], &["*.tmp.*", "cache"])
            .scan(&[temp_dir.path().to_path_buf()])
            .unwrap();

        assert_eq!(outcome.assets.len(), 1);
        assert!(outcome.assets[0].path.ends_with("included.jpg"));
    }

    #[test]
    fn test_file_type_filtering() {
        let temp_dir = TempDir::new().unwrap();
        create_test_image(&temp_dir.path().join("test.jpg"), 32, 32);
        create_test_image(&temp_dir.path().join("test.png"), 32, 32);
        fs::write(temp_dir.path().join("test.txt"), b"text content").unwrap();

        let outcome = scanner(&["jpg", "png"], &[])
            .scan(&[temp_dir.path().to_path_buf()])
            .unwrap();

        let names: HashSet<String> = outcome
            .assets
            .iter()
            .map(|a| a.path.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names.len(), 2);
        assert!(names.contains("test.jpg"));
        assert!(names.contains("test.png"));
    }

    #[test]
    fn test_invalid_root_is_fatal() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("missing");

        let result = scanner(&["jpg"], &[]).scan(&[missing]);
        assert!(matches!(result, Err(ScanError::InvalidPath { .. })));
    }

    #[test]
    fn test_cancellation_before_scan() {
        let temp_dir = TempDir::new().unwrap();
        for i in 0..5 {
            create_test_image(&temp_dir.path().join(format!("test_{}.jpg", i)), 32, 32);
        }

        let scanner = scanner(&["jpg"], &[]);
        scanner.cancel_scan();

        let result = scanner.scan(&[temp_dir.path().to_path_buf()]);
        assert!(matches!(result, Err(ScanError::Cancelled)));
    }

    #[test]
    fn test_cancelled_discovery_stops_yielding() {
        let temp_dir = TempDir::new().unwrap();
        for i in 0..3 {
            fs::write(temp_dir.path().join(format!("{}.jpg", i)), b"x").unwrap();
        }

        let scanner = scanner(&["jpg"], &[]);
        let mut discovery = scanner.discover(&[temp_dir.path().to_path_buf()]).unwrap();
        assert!(discovery.next().is_some());

        scanner.cancel_scan();
        assert!(discovery.next().is_none());
    }

    #[test]
    fn test_discovery_is_lexicographic_and_restartable() {
        let temp_dir = TempDir::new().unwrap();
        for name in ["c.jpg", "a.jpg", "b.jpg"] {
            fs::write(temp_dir.path().join(name), name.as_bytes()).unwrap();
        }
        let scanner = scanner(&["jpg"], &[]);
        let roots = [temp_dir.path().to_path_buf()];

        let first: Vec<PathBuf> = scanner
            .discover(&roots)
            .unwrap()
            .map(|f| f.unwrap().path)
            .collect();
        let second: Vec<PathBuf> = scanner
            .discover(&roots)
            .unwrap()
            .map(|f| f.unwrap().path)
            .collect();

        let names: Vec<_> = first
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.jpg", "b.jpg", "c.jpg"]);
        assert_eq!(first, second);
    }

    #[test]
    fn test_undecodable_file_is_hashed_but_not_fingerprinted() {
        let temp_dir = TempDir::new().unwrap();
        create_test_image(&temp_dir.path().join("real.png"), 40, 30);
        fs::write(temp_dir.path().join("broken.png"), b"not really a png").unwrap();

        let outcome = scanner(&["png"], &[])
            .scan(&[temp_dir.path().to_path_buf()])
            .unwrap();
        assert_eq!(outcome.assets.len(), 2);

        let broken = outcome
            .assets
            .iter()
            .find(|a| a.path.ends_with("broken.png"))
            .unwrap();
        assert!(broken.hash.is_some());
        assert!(broken.perceptual_hash.is_none());

        let real = outcome
            .assets
            .iter()
            .find(|a| a.path.ends_with("real.png"))
            .unwrap();
        assert!(real.perceptual_hash.is_some());
        assert_eq!((real.width, real.height), (40, 30));
    }

    #[test]
    fn test_identical_files_same_hash_and_shared_scan_time() {
        let temp_dir = TempDir::new().unwrap();
        let file1 = temp_dir.path().join("identical1.png");
        create_test_image(&file1, 50, 50);
        fs::copy(&file1, temp_dir.path().join("identical2.png")).unwrap();

        let outcome = scanner(&["png"], &[])
            .scan(&[temp_dir.path().to_path_buf()])
            .unwrap();

        assert_eq!(outcome.assets.len(), 2);
        assert_eq!(outcome.assets[0].hash, outcome.assets[1].hash);
        assert_eq!(outcome.assets[0].indexed_at, outcome.assets[1].indexed_at);
        assert_ne!(outcome.assets[0].id, outcome.assets[1].id);
    }

    #[test]
    fn test_index_file_reports_vanished_file_as_skip() {
        let temp_dir = TempDir::new().unwrap();
        let file = DiscoveredFile {
            path: temp_dir.path().join("gone.jpg"),
            source_root: temp_dir.path().to_path_buf(),
            size: 0,
        };

        let skip = scanner(&["jpg"], &[]).index_file(&file, Utc::now()).unwrap_err();
        assert_eq!(skip.path, file.path);
        assert!(!skip.reason.is_empty());
    }

    #[test]
    fn test_progress_events() {
        let temp_dir = TempDir::new().unwrap();
        for i in 0..5 {
            create_test_image(&temp_dir.path().join(format!("test_{}.png", i)), 20, 20);
        }

        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<ScanProgress>();
        let scanner = scanner(&["png"], &[])
            .with_progress_sender(progress_tx)
            .with_progress_interval(Duration::from_millis(0));

        let outcome = scanner.scan(&[temp_dir.path().to_path_buf()]).unwrap();
        assert_eq!(outcome.assets.len(), 5);
        drop(scanner);

        let mut events = Vec::new();
        while let Ok(event) = progress_rx.try_recv() {
            events.push(event);
        }

        let phases: HashSet<ScanPhase> = events.iter().map(|e| e.phase).collect();
        assert!(phases.contains(&ScanPhase::Discovery));
        assert!(phases.contains(&ScanPhase::Hashing));
        assert!(phases.contains(&ScanPhase::Fingerprinting));

        let last = events.last().unwrap();
        assert_eq!(last.phase, ScanPhase::Complete);
        assert_eq!(last.files_processed, last.total_files);
    }

    #[test]
    fn test_nested_roots_index_each_file_once() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("nested");
        fs::create_dir(&nested).unwrap();
        fs::write(nested.join("b.jpg"), b"b").unwrap();
        fs::write(temp_dir.path().join("a.jpg"), b"a").unwrap();

        let outcome = scanner(&["jpg"], &[])
            .scan(&[nested.clone(), temp_dir.path().to_path_buf()])
            .unwrap();

        assert_eq!(outcome.assets.len(), 2);
        assert!(outcome.assets[0].path.ends_with("a.jpg"));
        assert!(outcome.assets[1].path.ends_with("nested/b.jpg"));
    }

    #[test]
    fn test_nested_roots_source_root_ignores_root_order() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("nested");
        fs::create_dir(&nested).unwrap();
        fs::write(nested.join("b.jpg"), b"b").unwrap();

        let outer = temp_dir.path().to_path_buf();
        let forward = scanner(&["jpg"], &[])
            .scan(&[outer.clone(), nested.clone()])
            .unwrap();
        let reversed = scanner(&["jpg"], &[])
            .scan(&[nested.clone(), outer.clone()])
            .unwrap();

        assert_eq!(forward.assets.len(), 1);
        assert_eq!(reversed.assets.len(), 1);
        assert_eq!(forward.assets[0].source_root, reversed.assets[0].source_root);
        assert_eq!(forward.assets[0].source_root, validate_root(&outer).unwrap());
    }

    #[test]
    fn test_cancel_during_hashing_skips_remaining_files() {
        let temp_dir = TempDir::new().unwrap();
        let total = 1000;
        for i in 0..total {
            fs::write(temp_dir.path().join(format!("f{:04}.jpg", i)), i.to_string()).unwrap();
        }

        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<ScanProgress>();
        let scanner = scanner(&["jpg"], &[])
            .with_workers(1)
            .with_progress_sender(progress_tx)
            .with_progress_interval(Duration::from_millis(0));
        let token = scanner.cancellation_token();

        let listener = std::thread::spawn(move || {
            let mut hashed = 0;
            while let Some(event) = progress_rx.blocking_recv() {
                if event.phase == ScanPhase::Hashing {
                    token.cancel();
                    hashed += 1;
                }
            }
            hashed
        });

        let result = scanner.scan(&[temp_dir.path().to_path_buf()]);
        drop(scanner);
        let hashed = listener.join().unwrap();

        assert!(matches!(result, Err(ScanError::Cancelled)));
        assert!(hashed >= 1);
        assert!(hashed < total, "hashed all {} files after cancel", hashed);
    }

    #[test]
    fn test_throttle_limits_rate() {
        let throttle = ProgressThrottle::new(Duration::from_secs(60));
        assert!(throttle.ready());
        assert!(!throttle.ready());
    }
}
