use crate::database::models::{
    Asset, Decision, DecisionState, EntryStatus, OperationKind, OutputMapping,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::ffi::OsString;
use std::fs;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Subdirectory of the output root that receives set-aside (Remove) assets.
pub const REMOVED_DIR: &str = "_removed";

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("Output root is empty")]
    EmptyOutputRoot,

    #[error("Output root {output_root} overlaps source root {source_root}")]
    OutputOverlapsSource {
        output_root: PathBuf,
        source_root: PathBuf,
    },

    #[error("Set-aside of removed assets was requested without confirmation")]
    RemovalNotConfirmed,

    #[error("Plan invariant violated: {0}")]
    InvariantViolation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    pub output_root: PathBuf,
    /// Source roots checked for overlap in addition to the assets' own roots.
    #[serde(default)]
    pub source_roots: Vec<PathBuf>,
    #[serde(default)]
    pub preserve_structure: bool,
    pub operation: OperationKind,
    /// Also materialize Remove decisions under [`REMOVED_DIR`].
    #[serde(default)]
    pub include_removed: bool,
    #[serde(default)]
    pub confirm_removed: bool,
}

impl OutputConfig {
    pub fn new(output_root: impl Into<PathBuf>) -> Self {
        Self {
            output_root: output_root.into(),
            source_roots: Vec::new(),
            preserve_structure: false,
            operation: OperationKind::Copy,
            include_removed: false,
            confirm_removed: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionPlan {
    pub output_root: PathBuf,
    pub entries: Vec<OutputMapping>,
}

impl ActionPlan {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn completed(&self) -> usize {
        self.entries.iter().filter(|e| e.status.is_completed()).count()
    }

    pub fn failed(&self) -> usize {
        self.entries.iter().filter(|e| e.status.is_failed()).count()
    }

    pub fn pending(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.status == EntryStatus::Pending)
            .count()
    }
}

/// Computes source → output mappings. Never writes to the filesystem; the
/// only disk access is resolving roots to compare them.
#[derive(Debug, Clone, Copy, Default)]
pub struct ActionPlanner;

impl ActionPlanner {
    pub fn new() -> Self {
        Self
    }

    /// Keep decisions are always planned. Remove decisions are planned into
    /// [`REMOVED_DIR`] only with both `include_removed` and
    /// `confirm_removed`. Undecided assets are never planned.
    ///
    /// Entries come out in a deterministic order (kept first, then set-aside,
    /// each by source path) and colliding names are disambiguated in that
    /// order, so identical inputs always yield identical plans.
    pub fn preview(
        &self,
        assets: &[Asset],
        decisions: &HashMap<String, Decision>,
        config: &OutputConfig,
    ) -> Result<ActionPlan, PlanError> {
        if config.output_root.as_os_str().is_empty() {
            return Err(PlanError::EmptyOutputRoot);
        }
        if config.include_removed && !config.confirm_removed {
            return Err(PlanError::RemovalNotConfirmed);
        }

        let output_root = resolve(&config.output_root)?;
        let source_roots = self.source_roots(assets, config)?;
        check_overlap(&output_root, &source_roots)?;

        let mut kept: Vec<&Asset> = Vec::new();
        let mut removed: Vec<&Asset> = Vec::new();
        for asset in assets {
            match decisions.get(&asset.id).map(|d| d.state) {
                Some(DecisionState::Keep) => kept.push(asset),
                Some(DecisionState::Remove) if config.include_removed => removed.push(asset),
                _ => {}
            }
        }
        let by_path = |a: &&Asset, b: &&Asset| a.path.cmp(&b.path).then_with(|| a.id.cmp(&b.id));
        kept.sort_by(by_path);
        removed.sort_by(by_path);

        let mut names = NameTable::default();
        let mut entries = Vec::with_capacity(kept.len() + removed.len());
        for (asset, prefix) in kept
            .into_iter()
            .map(|a| (a, None))
            .chain(removed.into_iter().map(|a| (a, Some(REMOVED_DIR))))
        {
            let mut relative = PathBuf::new();
            if let Some(prefix) = prefix {
                relative.push(prefix);
            }
            relative.push(relative_output(asset, config.preserve_structure));

            let relative = names.claim(relative);
            entries.push(OutputMapping {
                asset_id: asset.id.clone(),
                source_path: asset.path.clone(),
                output_path: output_root.join(relative),
                operation: config.operation,
                status: EntryStatus::Pending,
            });
        }

        let plan = ActionPlan {
            output_root,
            entries,
        };
        verify(&plan, &source_roots)?;

        log::info!(
            "Planned {} operations into {}",
            plan.len(),
            plan.output_root.display()
        );
        Ok(plan)
    }

    fn source_roots(
        &self,
        assets: &[Asset],
        config: &OutputConfig,
    ) -> Result<Vec<PathBuf>, PlanError> {
        let roots: BTreeSet<&Path> = assets
            .iter()
            .map(|a| a.source_root.as_path())
            .chain(config.source_roots.iter().map(PathBuf::as_path))
            .collect();
        roots.into_iter().map(resolve).collect()
    }
}

/// Path of an asset below the output root, before disambiguation.
fn relative_output(asset: &Asset, preserve_structure: bool) -> PathBuf {
    let file_name = asset
        .path
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(&asset.id));

    if !preserve_structure {
        return file_name;
    }
    match asset.path.strip_prefix(&asset.source_root) {
        Ok(relative) if !relative.as_os_str().is_empty() => lexical_normalize(relative),
        _ => file_name,
    }
}

/// Claims output names case-insensitively so that a plan also holds on
/// case-insensitive filesystems. A taken name becomes `stem_N.ext` with the
/// smallest free N.
#[derive(Default)]
struct NameTable {
    taken: HashSet<String>,
}

impl NameTable {
    fn key(path: &Path) -> String {
        path.to_string_lossy().to_lowercase()
    }

    fn claim(&mut self, wanted: PathBuf) -> PathBuf {
        if self.taken.insert(Self::key(&wanted)) {
            return wanted;
        }

        let stem = wanted
            .file_stem()
            .map(|s| s.to_os_string())
            .unwrap_or_default();
        let extension = wanted.extension().map(|e| e.to_os_string());
        let mut suffix = 1usize;
        loop {
            let mut name = OsString::from(&stem);
            name.push(format!("_{}", suffix));
            if let Some(ext) = &extension {
                name.push(".");
                name.push(ext);
            }
            let candidate = wanted.with_file_name(name);
            if self.taken.insert(Self::key(&candidate)) {
                return candidate;
            }
            suffix += 1;
        }
    }
}

fn check_overlap(output_root: &Path, source_roots: &[PathBuf]) -> Result<(), PlanError> {
    for source_root in source_roots {
        if output_root.starts_with(source_root) || source_root.starts_with(output_root) {
            return Err(PlanError::OutputOverlapsSource {
                output_root: output_root.to_path_buf(),
                source_root: source_root.clone(),
            });
        }
    }
    Ok(())
}

fn verify(plan: &ActionPlan, source_roots: &[PathBuf]) -> Result<(), PlanError> {
    let mut seen = HashSet::new();
    for entry in &plan.entries {
        if !seen.insert(NameTable::key(&entry.output_path)) {
            return Err(PlanError::InvariantViolation(format!(
                "duplicate output path {}",
                entry.output_path.display()
            )));
        }
        if let Some(root) = source_roots
            .iter()
            .find(|root| entry.output_path.starts_with(root))
        {
            return Err(PlanError::InvariantViolation(format!(
                "output path {} lies inside source root {}",
                entry.output_path.display(),
                root.display()
            )));
        }
    }
    Ok(())
}

/// Absolute, lexically normalized path whose longest existing prefix is
/// canonicalized, so symlinked and not-yet-created roots compare correctly.
pub fn resolve(path: &Path) -> Result<PathBuf, PlanError> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };
    let normalized = lexical_normalize(&absolute);

    let mut existing = normalized.as_path();
    let mut missing: Vec<OsString> = Vec::new();
    loop {
        if let Ok(canonical) = fs::canonicalize(existing) {
            let mut resolved = canonical;
            resolved.extend(missing.iter().rev());
            return Ok(resolved);
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name.to_os_string());
                existing = parent;
            }
            _ => return Ok(normalized),
        }
    }
}

fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::ReasonCode;
    use chrono::Utc;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        root: PathBuf,
        source: PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let root = fs::canonicalize(dir.path()).unwrap();
        let source = root.join("photos");
        fs::create_dir_all(&source).unwrap();
        Fixture {
            _dir: dir,
            root,
            source,
        }
    }

    fn asset(source: &Path, relative: &str) -> Asset {
        Asset::new(&source.join(relative), source, 1, Utc::now())
    }

    fn decide(assets: &[&Asset], state: DecisionState) -> HashMap<String, Decision> {
        assets
            .iter()
            .map(|a| {
                (
                    a.id.clone(),
                    Decision::new(a.id.clone(), state, ReasonCode::ManualNoReason, None),
                )
            })
            .collect()
    }

    fn file_names(plan: &ActionPlan) -> Vec<String> {
        plan.entries
            .iter()
            .map(|e| e.output_path.file_name().unwrap().to_string_lossy().to_string())
            .collect()
    }

    #[test]
    fn test_only_keep_decisions_are_planned() {
        let fx = fixture();
        let keep = asset(&fx.source, "keep.jpg");
        let remove = asset(&fx.source, "remove.jpg");
        let undecided = asset(&fx.source, "undecided.jpg");

        let mut decisions = decide(&[&keep], DecisionState::Keep);
        decisions.extend(decide(&[&remove], DecisionState::Remove));

        let config = OutputConfig::new(fx.root.join("out"));
        let plan = ActionPlanner::new()
            .preview(&[keep.clone(), remove, undecided], &decisions, &config)
            .unwrap();

        assert_eq!(plan.len(), 1);
        assert_eq!(plan.entries[0].asset_id, keep.id);
        assert_eq!(plan.entries[0].output_path, fx.root.join("out").join("keep.jpg"));
        assert_eq!(plan.entries[0].status, EntryStatus::Pending);
        assert_eq!(plan.pending(), 1);
    }

    #[test]
    fn test_flat_collisions_get_numbered_suffixes() {
        let fx = fixture();
        let a = asset(&fx.source, "2023/IMG_0001.jpg");
        let b = asset(&fx.source, "2024/IMG_0001.jpg");
        let c = asset(&fx.source, "misc/img_0001.JPG");
        let assets = vec![c.clone(), b.clone(), a.clone()];
        let decisions = decide(&[&a, &b, &c], DecisionState::Keep);

        let config = OutputConfig::new(fx.root.join("out"));
        let plan = ActionPlanner::new().preview(&assets, &decisions, &config).unwrap();

        assert_eq!(
            file_names(&plan),
            vec!["IMG_0001.jpg", "IMG_0001_1.jpg", "img_0001_2.JPG"]
        );
        assert_eq!(plan.entries[0].asset_id, a.id);
    }

    #[test]
    fn test_generated_suffix_does_not_shadow_real_name() {
        let fx = fixture();
        let a = asset(&fx.source, "a/x.jpg");
        let b = asset(&fx.source, "b/x.jpg");
        let c = asset(&fx.source, "c/x_1.jpg");
        let decisions = decide(&[&a, &b, &c], DecisionState::Keep);

        let config = OutputConfig::new(fx.root.join("out"));
        let plan = ActionPlanner::new()
            .preview(&[a, b, c], &decisions, &config)
            .unwrap();

        assert_eq!(file_names(&plan), vec!["x.jpg", "x_1.jpg", "x_1_1.jpg"]);
    }

    #[test]
    fn test_preserve_structure() {
        let fx = fixture();
        let a = asset(&fx.source, "2023/trip/a.jpg");
        let decisions = decide(&[&a], DecisionState::Keep);

        let mut config = OutputConfig::new(fx.root.join("out"));
        config.preserve_structure = true;
        let plan = ActionPlanner::new().preview(&[a], &decisions, &config).unwrap();

        assert_eq!(
            plan.entries[0].output_path,
            fx.root.join("out").join("2023").join("trip").join("a.jpg")
        );
    }

    #[test]
    fn test_overlapping_output_roots_are_rejected() {
        let fx = fixture();
        let a = asset(&fx.source, "a.jpg");
        let decisions = decide(&[&a], DecisionState::Keep);
        let planner = ActionPlanner::new();

        for output in [
            fx.source.clone(),
            fx.source.join("out"),
            fx.source.join("nested").join("..").join("out"),
            fx.root.clone(),
        ] {
            let result = planner.preview(&[a.clone()], &decisions, &OutputConfig::new(&output));
            assert!(
                matches!(result, Err(PlanError::OutputOverlapsSource { .. })),
                "{} should be rejected",
                output.display()
            );
        }

        let sibling = fx.root.join("photos-out");
        assert!(planner
            .preview(&[a], &decisions, &OutputConfig::new(sibling))
            .is_ok());
    }

    #[test]
    fn test_configured_source_roots_are_checked_without_assets() {
        let fx = fixture();
        let mut config = OutputConfig::new(fx.source.join("out"));
        config.source_roots.push(fx.source.clone());

        let result = ActionPlanner::new().preview(&[], &HashMap::new(), &config);
        assert!(matches!(result, Err(PlanError::OutputOverlapsSource { .. })));
    }

    #[test]
    fn test_empty_output_root() {
        let result =
            ActionPlanner::new().preview(&[], &HashMap::new(), &OutputConfig::new(PathBuf::new()));
        assert!(matches!(result, Err(PlanError::EmptyOutputRoot)));
    }

    #[test]
    fn test_removed_set_aside_requires_confirmation() {
        let fx = fixture();
        let keep = asset(&fx.source, "a.jpg");
        let remove = asset(&fx.source, "b.jpg");
        let mut decisions = decide(&[&keep], DecisionState::Keep);
        decisions.extend(decide(&[&remove], DecisionState::Remove));
        let assets = vec![keep, remove.clone()];

        let mut config = OutputConfig::new(fx.root.join("out"));
        config.include_removed = true;
        assert!(matches!(
            ActionPlanner::new().preview(&assets, &decisions, &config),
            Err(PlanError::RemovalNotConfirmed)
        ));

        config.confirm_removed = true;
        let plan = ActionPlanner::new().preview(&assets, &decisions, &config).unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan.entries[1].asset_id, remove.id);
        assert_eq!(
            plan.entries[1].output_path,
            fx.root.join("out").join(REMOVED_DIR).join("b.jpg")
        );
    }

    #[test]
    fn test_preview_is_deterministic() {
        let fx = fixture();
        let assets: Vec<Asset> = (0..50)
            .map(|i| asset(&fx.source, &format!("d{}/{}/photo.jpg", i % 7, i)))
            .collect();
        let refs: Vec<&Asset> = assets.iter().collect();
        let decisions = decide(&refs, DecisionState::Keep);
        let config = OutputConfig::new(fx.root.join("out"));

        let first = ActionPlanner::new().preview(&assets, &decisions, &config).unwrap();
        let mut reversed = assets.clone();
        reversed.reverse();
        let second = ActionPlanner::new().preview(&reversed, &decisions, &config).unwrap();

        assert_eq!(first, second);
        assert_eq!(first.len(), 50);
        let unique: HashSet<_> = first.entries.iter().map(|e| &e.output_path).collect();
        assert_eq!(unique.len(), 50);
        assert!(unique.contains(&fx.root.join("out").join("photo_49.jpg")));
    }

    #[test]
    fn test_preview_has_no_side_effects() {
        let fx = fixture();
        let a = asset(&fx.source, "a.jpg");
        let decisions = decide(&[&a], DecisionState::Keep);
        let output = fx.root.join("not-created");

        ActionPlanner::new()
            .preview(&[a], &decisions, &OutputConfig::new(&output))
            .unwrap();
        assert!(!output.exists());
    }

    #[test]
    fn test_lexical_normalize() {
        assert_eq!(
            lexical_normalize(Path::new("/a/./b/../c")),
            PathBuf::from("/a/c")
        );
    }
}
