use crate::core::exact::ExactGrouper;
use crate::core::similarity::{validate_threshold, SimilarityError, SimilarityIndex};
use crate::core::suggest::KeepSuggester;
use crate::database::models::{Asset, VariantGroup};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// Read-only view of one scan's assets and fingerprints. Replaced wholesale
/// by the next scan, never patched.
#[derive(Debug, Default)]
pub struct AssetSnapshot {
    generation: u64,
    assets: Vec<Asset>,
    by_id: HashMap<String, usize>,
    exact: Vec<VariantGroup>,
    index: SimilarityIndex,
}

impl AssetSnapshot {
    fn build(mut assets: Vec<Asset>, generation: u64) -> Self {
        assets.sort_by(|a, b| a.path.cmp(&b.path));
        let by_id = assets
            .iter()
            .enumerate()
            .map(|(i, asset)| (asset.id.clone(), i))
            .collect();

        let mut exact = ExactGrouper::new().group(&assets);
        KeepSuggester::new().annotate(&mut exact, &assets);
        let index = SimilarityIndex::build(&assets);

        Self {
            generation,
            assets,
            by_id,
            exact,
            index,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Ordered by path.
    pub fn assets(&self) -> &[Asset] {
        &self.assets
    }

    pub fn asset(&self, id: &str) -> Option<&Asset> {
        self.by_id.get(id).map(|&i| &self.assets[i])
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    pub fn fingerprinted(&self) -> usize {
        self.index.len()
    }

    fn similar_groups(&self, threshold: f64) -> Result<Vec<VariantGroup>, SimilarityError> {
        let mut similar = self.index.group(threshold)?;
        KeepSuggester::new().annotate(&mut similar, &self.assets);
        Ok(similar)
    }
}

/// Groups computed from one snapshot at one threshold.
#[derive(Debug, Clone, Default)]
pub struct GroupSet {
    pub generation: u64,
    pub threshold: f64,
    pub exact: Vec<VariantGroup>,
    pub similar: Vec<VariantGroup>,
}

impl GroupSet {
    pub fn iter(&self) -> impl Iterator<Item = &VariantGroup> {
        self.exact.iter().chain(self.similar.iter())
    }

    pub fn len(&self) -> usize {
        self.exact.len() + self.similar.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, group_id: &str) -> Option<&VariantGroup> {
        self.iter().find(|group| group.id == group_id)
    }

    pub fn groups_for_asset<'a>(&'a self, asset_id: &'a str) -> impl Iterator<Item = &'a VariantGroup> {
        self.iter().filter(move |group| group.contains(asset_id))
    }

    pub fn to_vec(&self) -> Vec<VariantGroup> {
        self.iter().cloned().collect()
    }
}

/// A snapshot together with the groups computed from it. Always swapped as
/// one value, so readers never pair a snapshot with another scan's groups.
#[derive(Debug, Clone, Default)]
struct Published {
    snapshot: Arc<AssetSnapshot>,
    groups: Arc<GroupSet>,
}

/// Current snapshot plus the groups derived from it. Readers get `Arc`s and
/// never block a regroup; grouping runs without holding the lock and the
/// result is swapped in only if no newer generation was published meanwhile.
#[derive(Debug, Default)]
pub struct Catalog {
    current: RwLock<Published>,
    generations: AtomicU64,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the snapshot with `assets` and groups it at `threshold`.
    /// When a concurrent load of a later generation has already been
    /// published, that one stays current and its groups are returned.
    pub fn load(&self, assets: Vec<Asset>, threshold: f64) -> Result<Arc<GroupSet>, SimilarityError> {
        let staged = self.stage(assets, threshold)?;
        Ok(self.publish(staged))
    }

    /// Re-clusters the current snapshot at a new threshold. Nothing is
    /// decoded or rehashed. If a newer snapshot was loaded meanwhile, the
    /// stale result is dropped and the current groups are returned.
    pub fn regroup(&self, threshold: f64) -> Result<Arc<GroupSet>, SimilarityError> {
        let threshold = validate_threshold(threshold)?;
        let snapshot = self.snapshot();
        let computed = Arc::new(Self::compute(&snapshot, threshold)?);

        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        if current.snapshot.generation() != snapshot.generation() {
            log::debug!("Discarding regroup of stale snapshot {}", snapshot.generation());
            return Ok(current.groups.clone());
        }
        current.groups = computed.clone();
        log::info!(
            "Regrouped at {:.1}: {} similar groups",
            threshold,
            computed.similar.len()
        );
        Ok(computed)
    }

    pub fn snapshot(&self) -> Arc<AssetSnapshot> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot
            .clone()
    }

    pub fn groups(&self) -> Arc<GroupSet> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .groups
            .clone()
    }

    /// Takes the next generation number and does all the grouping work,
    /// without touching what readers see.
    fn stage(&self, assets: Vec<Asset>, threshold: f64) -> Result<Published, SimilarityError> {
        let threshold = validate_threshold(threshold)?;
        let generation = self.generations.fetch_add(1, Ordering::SeqCst) + 1;
        let snapshot = Arc::new(AssetSnapshot::build(assets, generation));
        let groups = Arc::new(Self::compute(&snapshot, threshold)?);
        Ok(Published { snapshot, groups })
    }

    /// Makes `staged` current unless a later generation already is.
    fn publish(&self, staged: Published) -> Arc<GroupSet> {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let generation = staged.snapshot.generation();
        if generation < current.snapshot.generation() {
            log::debug!(
                "Discarding snapshot {}, {} is already current",
                generation,
                current.snapshot.generation()
            );
            return current.groups.clone();
        }

        *current = staged;
        log::info!(
            "Loaded snapshot {} with {} assets: {} exact, {} similar groups",
            generation,
            current.snapshot.len(),
            current.groups.exact.len(),
            current.groups.similar.len()
        );
        current.groups.clone()
    }

    fn compute(snapshot: &AssetSnapshot, threshold: f64) -> Result<GroupSet, SimilarityError> {
        Ok(GroupSet {
            generation: snapshot.generation(),
            threshold,
            exact: snapshot.exact.clone(),
            similar: snapshot.similar_groups(threshold)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::perceptual::PerceptualHash;
    use crate::database::models::GroupType;
    use chrono::Utc;
    use std::path::Path;
    use std::thread;

    fn asset(name: &str, hash: &str, bits: u64) -> Asset {
        let mut asset = Asset::new(
            Path::new(&format!("/photos/{}", name)),
            Path::new("/photos"),
            10,
            Utc::now(),
        );
        asset.hash = Some(hash.to_string());
        asset.perceptual_hash = Some(PerceptualHash::from_bits(bits));
        asset
    }

    fn sample() -> Vec<Asset> {
        vec![
            asset("a.jpg", "h1", 0),
            asset("b.jpg", "h1", 0),
            asset("c.jpg", "h2", 0b1111),
            asset("d.jpg", "h3", u64::MAX),
        ]
    }

    #[test]
    fn test_load_groups_and_annotates() {
        let catalog = Catalog::new();
        let groups = catalog.load(sample(), 90.0).unwrap();

        assert_eq!(groups.exact.len(), 1);
        assert_eq!(groups.exact[0].group_type, GroupType::Exact);
        assert!(groups.exact[0].suggested_keep.is_some());

        // a, b, c are within 4 bits; d is far away
        assert_eq!(groups.similar.len(), 1);
        assert_eq!(groups.similar[0].len(), 3);
        assert_eq!(catalog.snapshot().len(), 4);
        assert_eq!(catalog.snapshot().fingerprinted(), 4);
    }

    #[test]
    fn test_regroup_replaces_only_similar_groups() {
        let catalog = Catalog::new();
        let before = catalog.load(sample(), 90.0).unwrap();
        let after = catalog.regroup(100.0).unwrap();

        assert_eq!(before.exact, after.exact);
        assert_eq!(after.similar.len(), 1);
        assert_eq!(after.similar[0].len(), 2);
        assert_eq!(catalog.groups().threshold, 100.0);

        // readers holding the old set are unaffected
        assert_eq!(before.similar[0].len(), 3);
    }

    #[test]
    fn test_invalid_threshold_keeps_current_groups() {
        let catalog = Catalog::new();
        catalog.load(sample(), 90.0).unwrap();

        assert!(catalog.regroup(150.0).is_err());
        assert_eq!(catalog.groups().threshold, 90.0);
    }

    #[test]
    fn test_concurrent_readers_during_regroup() {
        let catalog = Arc::new(Catalog::new());
        catalog.load(sample(), 90.0).unwrap();

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let catalog = catalog.clone();
                thread::spawn(move || {
                    for _ in 0..20 {
                        if i % 2 == 0 {
                            catalog.regroup(if i == 0 { 90.0 } else { 100.0 }).unwrap();
                        } else {
                            let groups = catalog.groups();
                            assert_eq!(groups.exact.len(), 1);
                            assert!(!groups.similar.is_empty());
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn test_older_generation_never_replaces_newer() {
        let catalog = Catalog::new();
        let older = catalog.stage(sample(), 90.0).unwrap();
        let newer = catalog.stage(sample()[..2].to_vec(), 90.0).unwrap();

        catalog.publish(newer);
        let returned = catalog.publish(older);

        let snapshot = catalog.snapshot();
        assert_eq!(snapshot.generation(), 2);
        assert_eq!(snapshot.len(), 2);
        assert_eq!(catalog.groups().generation, 2);
        assert_eq!(returned.generation, 2);
    }

    #[test]
    fn test_snapshot_and_groups_always_match() {
        let catalog = Arc::new(Catalog::new());
        catalog.load(sample(), 90.0).unwrap();

        let writers: Vec<_> = (0..3)
            .map(|i| {
                let catalog = catalog.clone();
                thread::spawn(move || {
                    for _ in 0..10 {
                        catalog.load(sample()[..2 + i].to_vec(), 90.0).unwrap();
                    }
                })
            })
            .collect();

        for _ in 0..200 {
            let current = catalog.current.read().unwrap().clone();
            assert_eq!(current.snapshot.generation(), current.groups.generation);
        }
        for writer in writers {
            writer.join().unwrap();
        }
        assert_eq!(catalog.snapshot().generation(), 31);
    }

    #[test]
    fn test_asset_lookup() {
        let catalog = Catalog::new();
        catalog.load(sample(), 90.0).unwrap();
        let snapshot = catalog.snapshot();

        let id = Asset::id_for_path(Path::new("/photos/c.jpg"));
        assert_eq!(snapshot.asset(&id).unwrap().path, Path::new("/photos/c.jpg"));
        assert!(snapshot.asset("ast_missing").is_none());
    }
}
