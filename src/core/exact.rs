use crate::database::models::{Asset, GroupType, VariantGroup};
use std::collections::HashMap;

pub const EXACT_SIMILARITY: f64 = 100.0;

/// Partitions assets by identical content fingerprint.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExactGrouper;

impl ExactGrouper {
    pub fn new() -> Self {
        Self
    }

    /// One Exact group per fingerprint shared by two or more assets. Assets
    /// without a content fingerprint are ignored. The result does not depend
    /// on input order: members are sorted by path and groups by their first
    /// member's path.
    pub fn group(&self, assets: &[Asset]) -> Vec<VariantGroup> {
        let mut by_hash: HashMap<&str, Vec<&Asset>> = HashMap::new();
        for asset in assets {
            if let Some(hash) = asset.hash.as_deref() {
                by_hash.entry(hash).or_default().push(asset);
            }
        }

        let mut groups: Vec<(String, VariantGroup)> = by_hash
            .into_iter()
            .filter(|(_, members)| members.len() >= 2)
            .map(|(hash, mut members)| {
                members.sort_by(|a, b| a.path.cmp(&b.path).then_with(|| a.id.cmp(&b.id)));
                members.dedup_by(|a, b| a.id == b.id);
                let first_path = members[0].path.to_string_lossy().to_string();
                let ids = members.iter().map(|asset| asset.id.clone()).collect();
                (
                    first_path,
                    VariantGroup::new(GroupType::Exact, EXACT_SIMILARITY, ids, hash),
                )
            })
            .filter(|(_, group)| group.len() >= 2)
            .collect();

        groups.sort_by(|a, b| a.0.cmp(&b.0));
        let groups: Vec<VariantGroup> = groups.into_iter().map(|(_, group)| group).collect();

        debug_assert!(
            {
                let mut seen = std::collections::HashSet::new();
                groups
                    .iter()
                    .flat_map(|g| g.asset_ids.iter())
                    .all(|id| seen.insert(id))
            },
            "asset present in two exact groups"
        );

        log::debug!("Exact grouping produced {} groups", groups.len());
        groups
    }
}
