use crate::database::models::{
    Asset, Decision, DecisionState, GroupType, ReasonCode, VariantGroup,
};
use std::cmp::Ordering;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Suggestion {
    pub asset_id: String,
    pub reason: ReasonCode,
}

/// Proposes a default keep per group. Advisory only: nothing here writes a
/// Decision unless [`accept_suggestions`] is called explicitly.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeepSuggester;

impl KeepSuggester {
    pub fn new() -> Self {
        Self
    }

    /// Best member first: highest resolution, then largest file, then newest
    /// capture (or indexing) time, then lowest path, then lowest id.
    pub fn rank(a: &Asset, b: &Asset) -> Ordering {
        b.resolution()
            .cmp(&a.resolution())
            .then_with(|| b.size.cmp(&a.size))
            .then_with(|| b.effective_timestamp().cmp(&a.effective_timestamp()))
            .then_with(|| a.path.cmp(&b.path))
            .then_with(|| a.id.cmp(&b.id))
    }

    /// `None` when none of the group members are in `assets`.
    pub fn suggest(
        &self,
        group: &VariantGroup,
        assets: &HashMap<&str, &Asset>,
    ) -> Option<Suggestion> {
        let mut members: Vec<&Asset> = group
            .asset_ids
            .iter()
            .filter_map(|id| assets.get(id.as_str()).copied())
            .collect();
        members.sort_by(|a, b| Self::rank(a, b));

        let best = *members.first()?;
        let reason = match members.get(1) {
            Some(runner_up) => deciding_criterion(best, runner_up),
            None => None,
        }
        .unwrap_or(match group.group_type {
            GroupType::Exact => ReasonCode::ExactDuplicate,
            GroupType::Similar => ReasonCode::ManualNoReason,
        });

        Some(Suggestion {
            asset_id: best.id.clone(),
            reason,
        })
    }

    /// Fills `suggested_keep`/`suggested_reason` on every group.
    pub fn annotate(&self, groups: &mut [VariantGroup], assets: &[Asset]) {
        let lookup: HashMap<&str, &Asset> = assets.iter().map(|a| (a.id.as_str(), a)).collect();
        for group in groups.iter_mut() {
            let suggestion = self.suggest(group, &lookup);
            group.suggested_keep = suggestion.as_ref().map(|s| s.asset_id.clone());
            group.suggested_reason = suggestion.map(|s| s.reason);
        }
    }
}

fn deciding_criterion(best: &Asset, runner_up: &Asset) -> Option<ReasonCode> {
    if best.resolution() != runner_up.resolution() {
        Some(ReasonCode::HigherResolution)
    } else if best.size != runner_up.size {
        Some(ReasonCode::LargerFilesize)
    } else if best.effective_timestamp() != runner_up.effective_timestamp() {
        Some(ReasonCode::NewerTimestamp)
    } else {
        None
    }
}

/// Turns annotated groups into Decisions. An asset suggested in any of its
/// groups is kept, so every group keeps at least one member; the others are
/// marked Remove with the reason of the group that outranked them. Assets in
/// no group are kept as unique. Assets that already have a decision are
/// skipped unless `overwrite` is set.
pub fn accept_suggestions(
    assets: &[Asset],
    groups: &[VariantGroup],
    existing: &HashMap<String, Decision>,
    overwrite: bool,
) -> Vec<Decision> {
    // Exact groups are consulted first for reasons.
    let mut ordered: Vec<&VariantGroup> = groups.iter().collect();
    ordered.sort_by_key(|group| match group.group_type {
        GroupType::Exact => 0,
        GroupType::Similar => 1,
    });

    let mut keep_reason: HashMap<&str, ReasonCode> = HashMap::new();
    let mut remove_reason: HashMap<&str, ReasonCode> = HashMap::new();
    for group in &ordered {
        let (Some(keep), Some(reason)) = (group.suggested_keep.as_deref(), group.suggested_reason)
        else {
            continue;
        };
        keep_reason.entry(keep).or_insert(reason);
        for id in &group.asset_ids {
            if id != keep {
                remove_reason.entry(id.as_str()).or_insert(reason);
            }
        }
    }

    assets
        .iter()
        .filter(|asset| overwrite || !existing.contains_key(&asset.id))
        .map(|asset| {
            let id = asset.id.as_str();
            let (state, reason) = if let Some(&reason) = keep_reason.get(id) {
                (DecisionState::Keep, reason)
            } else if let Some(&reason) = remove_reason.get(id) {
                (DecisionState::Remove, reason)
            } else {
                (DecisionState::Keep, ReasonCode::Unique)
            };
            Decision::new(id, state, reason, None)
        })
        .collect()
}
