mod memory;
mod sled_store;

pub use memory::MemoryStore;
pub use sled_store::SledStore;

use super::StoreError;
use crate::database::models::{Asset, Decision, DecisionState, VariantGroup};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;

/// An entity persisted under a string key inside its own keyspace.
pub trait Record: Serialize + DeserializeOwned + Send + Sync {
    const KIND: &'static str;

    fn key(&self) -> &str;
}

impl Record for Asset {
    const KIND: &'static str = "assets";

    fn key(&self) -> &str {
        &self.id
    }
}

impl Record for VariantGroup {
    const KIND: &'static str = "variant_groups";

    fn key(&self) -> &str {
        &self.id
    }
}

impl Record for Decision {
    const KIND: &'static str = "decisions";

    fn key(&self) -> &str {
        &self.asset_id
    }
}

/// Key-value persistence for assets, groups and decisions. The last write
/// for a key wins; no stronger transactional guarantee is offered.
pub trait Repository: Send + Sync {
    fn get<R: Record>(&self, key: &str) -> Result<Option<R>, StoreError>;

    fn put<R: Record>(&self, record: &R) -> Result<(), StoreError>;

    fn delete<R: Record>(&self, key: &str) -> Result<bool, StoreError>;

    fn list<R: Record>(&self) -> Result<Vec<R>, StoreError>;

    /// Replace every record of kind `R` with `records`.
    fn replace_all<R: Record>(&self, records: &[R]) -> Result<(), StoreError>;
}

/// Store a decision. Returns `false` when nothing observable changed:
/// repeating the current verdict keeps the stored record and its timestamp,
/// and `Undecided` on an asset without a decision is a no-op.
pub fn set_decision<S: Repository>(store: &S, decision: Decision) -> Result<bool, StoreError> {
    if decision.state == DecisionState::Undecided {
        return store.delete::<Decision>(&decision.asset_id);
    }

    if let Some(existing) = store.get::<Decision>(&decision.asset_id)? {
        if existing.same_verdict(&decision) {
            return Ok(false);
        }
    }

    store.put(&decision)?;
    Ok(true)
}

pub fn load_decisions<S: Repository>(store: &S) -> Result<HashMap<String, Decision>, StoreError> {
    Ok(store
        .list::<Decision>()?
        .into_iter()
        .map(|decision| (decision.asset_id.clone(), decision))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::ReasonCode;

    #[test]
    fn test_set_decision_is_idempotent() {
        let store = MemoryStore::new();
        let first = Decision::new("ast_1", DecisionState::Keep, ReasonCode::UserOverrideKeep, None);
        let stamp = first.decided_at;

        assert!(set_decision(&store, first.clone()).unwrap());

        let mut again = first.clone();
        again.decided_at = stamp + chrono::Duration::seconds(30);
        assert!(!set_decision(&store, again).unwrap());

        let stored: Decision = store.get("ast_1").unwrap().unwrap();
        assert_eq!(stored.decided_at, stamp);
    }

    #[test]
    fn test_set_decision_overwrites_different_verdict() {
        let store = MemoryStore::new();
        set_decision(
            &store,
            Decision::new("ast_1", DecisionState::Keep, ReasonCode::UserOverrideKeep, None),
        )
        .unwrap();
        let changed = set_decision(
            &store,
            Decision::new("ast_1", DecisionState::Remove, ReasonCode::UserOverrideRemove, None),
        )
        .unwrap();

        assert!(changed);
        let decisions = load_decisions(&store).unwrap();
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions["ast_1"].state, DecisionState::Remove);
    }

    #[test]
    fn test_undecided_is_not_persisted() {
        let store = MemoryStore::new();
        set_decision(
            &store,
            Decision::new("ast_1", DecisionState::Keep, ReasonCode::ManualNoReason, None),
        )
        .unwrap();

        let removed = set_decision(
            &store,
            Decision::new("ast_1", DecisionState::Undecided, ReasonCode::ManualNoReason, None),
        )
        .unwrap();
        assert!(removed);
        assert!(store.get::<Decision>("ast_1").unwrap().is_none());

        let noop = set_decision(
            &store,
            Decision::new("ast_2", DecisionState::Undecided, ReasonCode::ManualNoReason, None),
        )
        .unwrap();
        assert!(!noop);
    }
}
