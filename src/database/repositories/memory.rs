use super::{Record, Repository};
use crate::database::StoreError;
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

type Keyspace = BTreeMap<String, Vec<u8>>;

/// Process-local store. Records are kept serialized so reads hand out
/// independent copies, the same as a disk-backed store would.
#[derive(Default)]
pub struct MemoryStore {
    spaces: RwLock<HashMap<&'static str, Keyspace>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Repository for MemoryStore {
    fn get<R: Record>(&self, key: &str) -> Result<Option<R>, StoreError> {
        let spaces = self.spaces.read().map_err(|_| StoreError::Poisoned)?;
        spaces
            .get(R::KIND)
            .and_then(|space| space.get(key))
            .map(|bytes| serde_json::from_slice(bytes))
            .transpose()
            .map_err(StoreError::from)
    }

    fn put<R: Record>(&self, record: &R) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(record)?;
        let mut spaces = self.spaces.write().map_err(|_| StoreError::Poisoned)?;
        spaces
            .entry(R::KIND)
            .or_default()
            .insert(record.key().to_string(), bytes);
        Ok(())
    }

    fn delete<R: Record>(&self, key: &str) -> Result<bool, StoreError> {
        let mut spaces = self.spaces.write().map_err(|_| StoreError::Poisoned)?;
        Ok(spaces
            .get_mut(R::KIND)
            .map(|space| space.remove(key).is_some())
            .unwrap_or(false))
    }

    fn list<R: Record>(&self) -> Result<Vec<R>, StoreError> {
        let spaces = self.spaces.read().map_err(|_| StoreError::Poisoned)?;
        let Some(space) = spaces.get(R::KIND) else {
            return Ok(Vec::new());
        };
        space
            .values()
            .map(|bytes| serde_json::from_slice(bytes).map_err(StoreError::from))
            .collect()
    }

    fn replace_all<R: Record>(&self, records: &[R]) -> Result<(), StoreError> {
        let mut fresh = Keyspace::new();
        for record in records {
            fresh.insert(record.key().to_string(), serde_json::to_vec(record)?);
        }
        let mut spaces = self.spaces.write().map_err(|_| StoreError::Poisoned)?;
        spaces.insert(R::KIND, fresh);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::{GroupType, VariantGroup};

    fn group(seed: &str) -> VariantGroup {
        VariantGroup::new(
            GroupType::Exact,
            100.0,
            vec!["ast_a".to_string(), "ast_b".to_string()],
            seed,
        )
    }

    #[test]
    fn test_put_get_delete() {
        let store = MemoryStore::new();
        let g = group("h1");

        store.put(&g).unwrap();
        let loaded: VariantGroup = store.get(&g.id).unwrap().unwrap();
        assert_eq!(loaded, g);

        assert!(store.delete::<VariantGroup>(&g.id).unwrap());
        assert!(!store.delete::<VariantGroup>(&g.id).unwrap());
        assert!(store.get::<VariantGroup>(&g.id).unwrap().is_none());
    }

    #[test]
    fn test_replace_all_drops_previous_records() {
        let store = MemoryStore::new();
        store.put(&group("old")).unwrap();

        let fresh = vec![group("new1"), group("new2")];
        store.replace_all(&fresh).unwrap();

        let listed: Vec<VariantGroup> = store.list().unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().all(|g| fresh.contains(g)));
    }
}
