use super::{Record, Repository};
use crate::database::StoreError;
use std::collections::HashSet;
use std::path::Path;

/// Embedded on-disk store: one sled tree per record kind, JSON values.
pub struct SledStore {
    db: sled::Db,
}

impl SledStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        log::debug!("Opened project store at {}", path.display());
        Ok(Self { db })
    }

    pub fn temporary() -> Result<Self, StoreError> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    fn tree<R: Record>(&self) -> Result<sled::Tree, StoreError> {
        Ok(self.db.open_tree(R::KIND)?)
    }
}

impl Repository for SledStore {
    fn get<R: Record>(&self, key: &str) -> Result<Option<R>, StoreError> {
        match self.tree::<R>()?.get(key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put<R: Record>(&self, record: &R) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(record)?;
        self.tree::<R>()?.insert(record.key(), bytes)?;
        Ok(())
    }

    fn delete<R: Record>(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.tree::<R>()?.remove(key)?.is_some())
    }

    fn list<R: Record>(&self) -> Result<Vec<R>, StoreError> {
        let mut records = Vec::new();
        for value in self.tree::<R>()?.iter().values() {
            records.push(serde_json::from_slice(&value?)?);
        }
        Ok(records)
    }

    fn replace_all<R: Record>(&self, records: &[R]) -> Result<(), StoreError> {
        let tree = self.tree::<R>()?;
        let mut batch = sled::Batch::default();
        let mut keep = HashSet::with_capacity(records.len());

        for record in records {
            batch.insert(record.key(), serde_json::to_vec(record)?);
            keep.insert(record.key().as_bytes().to_vec());
        }
        for key in tree.iter().keys() {
            let key = key?;
            if !keep.contains(&key[..]) {
                batch.remove(key);
            }
        }

        tree.apply_batch(batch)?;
        Ok(())
    }
}
