pub mod models;
pub mod repositories;

use thiserror::Error;

pub use repositories::{
    load_decisions, set_decision, MemoryStore, Record, Repository, SledStore,
};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Sled(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store lock poisoned")]
    Poisoned,
}
