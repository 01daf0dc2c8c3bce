//! Non-destructive photo culling engine: indexes photo collections, groups
//! exact duplicates and visually similar variants, suggests what to keep and
//! materializes kept files into a separate output folder without ever
//! touching the originals.

pub mod config;
pub mod core;
pub mod database;

pub use config::{ConfigError, ProjectConfig};
pub use database::models;
