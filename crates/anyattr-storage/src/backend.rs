//! Backend selection from a [`StorageConfig`].

use tracing::info;

use crate::error::StorageError;
use crate::graph::GraphStore;
use crate::sqlite::SqliteStore;
use crate::traits::AttrStore;
use crate::types::{StorageConfig, StorageKind};

/// Opens the configured backend. Without a path the store lives in memory.
pub fn open_store(config: &StorageConfig) -> Result<Box<dyn AttrStore>, StorageError> {
    let store: Box<dyn AttrStore> = match (config.kind, &config.path) {
        (StorageKind::Relational, Some(path)) => Box::new(SqliteStore::open(path)?),
        (StorageKind::Relational, None) => Box::new(SqliteStore::in_memory()?),
        (StorageKind::Graph, Some(path)) => Box::new(GraphStore::open(path)?),
        (StorageKind::Graph, None) => Box::new(GraphStore::in_memory()),
    };
    match &config.path {
        Some(path) => info!(backend = %config.kind, path = %path.display(), "storage opened"),
        None => info!(backend = %config.kind, "in-memory storage opened"),
    }
    Ok(store)
}
