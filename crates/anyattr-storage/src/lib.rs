//! Persistence for owners, schemas and plain attributes.
//!
//! Two backends implement the [`AttrStore`] contract and must answer every
//! query identically:
//! - [`SqliteStore`]: relational tables with one row per attribute value and
//!   a unique-value index table, written incrementally through content hashes
//! - [`GraphStore`]: a petgraph graph with typed edges and a JSON attribute
//!   side table per owner, optionally snapshotted to a file
//!
//! [`open_store`] picks one from a [`StorageConfig`].
//!
//! # Modules
//!
//! - [`error`]: StorageError enum with all failure modes
//! - [`types`]: StorageKind, StorageConfig, AnySummary
//! - [`traits`]: AttrStore trait and the StoreUsage adapter
//! - [`convert`]: Any decompose/recompose and the attribute JSON format
//! - [`schema`]: SQL migrations and connection setup
//! - [`sqlite`]: SqliteStore implementation
//! - [`graph`]: GraphStore implementation

pub mod backend;
pub mod convert;
pub mod dirty;
pub mod error;
pub mod graph;
pub mod hash;
pub mod schema;
pub mod sqlite;
pub mod traits;
pub mod types;

pub use backend::open_store;
pub use convert::{json2list, list2json};
pub use dirty::{compute_dirty_set, DirtySet};
pub use error::StorageError;
pub use graph::GraphStore;
pub use hash::{hash_attr, hash_attrs};
pub use sqlite::SqliteStore;
pub use traits::{AttrStore, StoreUsage};
pub use types::{AnySummary, StorageConfig, StorageKind};
