//! Deterministic content hashing of stored attributes using blake3.
//!
//! The relational backend keeps one hash per attribute row so a save only
//! rewrites the attributes whose content changed.

use std::collections::BTreeMap;

use crate::convert::{AttrSlot, PlainAttrRecord};
use crate::error::StorageError;

/// Hash of an attribute's schema key, type tag, membership and values.
///
/// Values are hashed through their JSON form, which only contains
/// populated slots in declaration order.
pub fn hash_attr(record: &PlainAttrRecord) -> Result<blake3::Hash, StorageError> {
    let mut hasher = blake3::Hasher::new();
    hasher.update(record.schema.as_bytes());
    hasher.update(&[0]);
    hasher.update(record.ty.as_str().as_bytes());
    hasher.update(&[0]);
    if let Some(m) = record.membership {
        hasher.update(m.0.as_bytes());
    }
    for value in &record.values {
        hasher.update(b"v");
        hasher.update(&serde_json::to_vec(value)?);
    }
    if let Some(unique) = &record.unique_value {
        hasher.update(b"u");
        hasher.update(&serde_json::to_vec(unique)?);
    }
    Ok(hasher.finalize())
}

pub fn hash_attrs(records: &[PlainAttrRecord]) -> Result<BTreeMap<AttrSlot, blake3::Hash>, StorageError> {
    records.iter().map(|r| Ok((r.slot(), hash_attr(r)?))).collect()
}
