//! SchemaRegistry: the authoritative, injectable catalog of schemas,
//! classes and any types.
//!
//! One registry is built at startup (usually hydrated from a storage
//! backend) and passed by reference to everything that resolves schemas.
//! Reads are lock-free per shard; the per-kind key listing is computed
//! lazily on first request and dropped whenever a schema of that kind
//! changes.

use std::collections::BTreeSet;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::error::CoreError;
use crate::schema::{AnyType, AnyTypeClass, DerSchema, PlainSchema, Schema, VirSchema};
use crate::types::{AnyTypeKind, SchemaKind};

/// Source of plain attribute instance counts, consulted before a plain
/// schema's type is changed.
pub trait SchemaUsage {
    fn plain_attr_count(&self, schema: &str) -> usize;
}

/// Usage source for a catalog with no attribute instances yet.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unused;

impl SchemaUsage for Unused {
    fn plain_attr_count(&self, _schema: &str) -> usize {
        0
    }
}

#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    plain: DashMap<String, Arc<PlainSchema>>,
    derived: DashMap<String, Arc<DerSchema>>,
    virtual_: DashMap<String, Arc<VirSchema>>,
    classes: DashMap<String, AnyTypeClass>,
    any_types: DashMap<String, AnyType>,
    /// Sorted schema keys per kind, filled on demand.
    by_kind: DashMap<SchemaKind, Arc<Vec<String>>>,
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaRegistry {
    /// Creates a registry holding only the built-in `USER` and `GROUP`
    /// any types.
    pub fn new() -> Self {
        let any_types = DashMap::new();
        any_types.insert(
            AnyType::USER.to_string(),
            AnyType::new(AnyType::USER, AnyTypeKind::User),
        );
        any_types.insert(
            AnyType::GROUP.to_string(),
            AnyType::new(AnyType::GROUP, AnyTypeKind::Group),
        );

        SchemaRegistry {
            plain: DashMap::new(),
            derived: DashMap::new(),
            virtual_: DashMap::new(),
            classes: DashMap::new(),
            any_types,
            by_kind: DashMap::new(),
        }
    }

    // -- classes and any types ---------------------------------------------

    pub fn define_class(&self, class: AnyTypeClass) {
        self.classes.insert(class.key.clone(), class);
    }

    pub fn class(&self, key: &str) -> Option<AnyTypeClass> {
        self.classes.get(key).map(|c| c.clone())
    }

    pub fn classes(&self) -> Vec<AnyTypeClass> {
        let mut all: Vec<AnyTypeClass> = self.classes.iter().map(|c| c.clone()).collect();
        all.sort_by(|a, b| a.key.cmp(&b.key));
        all
    }

    /// Removes a class; its schemas become unclassified and any types stop
    /// listing it.
    pub fn remove_class(&self, key: &str) -> Option<AnyTypeClass> {
        let removed = self.classes.remove(key).map(|(_, c)| c)?;
        for mut entry in self.plain.iter_mut() {
            if entry.any_type_class.as_deref() == Some(key) {
                Arc::make_mut(entry.value_mut()).any_type_class = None;
            }
        }
        for mut entry in self.derived.iter_mut() {
            if entry.any_type_class.as_deref() == Some(key) {
                Arc::make_mut(entry.value_mut()).any_type_class = None;
            }
        }
        for mut entry in self.virtual_.iter_mut() {
            if entry.any_type_class.as_deref() == Some(key) {
                Arc::make_mut(entry.value_mut()).any_type_class = None;
            }
        }
        for mut any_type in self.any_types.iter_mut() {
            any_type.classes.retain(|c| c != key);
        }
        Some(removed)
    }

    /// Defines or replaces an any type.
    ///
    /// `USER` and `GROUP` are reserved for their kinds; every other key
    /// must be an `ANY_OBJECT` type.
    pub fn define_any_type(&self, any_type: AnyType) -> Result<(), CoreError> {
        let expected = match any_type.key.as_str() {
            AnyType::USER => AnyTypeKind::User,
            AnyType::GROUP => AnyTypeKind::Group,
            _ => AnyTypeKind::AnyObject,
        };
        if any_type.kind != expected {
            return Err(CoreError::InvalidSchema {
                key: any_type.key.clone(),
                reason: format!("any type must be of kind {}", expected),
            });
        }
        for class in &any_type.classes {
            if !self.classes.contains_key(class) {
                return Err(CoreError::ClassNotFound { key: class.clone() });
            }
        }
        self.any_types.insert(any_type.key.clone(), any_type);
        Ok(())
    }

    pub fn any_type(&self, key: &str) -> Result<AnyType, CoreError> {
        self.any_types
            .get(key)
            .map(|t| t.clone())
            .ok_or_else(|| CoreError::AnyTypeNotFound { key: key.to_string() })
    }

    pub fn any_types(&self) -> Vec<AnyType> {
        let mut all: Vec<AnyType> = self.any_types.iter().map(|t| t.clone()).collect();
        all.sort_by(|a, b| a.key.cmp(&b.key));
        all
    }

    // -- schemas -----------------------------------------------------------

    /// Defines or edits a schema.
    ///
    /// Keys are unique across kinds. A plain schema's type is frozen once
    /// `usage` reports attribute instances for it.
    pub fn define(&self, schema: impl Into<Schema>, usage: &dyn SchemaUsage) -> Result<(), CoreError> {
        let schema = schema.into();
        schema.validate()?;

        if let Some(class) = schema.any_type_class() {
            if !self.classes.contains_key(class) {
                return Err(CoreError::ClassNotFound {
                    key: class.to_string(),
                });
            }
        }

        let key = schema.key().to_string();
        if let Some(existing) = self.kind_of(&key) {
            if existing != schema.kind() {
                return Err(CoreError::DuplicateSchema { key, existing });
            }
        }

        let kind = schema.kind();
        match schema {
            Schema::Plain(plain) => {
                if let Some(current) = self.plain.get(&key) {
                    if current.ty != plain.ty && usage.plain_attr_count(&key) > 0 {
                        return Err(CoreError::SchemaInUse { schema: key });
                    }
                }
                self.plain.insert(key.clone(), Arc::new(plain));
            }
            Schema::Derived(der) => {
                self.derived.insert(key.clone(), Arc::new(der));
            }
            Schema::Virtual(vir) => {
                self.virtual_.insert(key.clone(), Arc::new(vir));
            }
        }
        self.by_kind.remove(&kind);
        debug!(schema = %key, kind = kind.as_str(), "schema defined");
        Ok(())
    }

    pub fn remove(&self, kind: SchemaKind, key: &str) -> Option<Schema> {
        let removed = match kind {
            SchemaKind::Plain => self
                .plain
                .remove(key)
                .map(|(_, s)| Schema::Plain((*s).clone())),
            SchemaKind::Derived => self
                .derived
                .remove(key)
                .map(|(_, s)| Schema::Derived((*s).clone())),
            SchemaKind::Virtual => self
                .virtual_
                .remove(key)
                .map(|(_, s)| Schema::Virtual((*s).clone())),
        };
        if removed.is_some() {
            self.by_kind.remove(&kind);
        }
        removed
    }

    /// Looks a key up across all kinds.
    pub fn lookup(&self, key: &str) -> Option<Schema> {
        if let Some(s) = self.plain.get(key) {
            return Some(Schema::Plain((**s).clone()));
        }
        if let Some(s) = self.derived.get(key) {
            return Some(Schema::Derived((**s).clone()));
        }
        self.virtual_.get(key).map(|s| Schema::Virtual((**s).clone()))
    }

    pub fn kind_of(&self, key: &str) -> Option<SchemaKind> {
        if self.plain.contains_key(key) {
            Some(SchemaKind::Plain)
        } else if self.derived.contains_key(key) {
            Some(SchemaKind::Derived)
        } else if self.virtual_.contains_key(key) {
            Some(SchemaKind::Virtual)
        } else {
            None
        }
    }

    pub fn plain(&self, key: &str) -> Option<Arc<PlainSchema>> {
        self.plain.get(key).map(|s| Arc::clone(&s))
    }

    pub fn derived(&self, key: &str) -> Option<Arc<DerSchema>> {
        self.derived.get(key).map(|s| Arc::clone(&s))
    }

    pub fn virtual_schema(&self, key: &str) -> Option<Arc<VirSchema>> {
        self.virtual_.get(key).map(|s| Arc::clone(&s))
    }

    pub fn require_plain(&self, key: &str) -> Result<Arc<PlainSchema>, CoreError> {
        self.plain(key).ok_or_else(|| CoreError::SchemaNotFound {
            kind: SchemaKind::Plain,
            key: key.to_string(),
        })
    }

    /// Sorted keys of every schema of `kind`.
    pub fn keys_of(&self, kind: SchemaKind) -> Arc<Vec<String>> {
        let entry = self.by_kind.entry(kind).or_insert_with(|| {
            let mut keys: Vec<String> = match kind {
                SchemaKind::Plain => self.plain.iter().map(|e| e.key().clone()).collect(),
                SchemaKind::Derived => self.derived.iter().map(|e| e.key().clone()).collect(),
                SchemaKind::Virtual => self.virtual_.iter().map(|e| e.key().clone()).collect(),
            };
            keys.sort();
            Arc::new(keys)
        });
        Arc::clone(&entry)
    }

    pub fn schemas_of(&self, kind: SchemaKind) -> Vec<Schema> {
        self.keys_of(kind)
            .iter()
            .filter_map(|key| self.get(kind, key))
            .collect()
    }

    pub fn get(&self, kind: SchemaKind, key: &str) -> Option<Schema> {
        match kind {
            SchemaKind::Plain => self.plain.get(key).map(|s| Schema::Plain((**s).clone())),
            SchemaKind::Derived => self.derived.get(key).map(|s| Schema::Derived((**s).clone())),
            SchemaKind::Virtual => self
                .virtual_
                .get(key)
                .map(|s| Schema::Virtual((**s).clone())),
        }
    }

    /// Schemas of `kind` belonging to `class`, in key order.
    pub fn schemas_for(&self, class: &str, kind: SchemaKind) -> Vec<Schema> {
        self.schemas_of(kind)
            .into_iter()
            .filter(|s| s.any_type_class() == Some(class))
            .collect()
    }

    /// Keys of `kind` belonging to any of `classes`.
    pub fn keys_in_classes<'a>(
        &self,
        classes: impl IntoIterator<Item = &'a str>,
        kind: SchemaKind,
    ) -> BTreeSet<String> {
        let classes: BTreeSet<&str> = classes.into_iter().collect();
        self.schemas_of(kind)
            .into_iter()
            .filter(|s| s.any_type_class().map_or(false, |c| classes.contains(c)))
            .map(|s| s.key().to_string())
            .collect()
    }
}
