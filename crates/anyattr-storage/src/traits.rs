//! The [`AttrStore`] trait: the storage contract both backends implement.
//!
//! Catalog methods persist classes, any types, schemas and resources; owner
//! methods persist [`Any`] instances with their memberships and plain
//! attributes. Reads that rebuild owners take the [`SchemaRegistry`] so
//! stored attributes are rebound to live schema definitions.
//!
//! The trait is synchronous and object safe; callers pick a backend once
//! through [`crate::open_store`].

use tracing::error;

use anyattr_core::{
    Any, AnyKey, AnyType, AnyTypeClass, AnyTypeKind, AttrValue, ExternalResource, PlainSchema, Schema,
    SchemaRegistry, SchemaUsage, Unused,
};

use crate::error::StorageError;
use crate::types::{AnySummary, StorageKind};

pub trait AttrStore {
    fn kind(&self) -> StorageKind;

    // -------------------------------------------------------------------
    // Catalog
    // -------------------------------------------------------------------

    fn save_class(&mut self, class: &AnyTypeClass) -> Result<(), StorageError>;

    /// Deletes a class, detaching it from schemas, any types and owners.
    fn delete_class(&mut self, key: &str) -> Result<(), StorageError>;

    fn list_classes(&self) -> Result<Vec<AnyTypeClass>, StorageError>;

    fn save_any_type(&mut self, any_type: &AnyType) -> Result<(), StorageError>;

    fn list_any_types(&self) -> Result<Vec<AnyType>, StorageError>;

    /// Inserts or replaces a schema definition.
    fn save_schema(&mut self, schema: &Schema) -> Result<(), StorageError>;

    /// Deletes a schema. Deleting a plain schema removes every attribute
    /// that uses it.
    fn delete_schema(&mut self, key: &str) -> Result<(), StorageError>;

    fn list_schemas(&self) -> Result<Vec<Schema>, StorageError>;

    fn save_resource(&mut self, resource: &ExternalResource) -> Result<(), StorageError>;

    fn load_resource(&self, key: &str) -> Result<ExternalResource, StorageError>;

    fn delete_resource(&mut self, key: &str) -> Result<(), StorageError>;

    fn list_resources(&self) -> Result<Vec<ExternalResource>, StorageError>;

    /// Builds a registry from the stored catalog.
    fn load_registry(&self) -> Result<SchemaRegistry, StorageError> {
        let registry = SchemaRegistry::new();
        for class in self.list_classes()? {
            registry.define_class(class);
        }
        for any_type in self.list_any_types()? {
            registry.define_any_type(any_type)?;
        }
        for schema in self.list_schemas()? {
            registry.define(schema, &Unused)?;
        }
        Ok(registry)
    }

    // -------------------------------------------------------------------
    // Owners
    // -------------------------------------------------------------------

    /// Inserts or replaces an owner with its memberships and attributes.
    ///
    /// Fails with [`StorageError::Duplicate`] when a unique value is held
    /// by another owner; nothing is written in that case.
    fn save_any(&mut self, any: &Any) -> Result<(), StorageError>;

    fn load_any(&self, key: AnyKey, registry: &SchemaRegistry) -> Result<Any, StorageError>;

    /// Deletes an owner. Deleting a group also removes every membership in
    /// it, along with the membership attributes.
    fn delete_any(&mut self, key: AnyKey) -> Result<(), StorageError>;

    /// Owners of `kind` (all owners for `None`), ordered by key.
    fn list_anys(&self, kind: Option<AnyTypeKind>) -> Result<Vec<AnySummary>, StorageError>;

    /// Owner holding `value` for the unique schema.
    fn find_by_unique_value(&self, schema: &PlainSchema, value: &AttrValue) -> Result<Option<AnyKey>, StorageError>;

    /// Owners with an attribute value equal to `value`, directly or in a
    /// membership, ordered by key.
    fn find_by_plain_attr_value(&self, schema: &PlainSchema, value: &AttrValue) -> Result<Vec<AnyKey>, StorageError>;

    /// Members of a group, ordered by key.
    fn find_members(&self, group: AnyKey) -> Result<Vec<AnyKey>, StorageError>;

    /// Owners directly assigned to a resource, ordered by key.
    fn find_by_resource(&self, resource: &str) -> Result<Vec<AnyKey>, StorageError>;

    /// Number of attributes using a plain schema, memberships included.
    fn plain_attr_count(&self, schema: &str) -> Result<usize, StorageError>;
}

/// Adapts a store as the registry's [`SchemaUsage`] source.
///
/// A failed count reports the schema as in use.
pub struct StoreUsage<'a>(pub &'a dyn AttrStore);

impl SchemaUsage for StoreUsage<'_> {
    fn plain_attr_count(&self, schema: &str) -> usize {
        match self.0.plain_attr_count(schema) {
            Ok(count) => count,
            Err(e) => {
                error!(schema = %schema, error = %e, "could not count attributes, assuming in use");
                1
            }
        }
    }
}
