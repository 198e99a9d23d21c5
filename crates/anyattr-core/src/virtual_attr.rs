//! Virtual attributes: values owned by an external resource, read and
//! pushed through the connector layer.

use std::sync::Arc;

use indexmap::IndexMap;
use tracing::{debug, error};

use crate::allowed::AllowedSchemas;
use crate::any::{Any, GroupResolver};
use crate::error::CoreError;
use crate::mapping::ConnAttribute;
use crate::registry::SchemaRegistry;
use crate::schema::VirSchema;

/// Reads the values of an external attribute for an owner.
pub trait VirAttrSource: Send + Sync {
    fn read(&self, resource: &str, ext_attr_name: &str, owner: &Any) -> Result<Vec<String>, CoreError>;
}

#[derive(Clone)]
pub struct VirtualAttrBridge {
    source: Arc<dyn VirAttrSource>,
}

impl std::fmt::Debug for VirtualAttrBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualAttrBridge").finish_non_exhaustive()
    }
}

impl VirtualAttrBridge {
    pub fn new(source: Arc<dyn VirAttrSource>) -> Self {
        VirtualAttrBridge { source }
    }

    /// Values of `schema` for `owner`. Empty when the owner is not on the
    /// schema's resource or the resource fails.
    pub fn values(&self, schema: &VirSchema, owner: &Any, groups: &dyn GroupResolver) -> Vec<String> {
        if !owner.all_resources(groups).contains(&schema.resource) {
            debug!(schema = %schema.key, resource = %schema.resource, "owner not on resource");
            return Vec::new();
        }
        match self.source.read(&schema.resource, &schema.ext_attr_name, owner) {
            Ok(values) => values,
            Err(e) => {
                error!(schema = %schema.key, owner = %owner.key(), error = %e, "virtual attribute read failed");
                Vec::new()
            }
        }
    }

    /// Values of every virtual schema allowed directly.
    pub fn values_all(
        &self,
        owner: &Any,
        registry: &SchemaRegistry,
        allowed: &AllowedSchemas,
        groups: &dyn GroupResolver,
    ) -> IndexMap<String, Vec<String>> {
        allowed
            .for_self
            .virtual_
            .iter()
            .filter_map(|key| registry.virtual_schema(key))
            .map(|schema| (schema.key.clone(), self.values(&schema, owner, groups)))
            .collect()
    }

    /// Connector attribute writing `values` to the schema's resource.
    pub fn prepare_push(schema: &VirSchema, values: Vec<String>) -> Result<ConnAttribute, CoreError> {
        if schema.readonly {
            return Err(CoreError::ReadonlySchema {
                schema: schema.key.clone(),
            });
        }
        Ok(ConnAttribute {
            name: schema.ext_attr_name.clone(),
            values,
        })
    }
}
