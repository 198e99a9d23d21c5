//! PlainAttr: schema + owner + values under the schema's constraints.

use std::sync::Arc;

use smallvec::SmallVec;
use tracing::debug;

use crate::allowed::AllowedSchemas;
use crate::codec::TypeCodec;
use crate::error::CoreError;
use crate::id::{AnyKey, MembershipKey};
use crate::schema::PlainSchema;
use crate::types::{AttrSchemaType, SchemaKind};
use crate::value::AttrValue;

/// Checks a parsed value beyond type coercion.
pub trait PlainAttrValidator {
    fn validate(&self, schema: &PlainSchema, raw: &str, value: &AttrValue) -> Result<(), CoreError>;
}

/// Enforces enumeration membership for Enum schemas.
#[derive(Debug, Default, Clone, Copy)]
pub struct BasicValidator;

impl PlainAttrValidator for BasicValidator {
    fn validate(&self, schema: &PlainSchema, raw: &str, _value: &AttrValue) -> Result<(), CoreError> {
        if schema.ty == AttrSchemaType::Enum && !schema.enumeration_values.iter().any(|v| v == raw) {
            return Err(CoreError::InvalidValue {
                schema: schema.key.clone(),
                value: raw.to_string(),
                reason: format!("not one of {:?}", schema.enumeration_values),
            });
        }
        Ok(())
    }
}

/// Collaborators needed to turn raw input into stored values.
#[derive(Clone, Copy)]
pub struct AttrWriteContext<'a> {
    pub codec: &'a TypeCodec,
    pub allowed: &'a AllowedSchemas,
    pub validator: &'a dyn PlainAttrValidator,
}

/// A plain attribute of an owner, or of one of its memberships.
#[derive(Debug, Clone)]
pub struct PlainAttr {
    owner: AnyKey,
    membership: Option<MembershipKey>,
    schema: Option<Arc<PlainSchema>>,
    values: SmallVec<[AttrValue; 1]>,
    unique_value: Option<AttrValue>,
}

impl PlainAttr {
    pub fn new(owner: AnyKey) -> Self {
        PlainAttr {
            owner,
            membership: None,
            schema: None,
            values: SmallVec::new(),
            unique_value: None,
        }
    }

    /// An attribute in the overlay of `membership`.
    pub fn for_membership(owner: AnyKey, membership: MembershipKey) -> Self {
        PlainAttr {
            membership: Some(membership),
            ..PlainAttr::new(owner)
        }
    }

    pub fn with_schema(mut self, schema: Arc<PlainSchema>) -> Result<Self, CoreError> {
        self.set_schema(schema)?;
        Ok(self)
    }

    /// Binds the schema. Rebinding to another key is only possible while
    /// the attribute holds no values.
    pub fn set_schema(&mut self, schema: Arc<PlainSchema>) -> Result<(), CoreError> {
        if let Some(current) = &self.schema {
            if current.key != schema.key && !self.is_empty() {
                return Err(CoreError::InvalidState(format!(
                    "attribute of '{}' already holds values",
                    current.key
                )));
            }
        }
        self.schema = Some(schema);
        Ok(())
    }

    pub fn schema(&self) -> Option<&Arc<PlainSchema>> {
        self.schema.as_ref()
    }

    pub fn schema_key(&self) -> Option<&str> {
        self.schema.as_deref().map(|s| s.key.as_str())
    }

    pub fn owner(&self) -> AnyKey {
        self.owner
    }

    pub fn membership(&self) -> Option<MembershipKey> {
        self.membership
    }

    pub fn values(&self) -> &[AttrValue] {
        &self.values
    }

    pub fn unique_value(&self) -> Option<&AttrValue> {
        self.unique_value.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.unique_value.is_none()
    }

    fn require_schema(&self) -> Result<&Arc<PlainSchema>, CoreError> {
        self.schema
            .as_ref()
            .ok_or_else(|| CoreError::InvalidState("owner/schema must precede values".into()))
    }

    /// Parses `raw` and stores it according to the schema's constraints.
    ///
    /// Unique schemas replace their single unique value, single-valued
    /// schemas replace their value, multivalue schemas append. Uniqueness
    /// across owners is checked by the storage backend at commit.
    pub fn add_value(&mut self, raw: &str, ctx: &AttrWriteContext<'_>) -> Result<(), CoreError> {
        let schema = Arc::clone(self.require_schema()?);
        if !ctx.allowed.allows(SchemaKind::Plain, &schema.key, self.membership) {
            return Err(CoreError::UnallowedSchema {
                schema: schema.key.clone(),
                owner: ctx.allowed.owner_label(self.membership),
            });
        }

        let value = AttrValue::from_typed(ctx.codec.parse_for(&schema, raw)?);
        ctx.validator.validate(&schema, raw, &value)?;
        debug!(schema = %schema.key, owner = %self.owner, "plain attribute value added");
        self.store(&schema, value);
        Ok(())
    }

    /// Stores an already-typed value, as read back from storage.
    pub fn restore_value(&mut self, value: AttrValue) -> Result<(), CoreError> {
        let schema = Arc::clone(self.require_schema()?);
        self.store(&schema, value);
        Ok(())
    }

    fn store(&mut self, schema: &PlainSchema, value: AttrValue) {
        if schema.unique_constraint {
            self.values.clear();
            self.unique_value = Some(value);
        } else {
            self.unique_value = None;
            if !schema.multivalue {
                self.values.clear();
            }
            self.values.push(value);
        }
    }

    pub fn remove_values(&mut self) {
        self.values.clear();
        self.unique_value = None;
    }

    /// Formatted values: the unique value alone for unique schemas.
    pub fn values_as_strings(&self) -> Vec<String> {
        let Some(schema) = &self.schema else {
            return Vec::new();
        };
        let pattern = schema.conversion_pattern.as_deref();
        if schema.unique_constraint {
            self.unique_value
                .iter()
                .map(|v| v.format(pattern))
                .collect()
        } else {
            self.values.iter().map(|v| v.format(pattern)).collect()
        }
    }
}

impl PartialEq for PlainAttr {
    fn eq(&self, other: &Self) -> bool {
        self.schema_key() == other.schema_key()
            && self.owner == other.owner
            && self.membership == other.membership
    }
}

impl Eq for PlainAttr {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allowed::SchemaSet;
    use std::collections::BTreeMap;

    fn allowed_for(owner: AnyKey, keys: &[&str]) -> AllowedSchemas {
        AllowedSchemas {
            owner: owner.to_string(),
            for_self: SchemaSet {
                plain: keys.iter().map(|k| k.to_string()).collect(),
                ..SchemaSet::default()
            },
            for_memberships: BTreeMap::new(),
            membership_groups: BTreeMap::new(),
        }
    }

    fn add(attr: &mut PlainAttr, raw: &str, allowed: &AllowedSchemas) -> Result<(), CoreError> {
        let codec = TypeCodec::default();
        let ctx = AttrWriteContext {
            codec: &codec,
            allowed,
            validator: &BasicValidator,
        };
        attr.add_value(raw, &ctx)
    }

    #[test]
    fn value_before_schema_is_invalid_state() {
        let owner = AnyKey::generate();
        let mut attr = PlainAttr::new(owner);
        match add(&mut attr, "x", &allowed_for(owner, &["x"])).unwrap_err() {
            CoreError::InvalidState(msg) => assert_eq!(msg, "owner/schema must precede values"),
            other => panic!("expected InvalidState, got {:?}", other),
        }
        assert!(attr.restore_value(AttrValue::string("x")).is_err());
    }

    #[test]
    fn age_scenario() {
        let owner = AnyKey::generate();
        let schema = Arc::new(PlainSchema::new("age", AttrSchemaType::Long).with_pattern("#"));
        let mut attr = PlainAttr::new(owner).with_schema(schema).unwrap();
        add(&mut attr, "42", &allowed_for(owner, &["age"])).unwrap();

        assert_eq!(attr.values()[0].long_value, Some(42));
        assert_eq!(attr.values_as_strings(), vec!["42"]);
    }

    #[test]
    fn single_value_schema_replaces() {
        let owner = AnyKey::generate();
        let schema = Arc::new(PlainSchema::new("city", AttrSchemaType::String));
        let mut attr = PlainAttr::new(owner).with_schema(schema).unwrap();
        let allowed = allowed_for(owner, &["city"]);
        add(&mut attr, "Rome", &allowed).unwrap();
        add(&mut attr, "Oslo", &allowed).unwrap();
        assert_eq!(attr.values_as_strings(), vec!["Oslo"]);
    }

    #[test]
    fn multivalue_schema_appends() {
        let owner = AnyKey::generate();
        let schema = Arc::new(PlainSchema::new("phone", AttrSchemaType::String).multivalue());
        let mut attr = PlainAttr::new(owner).with_schema(schema).unwrap();
        let allowed = allowed_for(owner, &["phone"]);
        add(&mut attr, "1", &allowed).unwrap();
        add(&mut attr, "2", &allowed).unwrap();
        assert_eq!(attr.values_as_strings(), vec!["1", "2"]);
    }

    #[test]
    fn unique_schema_uses_unique_value() {
        let owner = AnyKey::generate();
        let schema = Arc::new(PlainSchema::new("email", AttrSchemaType::String).unique());
        let mut attr = PlainAttr::new(owner).with_schema(schema).unwrap();
        let allowed = allowed_for(owner, &["email"]);
        add(&mut attr, "a@x.com", &allowed).unwrap();
        add(&mut attr, "b@x.com", &allowed).unwrap();

        assert!(attr.values().is_empty());
        assert_eq!(attr.unique_value().unwrap().string_value.as_deref(), Some("b@x.com"));
        assert_eq!(attr.values_as_strings(), vec!["b@x.com"]);
    }

    #[test]
    fn unallowed_schema_rejected() {
        let owner = AnyKey::generate();
        let schema = Arc::new(PlainSchema::new("salary", AttrSchemaType::Long));
        let mut attr = PlainAttr::new(owner).with_schema(schema).unwrap();
        let err = add(&mut attr, "1000", &allowed_for(owner, &["age"])).unwrap_err();
        assert!(matches!(err, CoreError::UnallowedSchema { ref schema, .. } if schema == "salary"));
        assert!(attr.is_empty());
    }

    #[test]
    fn parse_failure_leaves_values_untouched() {
        let owner = AnyKey::generate();
        let schema = Arc::new(PlainSchema::new("age", AttrSchemaType::Long));
        let mut attr = PlainAttr::new(owner).with_schema(schema).unwrap();
        let allowed = allowed_for(owner, &["age"]);
        add(&mut attr, "41", &allowed).unwrap();
        assert!(matches!(
            add(&mut attr, "old", &allowed),
            Err(CoreError::Parsing { .. })
        ));
        assert_eq!(attr.values_as_strings(), vec!["41"]);
    }

    #[test]
    fn enum_validator() {
        let owner = AnyKey::generate();
        let schema = Arc::new(
            PlainSchema::new("color", AttrSchemaType::Enum).with_enumeration(&["red", "blue"]),
        );
        let mut attr = PlainAttr::new(owner).with_schema(schema).unwrap();
        let allowed = allowed_for(owner, &["color"]);
        add(&mut attr, "red", &allowed).unwrap();
        assert!(matches!(
            add(&mut attr, "green", &allowed),
            Err(CoreError::InvalidValue { .. })
        ));
    }

    #[test]
    fn schema_rebind_blocked_once_valued() {
        let owner = AnyKey::generate();
        let a = Arc::new(PlainSchema::new("a", AttrSchemaType::String));
        let b = Arc::new(PlainSchema::new("b", AttrSchemaType::String));
        let mut attr = PlainAttr::new(owner).with_schema(Arc::clone(&a)).unwrap();
        attr.set_schema(Arc::clone(&b)).unwrap();
        attr.restore_value(AttrValue::string("v")).unwrap();
        assert!(matches!(attr.set_schema(a), Err(CoreError::InvalidState(_))));
    }

    #[test]
    fn equality_is_keyed() {
        let owner = AnyKey::generate();
        let schema = Arc::new(PlainSchema::new("a", AttrSchemaType::String));
        let mut x = PlainAttr::new(owner).with_schema(Arc::clone(&schema)).unwrap();
        let y = PlainAttr::new(owner).with_schema(Arc::clone(&schema)).unwrap();
        x.restore_value(AttrValue::string("different")).unwrap();
        assert_eq!(x, y);

        let z = PlainAttr::for_membership(owner, MembershipKey::generate())
            .with_schema(schema)
            .unwrap();
        assert_ne!(x, z);
    }
}
