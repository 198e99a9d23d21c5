//! Conversions between owners and their flat storage form.
//!
//! [`decompose`] splits an [`Any`] into an [`AnyRecord`] plus one
//! [`PlainAttrRecord`] per attribute; [`recompose`] rebuilds the owner,
//! rebinding each attribute to its schema through the registry.
//! [`list2json`] and [`json2list`] are the attribute side-table codec used
//! by the graph backend.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use anyattr_core::{
    Any, AnyDetails, AnyKey, AnyTypeKind, AttrSchemaType, AttrValue, Membership, MembershipKey, PlainAttr, Schema,
    SchemaRegistry,
};

use crate::error::StorageError;

/// Position of an attribute within its owner.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttrSlot {
    pub membership: Option<MembershipKey>,
    pub schema: String,
}

/// Stored form of one plain attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlainAttrRecord {
    pub schema: String,
    #[serde(rename = "type")]
    pub ty: AttrSchemaType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub membership: Option<MembershipKey>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<AttrValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique_value: Option<AttrValue>,
}

impl PlainAttrRecord {
    pub fn from_attr(attr: &PlainAttr) -> Result<Self, StorageError> {
        let schema = attr.schema().ok_or_else(|| StorageError::IntegrityError {
            reason: format!("attribute of {} has no schema", attr.owner()),
        })?;
        Ok(PlainAttrRecord {
            schema: schema.key.clone(),
            ty: schema.ty,
            membership: attr.membership(),
            values: attr.values().to_vec(),
            unique_value: attr.unique_value().cloned(),
        })
    }

    pub fn slot(&self) -> AttrSlot {
        AttrSlot {
            membership: self.membership,
            schema: self.schema.clone(),
        }
    }

    /// Rebuilds the attribute for `owner`.
    ///
    /// Returns `None` when the schema no longer exists. A schema whose type
    /// differs from the stored type tag is a reconstruction error.
    pub fn into_attr(self, owner: AnyKey, registry: &SchemaRegistry) -> Result<Option<PlainAttr>, StorageError> {
        let Some(schema) = registry.plain(&self.schema) else {
            warn!(schema = %self.schema, owner = %owner, "dropping attribute of unknown schema");
            return Ok(None);
        };
        if schema.ty != self.ty {
            return Err(StorageError::ReconstructionError {
                reason: format!(
                    "attribute '{}' stored as {} but schema is {}",
                    self.schema, self.ty, schema.ty
                ),
            });
        }

        let attr = match self.membership {
            None => PlainAttr::new(owner),
            Some(m) => PlainAttr::for_membership(owner, m),
        };
        let mut attr = attr.with_schema(Arc::clone(&schema))?;
        for value in self.values.into_iter().chain(self.unique_value) {
            attr.restore_value(value)?;
        }
        Ok(Some(attr))
    }
}

/// Canonical text of a value, used for uniqueness and value lookups.
///
/// The conversion pattern is ignored: it may change while attributes
/// exist, and a stored token must keep matching the same typed value.
pub fn unique_token(value: &AttrValue) -> String {
    value.format(None)
}

/// Distinct `(schema, token)` pairs of the owner's unique values.
pub fn unique_entries(any: &Any) -> BTreeSet<(String, String)> {
    any.all_plain_attrs()
        .filter_map(|attr| {
            let schema = attr.schema()?;
            let value = attr.unique_value()?;
            Some((schema.key.clone(), unique_token(value)))
        })
        .collect()
}

/// Clears `class` from a schema definition; `true` if it was set.
pub fn detach_class(schema: &mut Schema, class: &str) -> bool {
    let slot = match schema {
        Schema::Plain(s) => &mut s.any_type_class,
        Schema::Derived(s) => &mut s.any_type_class,
        Schema::Virtual(s) => &mut s.any_type_class,
    };
    if slot.as_deref() == Some(class) {
        *slot = None;
        true
    } else {
        false
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MembershipRecord {
    pub key: MembershipKey,
    pub group: AnyKey,
}

/// An owner without its attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnyRecord {
    pub key: AnyKey,
    pub any_type: String,
    pub realm: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_change_date: Option<DateTime<Utc>>,
    pub details: AnyDetails,
    #[serde(default)]
    pub aux_classes: Vec<String>,
    #[serde(default)]
    pub resources: Vec<String>,
    #[serde(default)]
    pub memberships: Vec<MembershipRecord>,
}

impl AnyRecord {
    pub fn kind(&self) -> AnyTypeKind {
        match self.details {
            AnyDetails::User { .. } => AnyTypeKind::User,
            AnyDetails::Group { .. } => AnyTypeKind::Group,
            AnyDetails::AnyObject { .. } => AnyTypeKind::AnyObject,
        }
    }

    pub fn name(&self) -> &str {
        match &self.details {
            AnyDetails::User { username, .. } => username,
            AnyDetails::Group { name, .. } | AnyDetails::AnyObject { name } => name,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DecomposedAny {
    pub record: AnyRecord,
    pub attrs: Vec<PlainAttrRecord>,
}

pub fn decompose(any: &Any) -> Result<DecomposedAny, StorageError> {
    let record = AnyRecord {
        key: any.key(),
        any_type: any.any_type().to_string(),
        realm: any.realm().to_string(),
        status: any.status().map(str::to_string),
        creator: any.creator().map(str::to_string),
        creation_date: any.creation_date(),
        last_modifier: any.last_modifier().map(str::to_string),
        last_change_date: any.last_change_date(),
        details: any.details().clone(),
        aux_classes: any.aux_classes().to_vec(),
        resources: any.resources().to_vec(),
        memberships: any
            .memberships()
            .iter()
            .map(|m| MembershipRecord {
                key: m.key,
                group: m.group,
            })
            .collect(),
    };
    let attrs = any
        .all_plain_attrs()
        .map(PlainAttrRecord::from_attr)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(DecomposedAny { record, attrs })
}

pub fn recompose(decomposed: DecomposedAny, registry: &SchemaRegistry) -> Result<Any, StorageError> {
    let DecomposedAny { record, attrs } = decomposed;
    let mut any = Any::with_key(record.key, record.any_type, record.realm, record.details);
    any.set_status(record.status);
    any.set_creation(record.creator, record.creation_date);
    any.set_last_change(record.last_modifier, record.last_change_date);
    for class in record.aux_classes {
        any.add_aux_class(class);
    }
    for resource in record.resources {
        any.add_resource(resource);
    }
    for m in record.memberships {
        any.restore_membership(Membership::new(m.key, m.group))?;
    }
    for attr in attrs {
        if let Some(attr) = attr.into_attr(record.key, registry)? {
            any.restore_plain_attr(attr)?;
        }
    }
    Ok(any)
}

pub fn records_to_json(records: &[PlainAttrRecord]) -> Result<String, StorageError> {
    Ok(serde_json::to_string(records)?)
}

pub fn json_to_records(json: &str) -> Result<Vec<PlainAttrRecord>, StorageError> {
    if json.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_str(json)?)
}

/// Serializes attributes for the side table, keeping schema key, type tag,
/// membership key and every populated value slot.
pub fn list2json<'a>(attrs: impl IntoIterator<Item = &'a PlainAttr>) -> Result<String, StorageError> {
    let records = attrs
        .into_iter()
        .map(PlainAttrRecord::from_attr)
        .collect::<Result<Vec<_>, _>>()?;
    records_to_json(&records)
}

/// Inverse of [`list2json`]: rebinds each attribute of `owner` to its
/// registered schema.
pub fn json2list(json: &str, owner: AnyKey, registry: &SchemaRegistry) -> Result<Vec<PlainAttr>, StorageError> {
    let mut attrs = Vec::new();
    for record in json_to_records(json)? {
        if let Some(attr) = record.into_attr(owner, registry)? {
            attrs.push(attr);
        }
    }
    Ok(attrs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyattr_core::{AttrWriteContext, BasicValidator, AllowedSchemas, PlainSchema, SchemaSet, TypeCodec, Unused};
    use uuid::Uuid;

    fn registry() -> SchemaRegistry {
        let registry = SchemaRegistry::new();
        registry
            .define(PlainSchema::new("email", AttrSchemaType::String).unique(), &Unused)
            .unwrap();
        registry
            .define(PlainSchema::new("phone", AttrSchemaType::String).multivalue(), &Unused)
            .unwrap();
        registry
            .define(PlainSchema::new("age", AttrSchemaType::Long), &Unused)
            .unwrap();
        registry
    }

    fn allow_all(owner: &Any) -> AllowedSchemas {
        let set = SchemaSet {
            plain: ["email", "phone", "age"].iter().map(|k| k.to_string()).collect(),
            ..SchemaSet::default()
        };
        AllowedSchemas {
            owner: owner.label(),
            for_self: set.clone(),
            for_memberships: owner.memberships().iter().map(|m| (m.group, set.clone())).collect(),
            membership_groups: owner.memberships().iter().map(|m| (m.key, m.group)).collect(),
        }
    }

    fn owner(registry: &SchemaRegistry) -> Any {
        let mut any = Any::with_key(
            AnyKey(Uuid::from_u128(1)),
            "USER",
            "/",
            AnyDetails::User {
                username: "ann".into(),
                password: None,
                cipher_algorithm: None,
            },
        );
        let group = AnyKey(Uuid::from_u128(2));
        let m = MembershipKey(Uuid::from_u128(3));
        any.restore_membership(Membership::new(m, group)).unwrap();

        let codec = TypeCodec::default();
        let allowed = allow_all(&any);
        let ctx = AttrWriteContext {
            codec: &codec,
            allowed: &allowed,
            validator: &BasicValidator,
        };
        let schema = |k: &str| registry.require_plain(k).unwrap();
        any.set_plain_values(schema("email"), None, &["ann@example.org"], &ctx).unwrap();
        any.set_plain_values(schema("phone"), None, &["555-1", "555-2"], &ctx).unwrap();
        any.set_plain_values(schema("age"), Some(m), &["42"], &ctx).unwrap();
        any
    }

    #[test]
    fn side_table_wire_format() {
        let registry = registry();
        let any = owner(&registry);
        let json = list2json(any.all_plain_attrs()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        insta::assert_json_snapshot!(value, @r###"
        [
          {
            "schema": "email",
            "type": "String",
            "uniqueValue": {
              "stringValue": "ann@example.org"
            }
          },
          {
            "schema": "phone",
            "type": "String",
            "values": [
              {
                "stringValue": "555-1"
              },
              {
                "stringValue": "555-2"
              }
            ]
          },
          {
            "membership": "00000000-0000-0000-0000-000000000003",
            "schema": "age",
            "type": "Long",
            "values": [
              {
                "longValue": 42
              }
            ]
          }
        ]
        "###);
    }

    #[test]
    fn json2list_restores_slots_and_membership() {
        let registry = registry();
        let any = owner(&registry);
        let json = list2json(any.all_plain_attrs()).unwrap();
        let restored = json2list(&json, any.key(), &registry).unwrap();

        let original: Vec<&PlainAttr> = any.all_plain_attrs().collect();
        assert_eq!(restored.len(), original.len());
        for (a, b) in restored.iter().zip(original) {
            assert_eq!(a, b);
            assert_eq!(a.values(), b.values());
            assert_eq!(a.unique_value(), b.unique_value());
            assert_eq!(a.membership(), b.membership());
        }
    }

    #[test]
    fn type_tag_mismatch_is_rejected() {
        let registry = registry();
        let json = r#"[{"schema":"age","type":"String","values":[{"stringValue":"x"}]}]"#;
        match json2list(json, AnyKey(Uuid::from_u128(1)), &registry) {
            Err(StorageError::ReconstructionError { reason }) => assert!(reason.contains("age")),
            other => panic!("expected ReconstructionError, got {:?}", other),
        }
    }

    #[test]
    fn unknown_schema_is_dropped() {
        let registry = registry();
        let json = r#"[{"schema":"gone","type":"String","values":[{"stringValue":"x"}]}]"#;
        let attrs = json2list(json, AnyKey(Uuid::from_u128(1)), &registry).unwrap();
        assert!(attrs.is_empty());
    }

    #[test]
    fn decompose_recompose_keeps_owner_state() {
        let registry = registry();
        let mut any = owner(&registry);
        any.set_status(Some("active".into()));
        any.touch("admin");

        let restored = recompose(decompose(&any).unwrap(), &registry).unwrap();
        assert_eq!(restored, any);
        assert_eq!(restored.status(), Some("active"));
        assert_eq!(restored.last_modifier(), Some("admin"));
        assert_eq!(restored.memberships().len(), 1);
        assert_eq!(restored.all_plain_attrs().count(), 3);
    }
}
