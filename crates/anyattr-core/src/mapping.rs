//! Mapping between internal attributes and external resource fields.
//!
//! A resource holds one provision per any type; each provision's mapping
//! is a list of items, each tagged with the purpose (inbound, outbound,
//! both or none) it serves.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::error;

use crate::error::CoreError;
use crate::schema::NEVER_MANDATORY;
use crate::types::{AnyTypeKind, SchemaKind};

/// Connector-side name of the object identifier.
pub const UID: &str = "__UID__";
/// Connector-side name of the object name.
pub const NAME: &str = "__NAME__";
/// Connector-side name of the password.
pub const PASSWORD: &str = "__PASSWORD__";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MappingPurpose {
    Synchronization,
    Propagation,
    Both,
    None,
}

impl MappingPurpose {
    pub fn as_str(self) -> &'static str {
        match self {
            MappingPurpose::Synchronization => "SYNCHRONIZATION",
            MappingPurpose::Propagation => "PROPAGATION",
            MappingPurpose::Both => "BOTH",
            MappingPurpose::None => "NONE",
        }
    }

    /// Whether an item purposed `item` takes part in a `self` flow.
    pub fn selects(self, item: MappingPurpose) -> bool {
        match self {
            MappingPurpose::Synchronization => {
                !matches!(item, MappingPurpose::Propagation | MappingPurpose::None)
            }
            MappingPurpose::Propagation => {
                !matches!(item, MappingPurpose::Synchronization | MappingPurpose::None)
            }
            MappingPurpose::Both => item != MappingPurpose::None,
            MappingPurpose::None => item == MappingPurpose::None,
        }
    }
}

impl fmt::Display for MappingPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MappingPurpose {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "SYNCHRONIZATION" => Ok(MappingPurpose::Synchronization),
            "PROPAGATION" => Ok(MappingPurpose::Propagation),
            "BOTH" => Ok(MappingPurpose::Both),
            "NONE" => Ok(MappingPurpose::None),
            other => Err(format!("unknown mapping purpose: {}", other)),
        }
    }
}

/// What an item reads on the internal side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IntMappingType {
    UserPlainSchema,
    UserDerivedSchema,
    UserVirtualSchema,
    UserKey,
    Username,
    Password,
    GroupPlainSchema,
    GroupDerivedSchema,
    GroupVirtualSchema,
    GroupKey,
    GroupName,
    AnyObjectPlainSchema,
    AnyObjectDerivedSchema,
    AnyObjectVirtualSchema,
    AnyObjectKey,
    AnyObjectName,
}

/// Source of an item's values, independent of owner kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingSource {
    Schema(SchemaKind),
    Key,
    Name,
    Password,
}

impl IntMappingType {
    pub fn kind(self) -> AnyTypeKind {
        use IntMappingType::*;
        match self {
            UserPlainSchema | UserDerivedSchema | UserVirtualSchema | UserKey | Username | Password => {
                AnyTypeKind::User
            }
            GroupPlainSchema | GroupDerivedSchema | GroupVirtualSchema | GroupKey | GroupName => {
                AnyTypeKind::Group
            }
            AnyObjectPlainSchema | AnyObjectDerivedSchema | AnyObjectVirtualSchema | AnyObjectKey
            | AnyObjectName => AnyTypeKind::AnyObject,
        }
    }

    pub fn source(self) -> MappingSource {
        use IntMappingType::*;
        match self {
            UserPlainSchema | GroupPlainSchema | AnyObjectPlainSchema => {
                MappingSource::Schema(SchemaKind::Plain)
            }
            UserDerivedSchema | GroupDerivedSchema | AnyObjectDerivedSchema => {
                MappingSource::Schema(SchemaKind::Derived)
            }
            UserVirtualSchema | GroupVirtualSchema | AnyObjectVirtualSchema => {
                MappingSource::Schema(SchemaKind::Virtual)
            }
            UserKey | GroupKey | AnyObjectKey => MappingSource::Key,
            Username | GroupName | AnyObjectName => MappingSource::Name,
            Password => MappingSource::Password,
        }
    }

    pub fn is_virtual(self) -> bool {
        self.source() == MappingSource::Schema(SchemaKind::Virtual)
    }
}

fn never_mandatory() -> String {
    NEVER_MANDATORY.to_string()
}

/// One internal/external attribute correlation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingItem {
    pub int_attr_name: String,
    pub int_mapping_type: IntMappingType,
    pub ext_attr_name: String,
    #[serde(default = "never_mandatory")]
    pub mandatory_condition: String,
    #[serde(default, rename = "accountid")]
    pub accountid: bool,
    #[serde(default)]
    pub password: bool,
    pub purpose: MappingPurpose,
}

impl MappingItem {
    pub fn new(
        int_attr_name: impl Into<String>,
        int_mapping_type: IntMappingType,
        ext_attr_name: impl Into<String>,
        purpose: MappingPurpose,
    ) -> Self {
        MappingItem {
            int_attr_name: int_attr_name.into(),
            int_mapping_type,
            ext_attr_name: ext_attr_name.into(),
            mandatory_condition: never_mandatory(),
            accountid: false,
            password: int_mapping_type == IntMappingType::Password,
            purpose,
        }
    }

    pub fn as_account_id(mut self) -> Self {
        self.accountid = true;
        self
    }

    pub fn mandatory_when(mut self, condition: impl Into<String>) -> Self {
        self.mandatory_condition = condition.into();
        self
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        let invalid = |reason: String| Err(CoreError::InvalidMapping { reason });

        if self.accountid && self.int_mapping_type.is_virtual() {
            return invalid(format!(
                "virtual attribute '{}' cannot be the account id",
                self.int_attr_name
            ));
        }
        if self.accountid && self.password {
            return invalid("a password item cannot be the account id".into());
        }
        if self.password != (self.int_mapping_type == IntMappingType::Password) {
            return invalid("only Password items carry the password flag".into());
        }
        if !self.password && self.ext_attr_name.is_empty() {
            return invalid(format!(
                "item '{}' has no external attribute name",
                self.int_attr_name
            ));
        }
        if matches!(self.int_mapping_type.source(), MappingSource::Schema(_)) && self.int_attr_name.is_empty() {
            return invalid("schema items need an internal attribute name".into());
        }
        Ok(())
    }
}

/// The items of one provision plus the optional account link expression.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mapping {
    #[serde(default)]
    items: Vec<MappingItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_link: Option<String>,
}

impl Mapping {
    pub fn new() -> Self {
        Mapping::default()
    }

    /// Builds a mapping, validating each item in order.
    pub fn with_items(items: impl IntoIterator<Item = MappingItem>) -> Result<Self, CoreError> {
        let mut mapping = Mapping::new();
        for item in items {
            mapping.add_item(item)?;
        }
        Ok(mapping)
    }

    pub fn add_item(&mut self, item: MappingItem) -> Result<(), CoreError> {
        item.validate()?;
        if item.accountid && self.items.iter().any(|i| i.accountid) {
            return Err(CoreError::InvalidMapping {
                reason: "a mapping has at most one account id item".into(),
            });
        }
        self.items.push(item);
        Ok(())
    }

    pub fn items(&self) -> &[MappingItem] {
        &self.items
    }

    pub fn account_id_item(&self) -> Option<&MappingItem> {
        self.items.iter().find(|i| i.accountid)
    }

    /// Re-checks a mapping built by deserialization.
    pub fn validate(&self) -> Result<(), CoreError> {
        Mapping::with_items(self.items.iter().cloned()).map(|_| ())
    }
}

/// How a resource provisions one any type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Provision {
    pub any_type: String,
    pub object_class: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mapping: Option<Mapping>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalResource {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connector: Option<String>,
    #[serde(default)]
    pub provisions: Vec<Provision>,
}

impl ExternalResource {
    pub fn new(key: impl Into<String>) -> Self {
        ExternalResource {
            key: key.into(),
            connector: None,
            provisions: Vec::new(),
        }
    }

    /// Adds or replaces the provision of `any_type`.
    pub fn provide(&mut self, any_type: impl Into<String>, object_class: impl Into<String>, mapping: Mapping) -> &mut Self {
        let any_type = any_type.into();
        self.provisions.retain(|p| p.any_type != any_type);
        self.provisions.push(Provision {
            any_type,
            object_class: object_class.into(),
            mapping: Some(mapping),
        });
        self
    }

    pub fn provision(&self, any_type: &str) -> Option<&Provision> {
        self.provisions.iter().find(|p| p.any_type == any_type)
    }

    pub fn mapping(&self, any_type: &str) -> Option<&Mapping> {
        self.provision(any_type).and_then(|p| p.mapping.as_ref())
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        for provision in &self.provisions {
            if let Some(mapping) = &provision.mapping {
                mapping.validate()?;
            }
        }
        Ok(())
    }
}

/// A connector attribute ready to be sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnAttribute {
    pub name: String,
    pub values: Vec<String>,
}

/// Items of the `any_type` mapping on `resource` taking part in a
/// `purpose` flow.
pub fn items_for(resource: &ExternalResource, any_type: &str, purpose: MappingPurpose) -> Vec<MappingItem> {
    resource
        .mapping(any_type)
        .map(|m| {
            m.items()
                .iter()
                .filter(|item| purpose.selects(item.purpose))
                .cloned()
                .collect()
        })
        .unwrap_or_default()
}

/// Like [`items_for`] with a purpose given by name; unknown names are
/// logged and select nothing.
pub fn items_for_purpose_name(resource: &ExternalResource, any_type: &str, purpose: &str) -> Vec<MappingItem> {
    match purpose.parse::<MappingPurpose>() {
        Ok(purpose) => items_for(resource, any_type, purpose),
        Err(e) => {
            error!(resource = %resource.key, purpose = %purpose, "{}", e);
            Vec::new()
        }
    }
}

pub fn account_id_item(resource: &ExternalResource, any_type: &str) -> Option<MappingItem> {
    resource
        .mapping(any_type)
        .and_then(|m| m.account_id_item())
        .cloned()
}

pub fn account_link(resource: &ExternalResource, any_type: &str) -> Option<String> {
    resource
        .mapping(any_type)
        .and_then(|m| m.account_link.clone())
}

/// Items for `purpose` plus a copy of the account id item mapped to
/// [`UID`], for correlating by connector identifier.
pub fn uid_to_mapping_items(resource: &ExternalResource, any_type: &str, purpose: MappingPurpose) -> Vec<MappingItem> {
    let mut items = items_for(resource, any_type, purpose);
    if let Some(mut uid) = account_id_item(resource, any_type) {
        uid.ext_attr_name = UID.to_string();
        uid.accountid = false;
        items.push(uid);
    }
    items
}

#[cfg(test)]
mod tests {
    use super::*;

    const PURPOSES: [MappingPurpose; 4] = [
        MappingPurpose::Synchronization,
        MappingPurpose::Propagation,
        MappingPurpose::Both,
        MappingPurpose::None,
    ];

    fn resource() -> ExternalResource {
        let mapping = Mapping::with_items([
            MappingItem::new("username", IntMappingType::Username, "uid", MappingPurpose::Both).as_account_id(),
            MappingItem::new("email", IntMappingType::UserPlainSchema, "mail", MappingPurpose::Propagation),
            MappingItem::new("phone", IntMappingType::UserPlainSchema, "tel", MappingPurpose::Synchronization),
            MappingItem::new("notes", IntMappingType::UserPlainSchema, "notes", MappingPurpose::None),
            MappingItem::new("password", IntMappingType::Password, "", MappingPurpose::Both),
        ])
        .unwrap();
        let mut r = ExternalResource::new("ldap");
        r.provide("USER", "__ACCOUNT__", mapping);
        r
    }

    fn ext_names(items: &[MappingItem]) -> Vec<&str> {
        items.iter().map(|i| i.ext_attr_name.as_str()).collect()
    }

    #[test]
    fn purpose_filter_table() {
        let r = resource();
        assert_eq!(
            ext_names(&items_for(&r, "USER", MappingPurpose::Synchronization)),
            vec!["uid", "tel", ""]
        );
        assert_eq!(
            ext_names(&items_for(&r, "USER", MappingPurpose::Propagation)),
            vec!["uid", "mail", ""]
        );
        assert_eq!(
            ext_names(&items_for(&r, "USER", MappingPurpose::Both)),
            vec!["uid", "mail", "tel", ""]
        );
        assert_eq!(ext_names(&items_for(&r, "USER", MappingPurpose::None)), vec!["notes"]);
    }

    #[test]
    fn both_is_everything_but_none_and_none_is_exactly_none() {
        for flow in PURPOSES {
            for item in PURPOSES {
                if flow == MappingPurpose::Both {
                    assert_eq!(flow.selects(item), item != MappingPurpose::None);
                }
                if flow == MappingPurpose::None {
                    assert_eq!(flow.selects(item), item == MappingPurpose::None);
                }
            }
        }
    }

    #[test]
    fn unknown_purpose_name_yields_empty() {
        let r = resource();
        assert!(items_for_purpose_name(&r, "USER", "PULL").is_empty());
        assert_eq!(items_for_purpose_name(&r, "USER", "none").len(), 1);
    }

    #[test]
    fn lookups_are_scoped_by_any_type() {
        let mut r = resource();
        let mut group_mapping = Mapping::with_items([MappingItem::new(
            "name",
            IntMappingType::GroupName,
            "cn",
            MappingPurpose::Both,
        )
        .as_account_id()])
        .unwrap();
        group_mapping.account_link = Some("'cn=' + name".into());
        r.provide("GROUP", "__GROUP__", group_mapping);

        assert_eq!(account_id_item(&r, "USER").unwrap().ext_attr_name, "uid");
        assert_eq!(account_id_item(&r, "GROUP").unwrap().ext_attr_name, "cn");
        assert_eq!(account_link(&r, "GROUP").as_deref(), Some("'cn=' + name"));
        assert!(account_link(&r, "USER").is_none());
        assert!(account_id_item(&r, "PRINTER").is_none());
        assert!(items_for(&r, "PRINTER", MappingPurpose::Both).is_empty());
    }

    #[test]
    fn uid_items_append_account_id_copy() {
        let r = resource();
        let items = uid_to_mapping_items(&r, "USER", MappingPurpose::Propagation);
        let uid = items.last().unwrap();
        assert_eq!(uid.ext_attr_name, UID);
        assert!(!uid.accountid);
        assert_eq!(uid.int_attr_name, "username");
        assert_eq!(items.len(), 4);
    }

    #[test]
    fn virtual_account_id_rejected() {
        let item = MappingItem::new("alias", IntMappingType::UserVirtualSchema, "alias", MappingPurpose::Both)
            .as_account_id();
        assert!(matches!(item.validate(), Err(CoreError::InvalidMapping { .. })));
    }

    #[test]
    fn password_account_id_rejected() {
        let item = MappingItem::new("password", IntMappingType::Password, "", MappingPurpose::Both).as_account_id();
        let mut mapping = Mapping::new();
        assert!(matches!(mapping.add_item(item), Err(CoreError::InvalidMapping { .. })));
        assert!(mapping.items().is_empty());
    }

    #[test]
    fn second_account_id_rejected() {
        let mut mapping = Mapping::new();
        mapping
            .add_item(MappingItem::new("username", IntMappingType::Username, "uid", MappingPurpose::Both).as_account_id())
            .unwrap();
        let err = mapping
            .add_item(MappingItem::new("email", IntMappingType::UserPlainSchema, "mail", MappingPurpose::Both).as_account_id())
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidMapping { .. }));
    }

    #[test]
    fn password_flag_must_match_type() {
        let mut item = MappingItem::new("email", IntMappingType::UserPlainSchema, "mail", MappingPurpose::Both);
        item.password = true;
        assert!(item.validate().is_err());
    }

    #[test]
    fn item_wire_contract() {
        let json = r#"{
            "intAttrName": "email",
            "intMappingType": "UserPlainSchema",
            "extAttrName": "mail",
            "mandatoryCondition": "true",
            "accountid": false,
            "password": false,
            "purpose": "PROPAGATION"
        }"#;
        let item: MappingItem = serde_json::from_str(json).unwrap();
        assert_eq!(item.purpose, MappingPurpose::Propagation);
        assert_eq!(item.int_mapping_type.kind(), AnyTypeKind::User);
        let back = serde_json::to_value(&item).unwrap();
        assert_eq!(back["accountid"], false);
        assert_eq!(back["intAttrName"], "email");
    }

    #[test]
    fn deserialized_resource_is_revalidated() {
        let json = r#"{
            "key": "bad",
            "provisions": [{
                "anyType": "USER",
                "objectClass": "__ACCOUNT__",
                "mapping": {"items": [{
                    "intAttrName": "alias",
                    "intMappingType": "UserVirtualSchema",
                    "extAttrName": "alias",
                    "accountid": true,
                    "purpose": "BOTH"
                }]}
            }]
        }"#;
        let resource: ExternalResource = serde_json::from_str(json).unwrap();
        assert!(resource.validate().is_err());
    }
}
