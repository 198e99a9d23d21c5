//! Attribute owners: users, groups and any objects, with their
//! memberships and membership attribute overlays.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::allowed::AllowedSchemas;
use crate::attr::{AttrWriteContext, PlainAttr};
use crate::derived::DerivedAttrEvaluator;
use crate::error::CoreError;
use crate::id::{AnyKey, MembershipKey};
use crate::registry::SchemaRegistry;
use crate::schema::{AnyType, PlainSchema};
use crate::types::{AnyTypeKind, SchemaKind};

/// Looks groups up by key, for membership resolution.
pub trait GroupResolver {
    fn find_group(&self, key: AnyKey) -> Option<Any>;
}

impl GroupResolver for HashMap<AnyKey, Any> {
    fn find_group(&self, key: AnyKey) -> Option<Any> {
        self.get(&key)
            .filter(|a| a.kind() == AnyTypeKind::Group)
            .cloned()
    }
}

impl GroupResolver for BTreeMap<AnyKey, Any> {
    fn find_group(&self, key: AnyKey) -> Option<Any> {
        self.get(&key)
            .filter(|a| a.kind() == AnyTypeKind::Group)
            .cloned()
    }
}

/// Auxiliary classes a group grants, in membership overlays, to members
/// of one any type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeExtension {
    pub any_type: String,
    pub aux_classes: Vec<String>,
}

impl TypeExtension {
    pub fn new(any_type: impl Into<String>, aux_classes: &[&str]) -> Self {
        TypeExtension {
            any_type: any_type.into(),
            aux_classes: aux_classes.iter().map(|c| c.to_string()).collect(),
        }
    }
}

/// Kind-specific state of an owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnyDetails {
    User {
        username: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        password: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cipher_algorithm: Option<String>,
    },
    Group {
        name: String,
        #[serde(default)]
        type_extensions: Vec<TypeExtension>,
    },
    AnyObject {
        name: String,
    },
}

/// Link between a groupable owner and a group, with its own attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct Membership {
    pub key: MembershipKey,
    pub group: AnyKey,
    plain_attrs: IndexMap<String, PlainAttr>,
}

impl Membership {
    pub fn new(key: MembershipKey, group: AnyKey) -> Self {
        Membership {
            key,
            group,
            plain_attrs: IndexMap::new(),
        }
    }

    pub fn plain_attr(&self, schema: &str) -> Option<&PlainAttr> {
        self.plain_attrs.get(schema)
    }

    pub fn plain_attrs(&self) -> impl Iterator<Item = &PlainAttr> {
        self.plain_attrs.values()
    }
}

/// A provisionable entity carrying attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct Any {
    key: AnyKey,
    any_type: String,
    realm: String,
    status: Option<String>,
    creator: Option<String>,
    creation_date: Option<DateTime<Utc>>,
    last_modifier: Option<String>,
    last_change_date: Option<DateTime<Utc>>,
    details: AnyDetails,
    aux_classes: Vec<String>,
    resources: Vec<String>,
    plain_attrs: IndexMap<String, PlainAttr>,
    memberships: Vec<Membership>,
}

impl Any {
    /// Builds an owner with an explicit key, as storage backends do.
    pub fn with_key(key: AnyKey, any_type: impl Into<String>, realm: impl Into<String>, details: AnyDetails) -> Self {
        Any {
            key,
            any_type: any_type.into(),
            realm: realm.into(),
            status: None,
            creator: None,
            creation_date: None,
            last_modifier: None,
            last_change_date: None,
            details,
            aux_classes: Vec::new(),
            resources: Vec::new(),
            plain_attrs: IndexMap::new(),
            memberships: Vec::new(),
        }
    }

    pub fn user(username: impl Into<String>, realm: impl Into<String>) -> Self {
        Any::with_key(
            AnyKey::generate(),
            AnyType::USER,
            realm,
            AnyDetails::User {
                username: username.into(),
                password: None,
                cipher_algorithm: None,
            },
        )
    }

    pub fn group(name: impl Into<String>, realm: impl Into<String>) -> Self {
        Any::with_key(
            AnyKey::generate(),
            AnyType::GROUP,
            realm,
            AnyDetails::Group {
                name: name.into(),
                type_extensions: Vec::new(),
            },
        )
    }

    pub fn any_object(any_type: impl Into<String>, name: impl Into<String>, realm: impl Into<String>) -> Self {
        Any::with_key(
            AnyKey::generate(),
            any_type,
            realm,
            AnyDetails::AnyObject { name: name.into() },
        )
    }

    pub fn key(&self) -> AnyKey {
        self.key
    }

    pub fn kind(&self) -> AnyTypeKind {
        match self.details {
            AnyDetails::User { .. } => AnyTypeKind::User,
            AnyDetails::Group { .. } => AnyTypeKind::Group,
            AnyDetails::AnyObject { .. } => AnyTypeKind::AnyObject,
        }
    }

    pub fn any_type(&self) -> &str {
        &self.any_type
    }

    pub fn realm(&self) -> &str {
        &self.realm
    }

    pub fn set_realm(&mut self, realm: impl Into<String>) {
        self.realm = realm.into();
    }

    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    pub fn set_status(&mut self, status: Option<String>) {
        self.status = status;
    }

    pub fn details(&self) -> &AnyDetails {
        &self.details
    }

    /// Username for users, name otherwise.
    pub fn name(&self) -> &str {
        match &self.details {
            AnyDetails::User { username, .. } => username,
            AnyDetails::Group { name, .. } | AnyDetails::AnyObject { name } => name,
        }
    }

    pub fn label(&self) -> String {
        format!("{} '{}' ({})", self.any_type, self.name(), self.key)
    }

    /// Stores an already-encoded password. No-op for non-users.
    pub fn set_password(&mut self, encoded: Option<String>, algorithm: Option<String>) {
        if let AnyDetails::User {
            password,
            cipher_algorithm,
            ..
        } = &mut self.details
        {
            *password = encoded;
            *cipher_algorithm = algorithm;
        }
    }

    // -- system information ------------------------------------------------

    pub fn creator(&self) -> Option<&str> {
        self.creator.as_deref()
    }

    pub fn creation_date(&self) -> Option<DateTime<Utc>> {
        self.creation_date
    }

    pub fn last_modifier(&self) -> Option<&str> {
        self.last_modifier.as_deref()
    }

    pub fn last_change_date(&self) -> Option<DateTime<Utc>> {
        self.last_change_date
    }

    pub fn set_creation(&mut self, creator: Option<String>, date: Option<DateTime<Utc>>) {
        self.creator = creator;
        self.creation_date = date;
    }

    pub fn set_last_change(&mut self, modifier: Option<String>, date: Option<DateTime<Utc>>) {
        self.last_modifier = modifier;
        self.last_change_date = date;
    }

    /// Records `who` as creator on first call and as last modifier always.
    pub fn touch(&mut self, who: &str) {
        let now = Utc::now();
        if self.creator.is_none() {
            self.creator = Some(who.to_string());
            self.creation_date = Some(now);
        }
        self.last_modifier = Some(who.to_string());
        self.last_change_date = Some(now);
    }

    // -- classes and resources ---------------------------------------------

    pub fn aux_classes(&self) -> &[String] {
        &self.aux_classes
    }

    pub fn add_aux_class(&mut self, class: impl Into<String>) {
        let class = class.into();
        if !self.aux_classes.contains(&class) {
            self.aux_classes.push(class);
        }
    }

    pub fn remove_aux_class(&mut self, class: &str) -> bool {
        let before = self.aux_classes.len();
        self.aux_classes.retain(|c| c != class);
        before != self.aux_classes.len()
    }

    /// Directly assigned resources.
    pub fn resources(&self) -> &[String] {
        &self.resources
    }

    pub fn add_resource(&mut self, resource: impl Into<String>) -> bool {
        let resource = resource.into();
        if self.resources.contains(&resource) {
            return false;
        }
        self.resources.push(resource);
        true
    }

    pub fn remove_resource(&mut self, resource: &str) -> bool {
        let before = self.resources.len();
        self.resources.retain(|r| r != resource);
        before != self.resources.len()
    }

    /// Direct resources plus those of every group this owner belongs to.
    pub fn all_resources(&self, groups: &dyn GroupResolver) -> BTreeSet<String> {
        let mut all: BTreeSet<String> = self.resources.iter().cloned().collect();
        for membership in &self.memberships {
            if let Some(group) = groups.find_group(membership.group) {
                all.extend(group.resources.iter().cloned());
            }
        }
        all
    }

    // -- group type extensions ---------------------------------------------

    pub fn type_extensions(&self) -> &[TypeExtension] {
        match &self.details {
            AnyDetails::Group { type_extensions, .. } => type_extensions,
            _ => &[],
        }
    }

    pub fn type_extension(&self, any_type: &str) -> Option<&TypeExtension> {
        self.type_extensions().iter().find(|e| e.any_type == any_type)
    }

    /// Adds or replaces the extension for its any type.
    pub fn set_type_extension(&mut self, extension: TypeExtension) -> Result<(), CoreError> {
        match &mut self.details {
            AnyDetails::Group { type_extensions, .. } => {
                type_extensions.retain(|e| e.any_type != extension.any_type);
                type_extensions.push(extension);
                Ok(())
            }
            _ => Err(CoreError::InvalidState(format!(
                "type extensions are only defined on groups, not on {}",
                self.label()
            ))),
        }
    }

    // -- memberships -------------------------------------------------------

    pub fn memberships(&self) -> &[Membership] {
        &self.memberships
    }

    pub fn membership(&self, key: MembershipKey) -> Option<&Membership> {
        self.memberships.iter().find(|m| m.key == key)
    }

    pub fn membership_for_group(&self, group: AnyKey) -> Option<&Membership> {
        self.memberships.iter().find(|m| m.group == group)
    }

    /// Joins `group`, returning the existing membership key if already a
    /// member.
    pub fn add_membership(&mut self, group: AnyKey) -> Result<MembershipKey, CoreError> {
        if !self.kind().is_groupable() {
            return Err(CoreError::InvalidState(format!(
                "{} cannot be a group member",
                self.label()
            )));
        }
        if group == self.key {
            return Err(CoreError::InvalidState("an owner cannot be its own member".into()));
        }
        if let Some(existing) = self.membership_for_group(group) {
            return Ok(existing.key);
        }
        let key = MembershipKey::generate();
        self.memberships.push(Membership::new(key, group));
        Ok(key)
    }

    /// Re-attaches a stored membership.
    pub fn restore_membership(&mut self, membership: Membership) -> Result<(), CoreError> {
        if !self.kind().is_groupable() {
            return Err(CoreError::InvalidState(format!(
                "{} cannot be a group member",
                self.label()
            )));
        }
        self.memberships.retain(|m| m.key != membership.key);
        self.memberships.push(membership);
        Ok(())
    }

    /// Leaves a group, dropping the membership's attribute overlay.
    pub fn remove_membership(&mut self, key: MembershipKey) -> Option<Membership> {
        let index = self.memberships.iter().position(|m| m.key == key)?;
        Some(self.memberships.remove(index))
    }

    pub fn remove_membership_for_group(&mut self, group: AnyKey) -> Option<Membership> {
        let index = self.memberships.iter().position(|m| m.group == group)?;
        Some(self.memberships.remove(index))
    }

    // -- plain attributes --------------------------------------------------

    /// The direct attribute for `schema`.
    pub fn plain_attr(&self, schema: &str) -> Option<&PlainAttr> {
        self.plain_attrs.get(schema)
    }

    /// The attribute for `schema` in one membership's overlay only.
    pub fn plain_attr_in(&self, schema: &str, membership: MembershipKey) -> Option<&PlainAttr> {
        self.membership(membership)
            .and_then(|m| m.plain_attr(schema))
    }

    /// The direct attribute for `schema` (if any) plus one attribute per
    /// membership overlay holding it.
    pub fn plain_attrs_for(&self, schema: &str) -> Vec<&PlainAttr> {
        self.plain_attrs
            .get(schema)
            .into_iter()
            .chain(self.memberships.iter().filter_map(|m| m.plain_attr(schema)))
            .collect()
    }

    /// Direct attributes in insertion order.
    pub fn plain_attrs(&self) -> impl Iterator<Item = &PlainAttr> {
        self.plain_attrs.values()
    }

    /// Direct attributes followed by every overlay's attributes.
    pub fn all_plain_attrs(&self) -> impl Iterator<Item = &PlainAttr> {
        self.plain_attrs
            .values()
            .chain(self.memberships.iter().flat_map(|m| m.plain_attrs.values()))
    }

    /// Adds `attr` after checking that its schema is allowed where it goes.
    ///
    /// Returns `false` without changes if an attribute for the schema is
    /// already present there.
    pub fn add_plain_attr(&mut self, attr: PlainAttr, allowed: &AllowedSchemas) -> Result<bool, CoreError> {
        let schema = attr
            .schema_key()
            .ok_or_else(|| CoreError::InvalidState("owner/schema must precede values".into()))?
            .to_string();
        if !allowed.allows(SchemaKind::Plain, &schema, attr.membership()) {
            return Err(CoreError::UnallowedSchema {
                schema,
                owner: allowed.owner_label(attr.membership()),
            });
        }
        self.insert_plain_attr(attr, schema)
    }

    /// Adds a stored attribute without the allowed-schema check, as done
    /// when loading from storage.
    pub fn restore_plain_attr(&mut self, attr: PlainAttr) -> Result<bool, CoreError> {
        let schema = attr
            .schema_key()
            .ok_or_else(|| CoreError::InvalidState("owner/schema must precede values".into()))?
            .to_string();
        self.insert_plain_attr(attr, schema)
    }

    fn insert_plain_attr(&mut self, attr: PlainAttr, schema: String) -> Result<bool, CoreError> {
        if attr.owner() != self.key {
            return Err(CoreError::InvalidState(format!(
                "attribute '{}' belongs to {}, not {}",
                schema,
                attr.owner(),
                self.key
            )));
        }
        let target = match attr.membership() {
            None => &mut self.plain_attrs,
            Some(key) => {
                let label = self.label();
                let membership = self
                    .memberships
                    .iter_mut()
                    .find(|m| m.key == key)
                    .ok_or_else(|| {
                        CoreError::InvalidState(format!("membership {} not found on {}", key, label))
                    })?;
                &mut membership.plain_attrs
            }
        };
        if target.contains_key(&schema) {
            debug!(schema = %schema, "attribute already set, ignoring");
            return Ok(false);
        }
        target.insert(schema, attr);
        Ok(true)
    }

    /// Replaces the values of `schema` (directly or in `membership`) with
    /// `raws`, creating the attribute when missing. An empty `raws`
    /// removes the attribute.
    pub fn set_plain_values(
        &mut self,
        schema: Arc<PlainSchema>,
        membership: Option<MembershipKey>,
        raws: &[&str],
        ctx: &AttrWriteContext<'_>,
    ) -> Result<(), CoreError> {
        if raws.is_empty() {
            self.remove_plain_attr(&schema.key, membership);
            return Ok(());
        }

        let mut attr = match membership {
            None => PlainAttr::new(self.key),
            Some(m) => PlainAttr::for_membership(self.key, m),
        }
        .with_schema(Arc::clone(&schema))?;
        for raw in raws {
            attr.add_value(raw, ctx)?;
        }

        self.remove_plain_attr(&schema.key, membership);
        self.add_plain_attr(attr, ctx.allowed)?;
        Ok(())
    }

    pub fn remove_plain_attr(&mut self, schema: &str, membership: Option<MembershipKey>) -> Option<PlainAttr> {
        match membership {
            None => self.plain_attrs.shift_remove(schema),
            Some(key) => self
                .memberships
                .iter_mut()
                .find(|m| m.key == key)
                .and_then(|m| m.plain_attrs.shift_remove(schema)),
        }
    }

    /// Drops every attribute (direct and overlay) of `schema`.
    pub fn purge_schema(&mut self, schema: &str) -> usize {
        let mut removed = usize::from(self.plain_attrs.shift_remove(schema).is_some());
        for membership in &mut self.memberships {
            removed += usize::from(membership.plain_attrs.shift_remove(schema).is_some());
        }
        removed
    }

    /// Plain schemas allowed directly whose mandatory condition holds but
    /// which carry no value.
    pub fn missing_mandatory(
        &self,
        registry: &SchemaRegistry,
        allowed: &AllowedSchemas,
        derived: &DerivedAttrEvaluator,
    ) -> Vec<String> {
        let attrs: Vec<&PlainAttr> = self.plain_attrs().collect();
        allowed
            .for_self
            .plain
            .iter()
            .filter_map(|key| registry.plain(key))
            .filter(|schema| derived.condition_holds(&schema.mandatory_condition, self, &attrs))
            .filter(|schema| self.plain_attr(&schema.key).map_or(true, PlainAttr::is_empty))
            .map(|schema| schema.key.clone())
            .collect()
    }
}
