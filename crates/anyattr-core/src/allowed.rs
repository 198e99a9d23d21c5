//! Which schemas an owner may carry, directly and per membership.
//!
//! Directly: the schemas in the classes of the owner's any type plus its
//! auxiliary classes. In a membership overlay: the schemas in the
//! auxiliary classes the group's type extension grants to the owner's
//! any type.

use std::collections::{BTreeMap, BTreeSet};

use crate::any::{Any, GroupResolver};
use crate::error::CoreError;
use crate::id::{AnyKey, MembershipKey};
use crate::registry::SchemaRegistry;
use crate::types::SchemaKind;

/// Schema keys per kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaSet {
    pub plain: BTreeSet<String>,
    pub derived: BTreeSet<String>,
    pub virtual_: BTreeSet<String>,
}

impl SchemaSet {
    fn from_classes<'a>(registry: &SchemaRegistry, classes: impl Iterator<Item = &'a str> + Clone) -> Self {
        SchemaSet {
            plain: registry.keys_in_classes(classes.clone(), SchemaKind::Plain),
            derived: registry.keys_in_classes(classes.clone(), SchemaKind::Derived),
            virtual_: registry.keys_in_classes(classes, SchemaKind::Virtual),
        }
    }

    pub fn keys(&self, kind: SchemaKind) -> &BTreeSet<String> {
        match kind {
            SchemaKind::Plain => &self.plain,
            SchemaKind::Derived => &self.derived,
            SchemaKind::Virtual => &self.virtual_,
        }
    }

    pub fn contains(&self, kind: SchemaKind, key: &str) -> bool {
        self.keys(kind).contains(key)
    }

    pub fn is_empty(&self) -> bool {
        self.plain.is_empty() && self.derived.is_empty() && self.virtual_.is_empty()
    }
}

/// The allowed schemas of one owner.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowedSchemas {
    /// Label used in error messages.
    pub owner: String,
    pub for_self: SchemaSet,
    /// Keyed by group.
    pub for_memberships: BTreeMap<AnyKey, SchemaSet>,
    pub membership_groups: BTreeMap<MembershipKey, AnyKey>,
}

impl AllowedSchemas {
    pub fn compute(
        owner: &Any,
        registry: &SchemaRegistry,
        groups: &dyn GroupResolver,
    ) -> Result<Self, CoreError> {
        let any_type = registry.any_type(owner.any_type())?;
        let classes = any_type
            .classes
            .iter()
            .chain(owner.aux_classes().iter())
            .map(String::as_str);
        let for_self = SchemaSet::from_classes(registry, classes);

        let mut for_memberships = BTreeMap::new();
        let mut membership_groups = BTreeMap::new();
        for membership in owner.memberships() {
            membership_groups.insert(membership.key, membership.group);
            let set = match groups.find_group(membership.group) {
                Some(group) => match group.type_extension(owner.any_type()) {
                    Some(ext) => SchemaSet::from_classes(registry, ext.aux_classes.iter().map(String::as_str)),
                    None => SchemaSet::default(),
                },
                None => SchemaSet::default(),
            };
            for_memberships.insert(membership.group, set);
        }

        Ok(AllowedSchemas {
            owner: owner.label(),
            for_self,
            for_memberships,
            membership_groups,
        })
    }

    /// Whether `key` may be set directly (`membership == None`) or in the
    /// given membership's overlay.
    pub fn allows(&self, kind: SchemaKind, key: &str, membership: Option<MembershipKey>) -> bool {
        match membership {
            None => self.for_self.contains(kind, key),
            Some(m) => self
                .membership_groups
                .get(&m)
                .and_then(|group| self.for_memberships.get(group))
                .map_or(false, |set| set.contains(kind, key)),
        }
    }

    pub fn for_membership(&self, membership: MembershipKey) -> Option<&SchemaSet> {
        self.membership_groups
            .get(&membership)
            .and_then(|group| self.for_memberships.get(group))
    }

    pub fn owner_label(&self, membership: Option<MembershipKey>) -> String {
        match membership {
            None => self.owner.clone(),
            Some(m) => format!("{} (membership {})", self.owner, m),
        }
    }
}
