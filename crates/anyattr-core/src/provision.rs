//! Outbound attribute preparation: turns an owner into the connector
//! attributes its resource mapping asks for.

use tracing::debug;

use crate::allowed::AllowedSchemas;
use crate::any::{Any, GroupResolver};
use crate::attr::PlainAttr;
use crate::derived::DerivedAttrEvaluator;
use crate::error::CoreError;
use crate::mapping::{self, ConnAttribute, ExternalResource, MappingItem, MappingPurpose, MappingSource};
use crate::registry::SchemaRegistry;
use crate::types::SchemaKind;
use crate::virtual_attr::VirtualAttrBridge;

/// Collaborators used to resolve item values.
#[derive(Clone, Copy)]
pub struct ProvisionContext<'a> {
    pub registry: &'a SchemaRegistry,
    pub groups: &'a dyn GroupResolver,
    pub derived: &'a DerivedAttrEvaluator,
    pub virtuals: &'a VirtualAttrBridge,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreparedAttributes {
    /// Connector object key, from the account id item.
    pub conn_object_key: Option<String>,
    pub attributes: Vec<ConnAttribute>,
    /// External names of items whose mandatory condition holds but which
    /// produced no value.
    pub missing_mandatory: Vec<String>,
}

impl PreparedAttributes {
    pub fn attribute(&self, name: &str) -> Option<&ConnAttribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    fn merge(&mut self, name: &str, values: Vec<String>) {
        match self.attributes.iter_mut().find(|a| a.name == name) {
            Some(existing) => existing.values.extend(values),
            None => self.attributes.push(ConnAttribute {
                name: name.to_string(),
                values,
            }),
        }
    }
}

/// Prepares the propagation attributes of `owner` for `resource`.
///
/// `password` is the clear-text password to send, when a password change
/// is being propagated; without it no `__PASSWORD__` attribute is built.
pub fn prepare_attributes(
    owner: &Any,
    resource: &ExternalResource,
    password: Option<&str>,
    ctx: &ProvisionContext<'_>,
) -> Result<PreparedAttributes, CoreError> {
    let mut prepared = PreparedAttributes::default();
    let items = mapping::items_for(resource, owner.any_type(), MappingPurpose::Propagation);
    if items.is_empty() {
        return Ok(prepared);
    }

    let allowed = AllowedSchemas::compute(owner, ctx.registry, ctx.groups)?;
    let direct: Vec<&PlainAttr> = owner.plain_attrs().collect();

    for item in &items {
        let values = item_values(item, owner, password, &allowed, &direct, ctx);

        if values.is_empty() && ctx.derived.condition_holds(&item.mandatory_condition, owner, &direct) {
            prepared.missing_mandatory.push(item.ext_attr_name.clone());
        }

        if item.accountid {
            prepared.conn_object_key = values.first().cloned();
            prepared.merge(&item.ext_attr_name, values);
        } else if item.password {
            if !values.is_empty() {
                prepared.merge(mapping::PASSWORD, values);
            }
        } else {
            prepared.merge(&item.ext_attr_name, values);
        }
    }

    let link = mapping::account_link(resource, owner.any_type())
        .map(|expression| ctx.derived.expression(&expression, owner, &direct))
        .filter(|name| !name.is_empty());
    if let Some(name) = link.or_else(|| prepared.conn_object_key.clone()) {
        prepared.merge(mapping::NAME, vec![name]);
    }

    Ok(prepared)
}

fn item_values(
    item: &MappingItem,
    owner: &Any,
    password: Option<&str>,
    allowed: &AllowedSchemas,
    direct: &[&PlainAttr],
    ctx: &ProvisionContext<'_>,
) -> Vec<String> {
    if item.int_mapping_type.kind() != owner.kind() {
        debug!(item = %item.int_attr_name, "item targets another owner kind");
        return Vec::new();
    }

    match item.int_mapping_type.source() {
        MappingSource::Key => vec![owner.key().to_string()],
        MappingSource::Name => vec![owner.name().to_string()],
        MappingSource::Password => password.map(|p| vec![p.to_string()]).unwrap_or_default(),
        MappingSource::Schema(SchemaKind::Plain) => owner
            .plain_attrs_for(&item.int_attr_name)
            .into_iter()
            .flat_map(|attr| attr.values_as_strings())
            .collect(),
        MappingSource::Schema(SchemaKind::Derived) => {
            if !allowed.allows(SchemaKind::Derived, &item.int_attr_name, None) {
                return Vec::new();
            }
            ctx.registry
                .derived(&item.int_attr_name)
                .map(|schema| ctx.derived.evaluate(&schema, owner, direct))
                .filter(|value| !value.is_empty())
                .into_iter()
                .collect()
        }
        MappingSource::Schema(SchemaKind::Virtual) => {
            if !allowed.allows(SchemaKind::Virtual, &item.int_attr_name, None) {
                return Vec::new();
            }
            ctx.registry
                .virtual_schema(&item.int_attr_name)
                .map(|schema| ctx.virtuals.values(&schema, owner, ctx.groups))
                .unwrap_or_default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    use crate::attr::{AttrWriteContext, BasicValidator};
    use crate::codec::TypeCodec;
    use crate::derived::ExpressionEvaluator;
    use crate::id::AnyKey;
    use crate::mapping::{IntMappingType, Mapping};
    use crate::registry::Unused;
    use crate::schema::{AnyType, AnyTypeClass, DerSchema, PlainSchema, VirSchema};
    use crate::types::{AnyTypeKind, AttrSchemaType};
    use crate::virtual_attr::VirAttrSource;

    /// Supports `name` and `'lit' + name` forms.
    struct Tiny;

    impl ExpressionEvaluator for Tiny {
        fn evaluate(&self, expression: &str, owner: &Any, attrs: &[&PlainAttr]) -> Result<String, CoreError> {
            let lookup = |name: &str| -> String {
                if name == "username" {
                    return owner.name().to_string();
                }
                attrs
                    .iter()
                    .find(|a| a.schema_key() == Some(name))
                    .and_then(|a| a.values_as_strings().into_iter().next())
                    .unwrap_or_default()
            };
            Ok(expression
                .split('+')
                .map(|part| {
                    let part = part.trim();
                    match part.strip_prefix('\'').and_then(|p| p.strip_suffix('\'')) {
                        Some(literal) => literal.to_string(),
                        None => lookup(part),
                    }
                })
                .collect())
        }
    }

    struct Fixed;

    impl VirAttrSource for Fixed {
        fn read(&self, _resource: &str, ext_attr_name: &str, _owner: &Any) -> Result<Vec<String>, CoreError> {
            Ok(vec![format!("{}-1", ext_attr_name), format!("{}-2", ext_attr_name)])
        }
    }

    struct Fixture {
        registry: SchemaRegistry,
        derived: DerivedAttrEvaluator,
        virtuals: VirtualAttrBridge,
        groups: HashMap<AnyKey, Any>,
    }

    fn fixture() -> Fixture {
        let registry = SchemaRegistry::new();
        registry.define_class(AnyTypeClass::new("BaseUser"));
        registry.define_class(AnyTypeClass::new("Membership"));
        registry
            .define_any_type(AnyType::new("USER", AnyTypeKind::User).with_classes(&["BaseUser"]))
            .unwrap();
        for schema in [
            PlainSchema::new("firstName", AttrSchemaType::String).in_class("BaseUser"),
            PlainSchema::new("email", AttrSchemaType::String).in_class("BaseUser"),
            PlainSchema::new("title", AttrSchemaType::String).in_class("Membership"),
        ] {
            registry.define(schema, &Unused).unwrap();
        }
        registry
            .define(DerSchema::new("cn", "firstName + ' x'").in_class("BaseUser"), &Unused)
            .unwrap();
        registry
            .define(VirSchema::new("alias", "alias", "ldap").in_class("BaseUser"), &Unused)
            .unwrap();

        Fixture {
            registry,
            derived: DerivedAttrEvaluator::new(Arc::new(Tiny)),
            virtuals: VirtualAttrBridge::new(Arc::new(Fixed)),
            groups: HashMap::new(),
        }
    }

    fn ldap(account_link: Option<&str>) -> ExternalResource {
        let mut mapping = Mapping::with_items([
            MappingItem::new("username", IntMappingType::Username, "uid", MappingPurpose::Both).as_account_id(),
            MappingItem::new("email", IntMappingType::UserPlainSchema, "mail", MappingPurpose::Propagation)
                .mandatory_when("true"),
            MappingItem::new("firstName", IntMappingType::UserPlainSchema, "givenName", MappingPurpose::Both),
            MappingItem::new("title", IntMappingType::UserPlainSchema, "title", MappingPurpose::Propagation),
            MappingItem::new("cn", IntMappingType::UserDerivedSchema, "cn", MappingPurpose::Propagation),
            MappingItem::new("alias", IntMappingType::UserVirtualSchema, "alias", MappingPurpose::Propagation),
            MappingItem::new("phone", IntMappingType::UserPlainSchema, "tel", MappingPurpose::Synchronization),
            MappingItem::new("password", IntMappingType::Password, "", MappingPurpose::Both),
            MappingItem::new("name", IntMappingType::GroupName, "group", MappingPurpose::Both),
        ])
        .unwrap();
        mapping.account_link = account_link.map(str::to_string);
        let mut resource = ExternalResource::new("ldap");
        resource.provide("USER", "__ACCOUNT__", mapping);
        resource
    }

    fn set(f: &Fixture, user: &mut Any, schema: &str, membership: Option<crate::id::MembershipKey>, raw: &str) {
        let codec = TypeCodec::default();
        let allowed = AllowedSchemas::compute(user, &f.registry, &f.groups).unwrap();
        let ctx = AttrWriteContext {
            codec: &codec,
            allowed: &allowed,
            validator: &BasicValidator,
        };
        let schema = f.registry.plain(schema).unwrap();
        user.set_plain_values(schema, membership, &[raw], &ctx).unwrap();
    }

    #[test]
    fn prepares_propagation_attributes() {
        let mut f = fixture();
        let mut group = Any::group("staff", "/");
        group
            .set_type_extension(crate::any::TypeExtension::new("USER", &["Membership"]))
            .unwrap();
        let mut user = Any::user("ann", "/");
        user.add_resource("ldap");
        let m = user.add_membership(group.key()).unwrap();
        f.groups.insert(group.key(), group);

        set(&f, &mut user, "firstName", None, "Ann");
        set(&f, &mut user, "title", Some(m), "lead");

        let ctx = ProvisionContext {
            registry: &f.registry,
            groups: &f.groups,
            derived: &f.derived,
            virtuals: &f.virtuals,
        };
        let prepared = prepare_attributes(&user, &ldap(None), None, &ctx).unwrap();

        assert_eq!(prepared.conn_object_key.as_deref(), Some("ann"));
        assert_eq!(prepared.attribute("uid").unwrap().values, vec!["ann"]);
        assert_eq!(prepared.attribute("givenName").unwrap().values, vec!["Ann"]);
        // membership overlay values take part in provisioning
        assert_eq!(prepared.attribute("title").unwrap().values, vec!["lead"]);
        assert_eq!(prepared.attribute("cn").unwrap().values, vec!["Ann x"]);
        assert_eq!(prepared.attribute("alias").unwrap().values.len(), 2);
        assert!(prepared.attribute("tel").is_none());
        assert!(prepared.attribute(mapping::PASSWORD).is_none());
        assert!(prepared.attribute("group").unwrap().values.is_empty());
        assert_eq!(prepared.attribute(mapping::NAME).unwrap().values, vec!["ann"]);
        assert_eq!(prepared.missing_mandatory, vec!["mail"]);
    }

    #[test]
    fn password_and_account_link() {
        let f = fixture();
        let mut user = Any::user("ann", "/");
        set(&f, &mut user, "email", None, "ann@x.com");

        let ctx = ProvisionContext {
            registry: &f.registry,
            groups: &f.groups,
            derived: &f.derived,
            virtuals: &f.virtuals,
        };
        let prepared = prepare_attributes(&user, &ldap(Some("'uid=' + username")), Some("s3cret"), &ctx).unwrap();

        assert_eq!(prepared.attribute(mapping::PASSWORD).unwrap().values, vec!["s3cret"]);
        assert_eq!(prepared.attribute(mapping::NAME).unwrap().values, vec!["uid=ann"]);
        assert!(prepared.missing_mandatory.is_empty());
        // not on the resource: no virtual values
        assert!(prepared.attribute("alias").unwrap().values.is_empty());
    }

    #[test]
    fn unmapped_any_type_prepares_nothing() {
        let f = fixture();
        let printer = Any::any_object("PRINTER", "hp", "/");
        let ctx = ProvisionContext {
            registry: &f.registry,
            groups: &f.groups,
            derived: &f.derived,
            virtuals: &f.virtuals,
        };
        let prepared = prepare_attributes(&printer, &ldap(None), None, &ctx).unwrap();
        assert_eq!(prepared, PreparedAttributes::default());
    }
}
