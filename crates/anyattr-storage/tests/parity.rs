//! Every scenario runs against both backends; the observable results must
//! match.

use anyattr_core::mapping::items_for;
use anyattr_core::{
    Any, AnyKey, AnyType, AnyTypeClass, AnyTypeKind, AttrSchemaType, AttrValue, CoreError, ExternalResource,
    IntMappingType, Mapping, MappingItem, MappingPurpose, PlainAttr, PlainSchema, Schema, SchemaRegistry, TypedValue,
    Unused,
};
use anyattr_storage::{open_store, AttrStore, StorageConfig, StorageError, StorageKind, StoreUsage};

const KINDS: [StorageKind; 2] = [StorageKind::Relational, StorageKind::Graph];

fn store(kind: StorageKind) -> Box<dyn AttrStore> {
    open_store(&StorageConfig::in_memory(kind)).unwrap()
}

/// Catalog with `email` (unique) and `phone` (multivalue), saved to both
/// the store and the returned registry.
fn catalog(store: &mut dyn AttrStore) -> SchemaRegistry {
    let registry = SchemaRegistry::new();
    let schemas = [
        PlainSchema::new("email", AttrSchemaType::String).unique(),
        PlainSchema::new("phone", AttrSchemaType::String).multivalue(),
    ];
    for schema in schemas {
        registry.define(schema.clone(), &Unused).unwrap();
        store.save_schema(&Schema::Plain(schema)).unwrap();
    }
    registry
}

fn attr(registry: &SchemaRegistry, owner: &Any, schema: &str, values: &[&str]) -> PlainAttr {
    let mut attr = PlainAttr::new(owner.key())
        .with_schema(registry.require_plain(schema).unwrap())
        .unwrap();
    for v in values {
        attr.restore_value(AttrValue::string(*v)).unwrap();
    }
    attr
}

fn user_with_email(registry: &SchemaRegistry, name: &str, email: &str) -> Any {
    let mut user = Any::user(name, "/");
    let email = attr(registry, &user, "email", &[email]);
    user.restore_plain_attr(email).unwrap();
    user
}

#[test]
fn saved_owners_load_back_equal() {
    for kind in KINDS {
        let mut store = store(kind);
        let registry = catalog(store.as_mut());
        let mut user = user_with_email(&registry, "ann", "ann@example.org");
        let phone = attr(&registry, &user, "phone", &["555-1", "555-2"]);
        user.restore_plain_attr(phone).unwrap();
        user.set_status(Some("active".into()));
        store.save_any(&user).unwrap();

        let loaded = store.load_any(user.key(), &registry).unwrap();
        assert_eq!(loaded, user, "{kind}");
        assert_eq!(loaded.plain_attr("phone").unwrap().values_as_strings(), vec!["555-1", "555-2"]);
    }
}

#[test]
fn unique_values_cannot_be_shared() {
    for kind in KINDS {
        let mut store = store(kind);
        let registry = catalog(store.as_mut());
        let ann = user_with_email(&registry, "ann", "same@example.org");
        store.save_any(&ann).unwrap();
        // resaving the holder is not a conflict
        store.save_any(&ann).unwrap();

        let bob = user_with_email(&registry, "bob", "same@example.org");
        match store.save_any(&bob) {
            Err(StorageError::Duplicate { schema, value }) => {
                assert_eq!(schema, "email");
                assert_eq!(value, "same@example.org");
            }
            other => panic!("{kind}: expected Duplicate, got {:?}", other),
        }
        assert!(matches!(
            store.load_any(bob.key(), &registry),
            Err(StorageError::AnyNotFound(_))
        ));

        let email = registry.require_plain("email").unwrap();
        assert_eq!(
            store
                .find_by_unique_value(&email, &AttrValue::string("same@example.org"))
                .unwrap(),
            Some(ann.key())
        );
    }
}

#[test]
fn uniqueness_survives_a_pattern_change() {
    for kind in KINDS {
        let mut store = store(kind);
        let registry = SchemaRegistry::new();
        let plain = PlainSchema::new("badge", AttrSchemaType::Long).unique().with_pattern("#");
        registry.define(plain.clone(), &Unused).unwrap();
        store.save_schema(&Schema::Plain(plain)).unwrap();

        let badge = |owner: &Any| {
            let mut attr = PlainAttr::new(owner.key())
                .with_schema(registry.require_plain("badge").unwrap())
                .unwrap();
            attr.restore_value(AttrValue::from_typed(TypedValue::Long(1000))).unwrap();
            attr
        };
        let mut ann = Any::user("ann", "/");
        ann.restore_plain_attr(badge(&ann)).unwrap();
        store.save_any(&ann).unwrap();

        // only the rendering changes, so existing values stay valid
        let regrouped = PlainSchema::new("badge", AttrSchemaType::Long).unique().with_pattern("#,##0");
        registry.define(regrouped.clone(), &StoreUsage(store.as_ref())).unwrap();
        store.save_schema(&Schema::Plain(regrouped)).unwrap();

        let mut bob = Any::user("bob", "/");
        bob.restore_plain_attr(badge(&bob)).unwrap();
        match store.save_any(&bob) {
            Err(StorageError::Duplicate { schema, value }) => {
                assert_eq!(schema, "badge");
                assert_eq!(value, "1000", "{kind}");
            }
            other => panic!("{kind}: expected Duplicate, got {:?}", other),
        }

        let schema = registry.require_plain("badge").unwrap();
        let thousand = AttrValue::from_typed(TypedValue::Long(1000));
        assert_eq!(store.find_by_unique_value(&schema, &thousand).unwrap(), Some(ann.key()), "{kind}");
        assert_eq!(store.find_by_plain_attr_value(&schema, &thousand).unwrap(), vec![ann.key()]);
    }
}

#[test]
fn deleting_a_group_drops_memberships_and_their_attributes() {
    for kind in KINDS {
        let mut store = store(kind);
        let registry = catalog(store.as_mut());
        let group = Any::group("staff", "/");
        store.save_any(&group).unwrap();

        let mut user = Any::user("ann", "/");
        let membership = user.add_membership(group.key()).unwrap();
        let direct = attr(&registry, &user, "phone", &["111"]);
        user.restore_plain_attr(direct).unwrap();
        let mut overlay = PlainAttr::for_membership(user.key(), membership)
            .with_schema(registry.require_plain("phone").unwrap())
            .unwrap();
        overlay.restore_value(AttrValue::string("222")).unwrap();
        user.restore_plain_attr(overlay).unwrap();
        store.save_any(&user).unwrap();

        assert_eq!(store.find_members(group.key()).unwrap(), vec![user.key()]);
        assert_eq!(store.plain_attr_count("phone").unwrap(), 2);

        store.delete_any(group.key()).unwrap();
        let loaded = store.load_any(user.key(), &registry).unwrap();
        assert!(loaded.memberships().is_empty(), "{kind}");
        assert_eq!(loaded.plain_attr("phone").unwrap().values_as_strings(), vec!["111"]);
        assert_eq!(store.plain_attr_count("phone").unwrap(), 1);
        assert!(store.find_members(group.key()).unwrap().is_empty());
    }
}

#[test]
fn membership_requires_an_existing_group() {
    for kind in KINDS {
        let mut store = store(kind);
        let ghost = AnyKey::generate();
        let mut user = Any::user("ann", "/");
        user.add_membership(ghost).unwrap();
        match store.save_any(&user) {
            Err(StorageError::AnyNotFound(key)) => assert_eq!(key, ghost),
            other => panic!("{kind}: expected AnyNotFound, got {:?}", other),
        }
    }
}

#[test]
fn deleting_a_schema_removes_its_attributes() {
    for kind in KINDS {
        let mut store = store(kind);
        let registry = catalog(store.as_mut());
        let mut user = user_with_email(&registry, "ann", "ann@example.org");
        let phone = attr(&registry, &user, "phone", &["555"]);
        user.restore_plain_attr(phone).unwrap();
        store.save_any(&user).unwrap();

        // the type is frozen while attributes exist
        let retyped = PlainSchema::new("phone", AttrSchemaType::Long);
        match registry.define(retyped, &StoreUsage(store.as_ref())) {
            Err(CoreError::SchemaInUse { .. }) => {}
            other => panic!("{kind}: expected SchemaInUse, got {:?}", other),
        }

        store.delete_schema("phone").unwrap();
        assert_eq!(store.plain_attr_count("phone").unwrap(), 0);
        let loaded = store.load_any(user.key(), &registry).unwrap();
        assert!(loaded.plain_attr("phone").is_none());
        assert!(loaded.plain_attr("email").is_some());

        match store.delete_schema("phone") {
            Err(StorageError::SchemaNotFound(key)) => assert_eq!(key, "phone"),
            other => panic!("{kind}: expected SchemaNotFound, got {:?}", other),
        }
    }
}

#[test]
fn lookups_agree_across_backends() {
    let mut answers = Vec::new();
    for kind in KINDS {
        let mut store = store(kind);
        let registry = catalog(store.as_mut());
        store.save_resource(&ExternalResource::new("ldap")).unwrap();

        let mut users = Vec::new();
        for (name, phone) in [("ann", "555"), ("bob", "555"), ("cid", "777")] {
            let mut user = Any::user(name, "/");
            let attr = attr(&registry, &user, "phone", &[phone]);
            user.restore_plain_attr(attr).unwrap();
            if name != "cid" {
                user.add_resource("ldap");
            }
            store.save_any(&user).unwrap();
            users.push(user.key());
        }
        users.sort();

        let phone = registry.require_plain("phone").unwrap();
        let by_value = store
            .find_by_plain_attr_value(&phone, &AttrValue::string("555"))
            .unwrap();
        let by_resource = store.find_by_resource("ldap").unwrap();
        let listed: Vec<AnyKey> = store
            .list_anys(Some(AnyTypeKind::User))
            .unwrap()
            .into_iter()
            .map(|s| s.key)
            .collect();
        assert_eq!(listed, users, "{kind}");
        assert!(store.list_anys(Some(AnyTypeKind::Group)).unwrap().is_empty());

        store.delete_resource("ldap").unwrap();
        assert!(store.find_by_resource("ldap").unwrap().is_empty());

        // keys are random per run, so compare shapes through names
        let names = |keys: &[AnyKey]| -> Vec<String> {
            let mut names: Vec<String> = keys
                .iter()
                .map(|k| store.load_any(*k, &registry).unwrap().name().to_string())
                .collect();
            names.sort();
            names
        };
        answers.push((names(&by_value), names(&by_resource)));
    }
    assert_eq!(answers[0], answers[1]);
    assert_eq!(answers[0].0, vec!["ann", "bob"]);
    assert_eq!(answers[0].1, vec!["ann", "bob"]);
}

#[test]
fn registry_loads_from_the_catalog() {
    for kind in KINDS {
        let mut store = store(kind);
        store.save_class(&AnyTypeClass::new("person")).unwrap();
        store
            .save_any_type(&AnyType::new("PRINTER", AnyTypeKind::AnyObject).with_classes(&["person"]))
            .unwrap();
        store
            .save_schema(&Schema::Plain(
                PlainSchema::new("nick", AttrSchemaType::String).in_class("person"),
            ))
            .unwrap();

        let registry = store.load_registry().unwrap();
        assert_eq!(registry.require_plain("nick").unwrap().key, "nick");

        store.delete_class("person").unwrap();
        let registry = store.load_registry().unwrap();
        let nick = registry.plain("nick").unwrap();
        assert_eq!(nick.any_type_class, None, "{kind}");
        let printer = store
            .list_any_types()
            .unwrap()
            .into_iter()
            .find(|t| t.key == "PRINTER")
            .unwrap();
        assert!(printer.classes.is_empty());
    }
}

#[test]
fn stored_mappings_filter_by_purpose() {
    for kind in KINDS {
        let mut store = store(kind);
        let mapping = Mapping::with_items([
            MappingItem::new("username", IntMappingType::Username, "uid", MappingPurpose::Both).as_account_id(),
            MappingItem::new("email", IntMappingType::UserPlainSchema, "mail", MappingPurpose::Propagation),
            MappingItem::new("phone", IntMappingType::UserPlainSchema, "tel", MappingPurpose::Synchronization),
            MappingItem::new("note", IntMappingType::UserPlainSchema, "note", MappingPurpose::None),
        ])
        .unwrap();
        let mut resource = ExternalResource::new("ldap");
        resource.provide(AnyType::USER, "__ACCOUNT__", mapping);
        store.save_resource(&resource).unwrap();

        let loaded = store.load_resource("ldap").unwrap();
        assert_eq!(loaded, resource);
        let ext = |purpose| -> Vec<String> {
            items_for(&loaded, AnyType::USER, purpose)
                .into_iter()
                .map(|i| i.ext_attr_name)
                .collect()
        };
        assert_eq!(ext(MappingPurpose::Propagation), vec!["uid", "mail"]);
        assert_eq!(ext(MappingPurpose::Synchronization), vec!["uid", "tel"]);
        assert_eq!(ext(MappingPurpose::None), vec!["note"]);
    }
}

#[test]
fn file_backed_stores_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    for (kind, file) in [(StorageKind::Relational, "attrs.db"), (StorageKind::Graph, "attrs.json")] {
        let config = StorageConfig::at(kind, dir.path().join(file));
        let user = {
            let mut store = open_store(&config).unwrap();
            let registry = catalog(store.as_mut());
            let user = user_with_email(&registry, "ann", "ann@example.org");
            store.save_any(&user).unwrap();
            user
        };

        let store = open_store(&config).unwrap();
        let registry = store.load_registry().unwrap();
        let loaded = store.load_any(user.key(), &registry).unwrap();
        assert_eq!(loaded, user, "{kind}");
    }
}
