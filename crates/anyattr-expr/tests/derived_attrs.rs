//! Derived attributes and mandatory conditions evaluated through the
//! core evaluator with real owners.

use std::collections::HashMap;
use std::sync::Arc;

use anyattr_core::{
    AllowedSchemas, Any, AnyKey, AnyType, AnyTypeClass, AnyTypeKind, AttrSchemaType, AttrWriteContext, BasicValidator,
    CoreError, DerSchema, DerivedAttrEvaluator, ExpressionEvaluator, PlainAttr, PlainSchema, SchemaRegistry,
    TypeCodec, Unused,
};
use anyattr_expr::JexlEvaluator;

fn registry() -> SchemaRegistry {
    let registry = SchemaRegistry::new();
    registry.define_class(AnyTypeClass::new("person"));
    registry
        .define_any_type(AnyType::new(AnyType::USER, AnyTypeKind::User).with_classes(&["person"]))
        .unwrap();
    for key in ["firstName", "surname", "phone"] {
        let mut schema = PlainSchema::new(key, AttrSchemaType::String).in_class("person");
        if key == "phone" {
            schema = schema.multivalue();
        }
        registry.define(schema, &Unused).unwrap();
    }
    registry
        .define(PlainSchema::new("age", AttrSchemaType::Long).in_class("person"), &Unused)
        .unwrap();
    registry
        .define(
            DerSchema::new("fullName", "firstName + ' ' + surname").in_class("person"),
            &Unused,
        )
        .unwrap();
    registry
}

fn ann(registry: &SchemaRegistry, values: &[(&str, Vec<&str>)]) -> (Any, AllowedSchemas) {
    let mut owner = Any::user("ann", "/");
    let groups: HashMap<AnyKey, Any> = HashMap::new();
    let allowed = AllowedSchemas::compute(&owner, registry, &groups).unwrap();
    let codec = TypeCodec::default();
    let ctx = AttrWriteContext {
        codec: &codec,
        allowed: &allowed,
        validator: &BasicValidator,
    };
    for (key, raws) in values {
        let schema = registry.require_plain(key).unwrap();
        owner.set_plain_values(schema, None, raws.as_slice(), &ctx).unwrap();
    }
    (owner, allowed)
}

fn derived() -> DerivedAttrEvaluator {
    DerivedAttrEvaluator::new(Arc::new(JexlEvaluator::default()))
}

#[test]
fn missing_surname_leaves_trailing_space() {
    let registry = registry();
    let (owner, allowed) = ann(&registry, &[("firstName", vec!["Ann"])]);
    let values = derived().evaluate_all(&owner, &registry, &allowed);
    assert_eq!(values.get("fullName").map(String::as_str), Some("Ann "));
}

#[test]
fn full_name_from_both_parts() {
    let registry = registry();
    let (owner, allowed) = ann(&registry, &[("firstName", vec!["Ann"]), ("surname", vec!["Lee"])]);
    let values = derived().evaluate_all(&owner, &registry, &allowed);
    assert_eq!(values["fullName"], "Ann Lee");
}

#[test]
fn typed_values_bind_as_their_string_form() {
    let registry = registry();
    let (owner, _) = ann(&registry, &[("age", vec!["41"]), ("phone", vec!["1", "2"])]);
    let attrs: Vec<&PlainAttr> = owner.plain_attrs().collect();
    let evaluator = JexlEvaluator::default();
    assert_eq!(evaluator.evaluate("age + 1", &owner, &attrs).unwrap(), "411");
    assert_eq!(evaluator.evaluate("age * 2", &owner, &attrs).unwrap(), "82");
    assert_eq!(evaluator.evaluate("size(phone)", &owner, &attrs).unwrap(), "2");
    assert_eq!(evaluator.evaluate("username + '@' + realm", &owner, &attrs).unwrap(), "ann@/");
}

#[test]
fn mandatory_condition_expressions() {
    let registry = registry();
    let (owner, _) = ann(&registry, &[("firstName", vec!["Ann"])]);
    let attrs: Vec<&PlainAttr> = owner.plain_attrs().collect();
    let derived = derived();
    assert!(derived.condition_holds("!empty(firstName)", &owner, &attrs));
    assert!(!derived.condition_holds("empty(firstName)", &owner, &attrs));
    assert!(derived.condition_holds("realm == '/'", &owner, &attrs));
}

#[test]
fn syntax_errors_surface_as_evaluation_errors() {
    let owner = Any::user("ann", "/");
    match JexlEvaluator::default().evaluate("firstName +", &owner, &[]) {
        Err(CoreError::Evaluation { expression, .. }) => assert_eq!(expression, "firstName +"),
        other => panic!("expected Evaluation, got {:?}", other),
    }
    // the derived evaluator swallows the failure
    let value = derived().evaluate(&DerSchema::new("broken", "firstName +"), &owner, &[]);
    assert_eq!(value, "");
}

#[test]
fn runaway_nesting_degrades_to_empty() {
    let owner = Any::user("ann", "/");
    let expression = format!("{}firstName{}", "(".repeat(200_000), ")".repeat(200_000));
    let derived = derived();
    assert_eq!(derived.evaluate(&DerSchema::new("deep", expression.as_str()), &owner, &[]), "");
    // a failing condition counts as not mandatory
    let condition = format!("{}true", "!".repeat(200_000));
    assert!(!derived.condition_holds(&condition, &owner, &[]));
}
