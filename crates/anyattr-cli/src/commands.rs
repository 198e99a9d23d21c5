//! Subcommand implementations. Each `run_*` works against an open store and
//! returns the JSON document to print.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use clap::Args;
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use anyattr_core::mapping::items_for_purpose_name;
use anyattr_core::provision::{prepare_attributes, ProvisionContext};
use anyattr_core::virtual_attr::VirAttrSource;
use anyattr_core::{
    AllowedSchemas, Any, AnyKey, AnyType, AnyTypeClass, AnyTypeKind, AttrSchemaType, AttrWriteContext, BasicValidator,
    CipherConfig, CoreError, DerSchema, DerivedAttrEvaluator, ExternalResource, PlainAttr, PlainSchema, Schema,
    SchemaRegistry, TypeCodec, TypeExtension, VirSchema, VirtualAttrBridge,
};
use anyattr_expr::JexlEvaluator;
use anyattr_storage::{AttrStore, StoreUsage};

use crate::error::CliError;

// ---------------------------------------------------------------------------
// Arguments
// ---------------------------------------------------------------------------

#[derive(Args, Debug, Clone)]
pub struct PlainArgs {
    /// Schema key.
    pub key: String,

    /// Value type: String, Long, Double, Boolean, Date, Enum, Binary, Encrypted.
    #[arg(short = 't', long = "type", default_value = "String")]
    pub ty: AttrSchemaType,

    /// Class the schema belongs to.
    #[arg(short, long)]
    pub class: Option<String>,

    #[arg(long)]
    pub multivalue: bool,

    #[arg(long)]
    pub unique: bool,

    #[arg(long)]
    pub readonly: bool,

    /// Number or date conversion pattern.
    #[arg(short, long)]
    pub pattern: Option<String>,

    /// Mandatory condition: `true`, `false` or an expression.
    #[arg(long)]
    pub mandatory: Option<String>,

    /// Allowed values of an Enum schema.
    #[arg(long = "enum", value_delimiter = ',')]
    pub enumeration: Vec<String>,

    #[arg(long)]
    pub cipher_algorithm: Option<String>,

    #[arg(long)]
    pub secret_key: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct DerivedArgs {
    pub key: String,

    /// Expression over the owner's attributes.
    pub expression: String,

    #[arg(short, long)]
    pub class: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct VirtualArgs {
    pub key: String,

    /// Resource the values are read from.
    #[arg(short, long)]
    pub resource: String,

    /// Attribute name on the resource.
    #[arg(short, long)]
    pub ext_attr: String,

    #[arg(short, long)]
    pub class: Option<String>,

    #[arg(long)]
    pub readonly: bool,
}

#[derive(Args, Debug, Clone)]
pub struct CreateArgs {
    /// Any type key, such as USER or GROUP.
    #[arg(short = 't', long = "type")]
    pub any_type: String,

    /// Username, group name or object name.
    pub name: String,

    #[arg(short, long, default_value = "/")]
    pub realm: String,

    #[arg(long)]
    pub status: Option<String>,

    /// Auxiliary classes.
    #[arg(long = "aux", value_delimiter = ',')]
    pub aux_classes: Vec<String>,

    #[arg(long = "resource", value_delimiter = ',')]
    pub resources: Vec<String>,
}

#[derive(Args, Debug, Clone)]
pub struct SetArgs {
    pub key: AnyKey,

    pub schema: String,

    /// New raw values; none removes the attribute.
    pub values: Vec<String>,

    /// Set the values in the membership of this group.
    #[arg(short, long)]
    pub group: Option<AnyKey>,
}

#[derive(Args, Debug, Clone)]
pub struct CodecArgs {
    #[arg(short = 't', long = "type")]
    pub ty: AttrSchemaType,

    pub raw: String,

    #[arg(short, long)]
    pub pattern: Option<String>,

    #[arg(long)]
    pub cipher_algorithm: Option<String>,

    #[arg(long)]
    pub secret_key: Option<String>,
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

fn define_schema(store: &mut dyn AttrStore, schema: Schema) -> Result<Value, CliError> {
    let registry = store.load_registry()?;
    registry.define(schema.clone(), &StoreUsage(&*store))?;
    store.save_schema(&schema)?;
    info!(schema = %schema.key(), kind = schema.kind().as_str(), "schema defined");
    Ok(serde_json::to_value(&schema)?)
}

pub fn run_define_plain(store: &mut dyn AttrStore, args: PlainArgs) -> Result<Value, CliError> {
    let mut schema = PlainSchema::new(args.key, args.ty);
    schema.any_type_class = args.class;
    schema.multivalue = args.multivalue;
    schema.unique_constraint = args.unique;
    schema.readonly = args.readonly;
    schema.conversion_pattern = args.pattern;
    if let Some(condition) = args.mandatory {
        schema.mandatory_condition = condition;
    }
    schema.enumeration_values = args.enumeration;
    schema.cipher_algorithm = args.cipher_algorithm;
    schema.secret_key = args.secret_key;
    define_schema(store, Schema::Plain(schema))
}

pub fn run_define_derived(store: &mut dyn AttrStore, args: DerivedArgs) -> Result<Value, CliError> {
    let mut schema = DerSchema::new(args.key, args.expression);
    schema.any_type_class = args.class;
    define_schema(store, Schema::Derived(schema))
}

pub fn run_define_virtual(store: &mut dyn AttrStore, args: VirtualArgs) -> Result<Value, CliError> {
    let mut schema = VirSchema::new(args.key, args.ext_attr, args.resource);
    schema.any_type_class = args.class;
    schema.readonly = args.readonly;
    define_schema(store, Schema::Virtual(schema))
}

pub fn run_schema_list(store: &dyn AttrStore) -> Result<Value, CliError> {
    Ok(serde_json::to_value(store.list_schemas()?)?)
}

pub fn run_schema_delete(store: &mut dyn AttrStore, key: &str) -> Result<Value, CliError> {
    store.delete_schema(key)?;
    Ok(json!({ "deleted": key }))
}

pub fn run_class_define(store: &mut dyn AttrStore, key: &str) -> Result<Value, CliError> {
    let class = AnyTypeClass::new(key);
    store.save_class(&class)?;
    Ok(serde_json::to_value(&class)?)
}

pub fn run_any_type_define(
    store: &mut dyn AttrStore,
    key: &str,
    kind: AnyTypeKind,
    classes: &[String],
) -> Result<Value, CliError> {
    let reserved = match key {
        AnyType::USER => Some(AnyTypeKind::User),
        AnyType::GROUP => Some(AnyTypeKind::Group),
        _ => None,
    };
    if reserved.is_some_and(|k| k != kind) {
        return Err(CliError::BadRequest(format!("'{}' is reserved for kind {}", key, key)));
    }
    let any_type = AnyType {
        key: key.to_string(),
        kind,
        classes: classes.to_vec(),
    };
    store.save_any_type(&any_type)?;
    Ok(serde_json::to_value(&any_type)?)
}

pub fn run_resource_define(store: &mut dyn AttrStore, file: &Path) -> Result<Value, CliError> {
    let text = fs::read_to_string(file)
        .map_err(|e| CliError::BadRequest(format!("cannot read '{}': {}", file.display(), e)))?;
    let resource: ExternalResource = serde_json::from_str(&text)?;
    store.save_resource(&resource)?;
    Ok(serde_json::to_value(&resource)?)
}

pub fn run_resource_list(store: &dyn AttrStore) -> Result<Value, CliError> {
    Ok(serde_json::to_value(store.list_resources()?)?)
}

// ---------------------------------------------------------------------------
// Owners
// ---------------------------------------------------------------------------

/// Virtual values need a live connector; without one every read fails and
/// the bridge reports no values.
struct NoConnector;

impl VirAttrSource for NoConnector {
    fn read(&self, resource: &str, _ext_attr_name: &str, _owner: &Any) -> Result<Vec<String>, CoreError> {
        Err(CoreError::InvalidState(format!("no connector configured for resource '{}'", resource)))
    }
}

/// Groups `any` is a member of, keyed for [`GroupResolver`](anyattr_core::GroupResolver) lookups.
fn groups_of(store: &dyn AttrStore, any: &Any, registry: &SchemaRegistry) -> Result<HashMap<AnyKey, Any>, CliError> {
    let mut groups = HashMap::new();
    for m in any.memberships() {
        groups.insert(m.group, store.load_any(m.group, registry)?);
    }
    Ok(groups)
}

fn attr_map<'a>(attrs: impl Iterator<Item = &'a PlainAttr>) -> Map<String, Value> {
    attrs
        .filter_map(|a| Some((a.schema_key()?.to_string(), json!(a.values_as_strings()))))
        .collect()
}

fn describe(store: &dyn AttrStore, any: &Any, registry: &SchemaRegistry) -> Result<Value, CliError> {
    let groups = groups_of(store, any, registry)?;
    let allowed = AllowedSchemas::compute(any, registry, &groups)?;
    let derived = DerivedAttrEvaluator::new(Arc::new(JexlEvaluator::default()));
    let virtuals = VirtualAttrBridge::new(Arc::new(NoConnector));

    let memberships: Vec<Value> = any
        .memberships()
        .iter()
        .map(|m| {
            json!({
                "key": m.key.to_string(),
                "group": m.group.to_string(),
                "plainAttrs": attr_map(m.plain_attrs()),
                "derivedAttrs": derived.evaluate_for_membership(any, m.key, registry, &allowed),
            })
        })
        .collect();

    Ok(json!({
        "key": any.key().to_string(),
        "anyType": any.any_type(),
        "name": any.name(),
        "realm": any.realm(),
        "status": any.status(),
        "creator": any.creator(),
        "lastModifier": any.last_modifier(),
        "auxClasses": any.aux_classes(),
        "resources": any.resources(),
        "plainAttrs": attr_map(any.plain_attrs()),
        "derivedAttrs": derived.evaluate_all(any, registry, &allowed),
        "virtualAttrs": virtuals.values_all(any, registry, &allowed, &groups),
        "memberships": memberships,
    }))
}

pub fn run_any_create(store: &mut dyn AttrStore, args: CreateArgs, actor: &str) -> Result<Value, CliError> {
    let registry = store.load_registry()?;
    let any_type = registry.any_type(&args.any_type)?;
    let mut any = match any_type.kind {
        AnyTypeKind::User => Any::user(args.name, args.realm),
        AnyTypeKind::Group => Any::group(args.name, args.realm),
        AnyTypeKind::AnyObject => Any::any_object(any_type.key, args.name, args.realm),
    };
    any.set_status(args.status);
    for class in args.aux_classes {
        any.add_aux_class(class);
    }
    for resource in args.resources {
        any.add_resource(resource);
    }
    any.touch(actor);
    store.save_any(&any)?;
    info!(any = %any.key(), any_type = %any.any_type(), "owner created");
    describe(&*store, &any, &registry)
}

pub fn run_any_show(store: &dyn AttrStore, key: AnyKey) -> Result<Value, CliError> {
    let registry = store.load_registry()?;
    let any = store.load_any(key, &registry)?;
    describe(store, &any, &registry)
}

pub fn run_any_list(store: &dyn AttrStore, kind: Option<AnyTypeKind>) -> Result<Value, CliError> {
    Ok(serde_json::to_value(store.list_anys(kind)?)?)
}

pub fn run_any_set(store: &mut dyn AttrStore, args: SetArgs, actor: &str) -> Result<Value, CliError> {
    let registry = store.load_registry()?;
    let mut any = store.load_any(args.key, &registry)?;
    let groups = groups_of(&*store, &any, &registry)?;
    let allowed = AllowedSchemas::compute(&any, &registry, &groups)?;

    let membership = match args.group {
        Some(group) => Some(
            any.membership_for_group(group)
                .map(|m| m.key)
                .ok_or_else(|| CliError::NotFound(format!("membership of {} in group {}", args.key, group)))?,
        ),
        None => None,
    };
    let schema = registry.require_plain(&args.schema)?;
    let codec = TypeCodec::default();
    let ctx = AttrWriteContext {
        codec: &codec,
        allowed: &allowed,
        validator: &BasicValidator,
    };
    let raws: Vec<&str> = args.values.iter().map(String::as_str).collect();
    any.set_plain_values(schema, membership, &raws, &ctx)?;
    any.touch(actor);
    store.save_any(&any)?;
    debug!(any = %any.key(), schema = %args.schema, values = raws.len(), "attribute written");
    describe(&*store, &any, &registry)
}

pub fn run_any_join(store: &mut dyn AttrStore, key: AnyKey, group: AnyKey, actor: &str) -> Result<Value, CliError> {
    let registry = store.load_registry()?;
    let mut any = store.load_any(key, &registry)?;
    if any.membership_for_group(group).is_none() {
        any.add_membership(group)?;
        any.touch(actor);
        store.save_any(&any)?;
    }
    describe(&*store, &any, &registry)
}

/// Lets members of `any_type` use `classes` inside their membership of
/// `group`.
pub fn run_any_extend(
    store: &mut dyn AttrStore,
    group: AnyKey,
    any_type: &str,
    classes: &[String],
    actor: &str,
) -> Result<Value, CliError> {
    let registry = store.load_registry()?;
    let mut any = store.load_any(group, &registry)?;
    let classes: Vec<&str> = classes.iter().map(String::as_str).collect();
    any.set_type_extension(TypeExtension::new(any_type, &classes))?;
    any.touch(actor);
    store.save_any(&any)?;
    describe(&*store, &any, &registry)
}

pub fn run_any_delete(store: &mut dyn AttrStore, key: AnyKey) -> Result<Value, CliError> {
    store.delete_any(key)?;
    Ok(json!({ "deleted": key.to_string() }))
}

// ---------------------------------------------------------------------------
// Codec and mapping
// ---------------------------------------------------------------------------

fn cipher(args: &CodecArgs) -> Option<CipherConfig> {
    match (&args.cipher_algorithm, &args.secret_key) {
        (Some(algorithm), Some(secret_key)) => Some(CipherConfig {
            algorithm: algorithm.clone(),
            secret_key: secret_key.clone(),
        }),
        _ => None,
    }
}

/// Parses `raw` with the pattern and shows the typed value with its
/// canonical rendering.
pub fn run_codec_parse(args: CodecArgs) -> Result<Value, CliError> {
    let codec = TypeCodec::default();
    let pattern = args.pattern.as_deref();
    let typed = codec.parse("cli", args.ty, &args.raw, pattern, cipher(&args).as_ref())?;
    Ok(json!({
        "type": args.ty.as_str(),
        "value": typed,
        "formatted": TypeCodec::format(&typed, pattern),
    }))
}

/// Parses `raw` in canonical form and renders it with the pattern.
pub fn run_codec_format(args: CodecArgs) -> Result<Value, CliError> {
    let codec = TypeCodec::default();
    let typed = codec.parse("cli", args.ty, &args.raw, None, cipher(&args).as_ref())?;
    Ok(json!({
        "type": args.ty.as_str(),
        "formatted": TypeCodec::format(&typed, args.pattern.as_deref()),
    }))
}

pub fn run_mapping_items(store: &dyn AttrStore, resource: &str, any_type: &str, purpose: &str) -> Result<Value, CliError> {
    let resource = store.load_resource(resource)?;
    Ok(serde_json::to_value(items_for_purpose_name(&resource, any_type, purpose))?)
}

/// Connector attributes `key` would be propagated with to `resource`.
pub fn run_mapping_prepare(
    store: &dyn AttrStore,
    key: AnyKey,
    resource: &str,
    password: Option<&str>,
) -> Result<Value, CliError> {
    let registry = store.load_registry()?;
    let any = store.load_any(key, &registry)?;
    let resource = store.load_resource(resource)?;
    let groups = groups_of(store, &any, &registry)?;
    let derived = DerivedAttrEvaluator::new(Arc::new(JexlEvaluator::default()));
    let virtuals = VirtualAttrBridge::new(Arc::new(NoConnector));
    let ctx = ProvisionContext {
        registry: &registry,
        groups: &groups,
        derived: &derived,
        virtuals: &virtuals,
    };
    let prepared = prepare_attributes(&any, &resource, password, &ctx)?;
    Ok(json!({
        "connObjectKey": prepared.conn_object_key,
        "attributes": prepared.attributes,
        "missingMandatory": prepared.missing_mandatory,
    }))
}
