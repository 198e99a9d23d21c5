//! Variable bindings for an evaluation.

use indexmap::IndexMap;

use anyattr_core::{Any, AnyDetails, PlainAttr};

use crate::value::Value;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Context {
    vars: IndexMap<String, Value>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.vars.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Binds the owner's fields, then each attribute by schema key.
    ///
    /// Attributes shadow owner fields of the same name. A single value
    /// binds as a string, several as a list, none as `""`.
    pub fn for_owner(owner: &Any, attrs: &[&PlainAttr]) -> Self {
        let mut ctx = Context::new();
        let text = |s: &str| Value::String(s.to_string());
        let opt = |s: Option<&str>| s.map(|s| Value::String(s.to_string())).unwrap_or(Value::Null);

        ctx.set("key", Value::String(owner.key().to_string()));
        ctx.set("anyType", text(owner.any_type()));
        ctx.set("realm", text(owner.realm()));
        ctx.set("status", opt(owner.status()));
        ctx.set("creator", opt(owner.creator()));
        ctx.set("lastModifier", opt(owner.last_modifier()));
        match owner.details() {
            AnyDetails::User { username, .. } => ctx.set("username", text(username)),
            AnyDetails::Group { name, .. } | AnyDetails::AnyObject { name } => ctx.set("name", text(name)),
        }

        for attr in attrs {
            let Some(schema) = attr.schema_key() else {
                continue;
            };
            let mut values: Vec<Value> = attr.values_as_strings().into_iter().map(Value::String).collect();
            let bound = match values.len() {
                0 => Value::String(String::new()),
                1 => values.remove(0),
                _ => Value::List(values),
            };
            ctx.set(schema, bound);
        }
        ctx
    }
}
