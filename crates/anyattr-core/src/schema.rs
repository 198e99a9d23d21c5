//! Schema definitions: plain, derived and virtual, plus the classes and
//! any types that scope them.
//!
//! All definitions serialize with camelCase names; that is the contract the
//! administration layer produces and consumes.

use serde::{Deserialize, Serialize};

use crate::codec::CipherConfig;
use crate::error::CoreError;
use crate::types::{AnyTypeKind, AttrSchemaType, SchemaKind};

/// Mandatory condition meaning "never mandatory".
pub const NEVER_MANDATORY: &str = "false";

fn never_mandatory() -> String {
    NEVER_MANDATORY.to_string()
}

/// A stored, typed attribute definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlainSchema {
    pub key: String,
    #[serde(rename = "type")]
    pub ty: AttrSchemaType,
    #[serde(default = "never_mandatory")]
    pub mandatory_condition: String,
    #[serde(default)]
    pub multivalue: bool,
    #[serde(default)]
    pub unique_constraint: bool,
    #[serde(default)]
    pub readonly: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversion_pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enumeration_values: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enumeration_keys: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cipher_algorithm: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub any_type_class: Option<String>,
}

impl PlainSchema {
    /// A single-valued, optional schema of the given type.
    pub fn new(key: impl Into<String>, ty: AttrSchemaType) -> Self {
        PlainSchema {
            key: key.into(),
            ty,
            mandatory_condition: never_mandatory(),
            multivalue: false,
            unique_constraint: false,
            readonly: false,
            conversion_pattern: None,
            enumeration_values: Vec::new(),
            enumeration_keys: Vec::new(),
            secret_key: None,
            cipher_algorithm: None,
            mime_type: None,
            any_type_class: None,
        }
    }

    pub fn in_class(mut self, class: impl Into<String>) -> Self {
        self.any_type_class = Some(class.into());
        self
    }

    pub fn multivalue(mut self) -> Self {
        self.multivalue = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique_constraint = true;
        self
    }

    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.conversion_pattern = Some(pattern.into());
        self
    }

    pub fn mandatory_when(mut self, condition: impl Into<String>) -> Self {
        self.mandatory_condition = condition.into();
        self
    }

    pub fn with_enumeration(mut self, values: &[&str]) -> Self {
        self.enumeration_values = values.iter().map(|v| v.to_string()).collect();
        self
    }

    pub fn with_cipher(mut self, algorithm: impl Into<String>, secret_key: impl Into<String>) -> Self {
        self.cipher_algorithm = Some(algorithm.into());
        self.secret_key = Some(secret_key.into());
        self
    }

    pub fn cipher_config(&self) -> Option<CipherConfig> {
        match (&self.cipher_algorithm, &self.secret_key) {
            (Some(algorithm), Some(secret_key)) => Some(CipherConfig {
                algorithm: algorithm.clone(),
                secret_key: secret_key.clone(),
            }),
            _ => None,
        }
    }

    /// Checks the definition for combinations that can never hold values.
    pub fn validate(&self) -> Result<(), CoreError> {
        let invalid = |reason: &str| CoreError::InvalidSchema {
            key: self.key.clone(),
            reason: reason.to_string(),
        };

        validate_key(&self.key)?;
        if self.multivalue && self.unique_constraint {
            return Err(invalid("a unique schema cannot be multivalue"));
        }
        match self.ty {
            AttrSchemaType::Enum => {
                if self.enumeration_values.is_empty() {
                    return Err(invalid("enumeration values are required"));
                }
                if !self.enumeration_keys.is_empty()
                    && self.enumeration_keys.len() != self.enumeration_values.len()
                {
                    return Err(invalid("enumeration keys and values differ in length"));
                }
            }
            AttrSchemaType::Encrypted => {
                if self.secret_key.as_deref().map_or(true, str::is_empty) {
                    return Err(invalid("a secret key is required"));
                }
                if self.cipher_algorithm.as_deref().map_or(true, str::is_empty) {
                    return Err(invalid("a cipher algorithm is required"));
                }
            }
            _ => {}
        }
        Ok(())
    }
}

/// A computed attribute definition; its value is an expression over the
/// owner's plain attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DerSchema {
    pub key: String,
    pub expression: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub any_type_class: Option<String>,
}

impl DerSchema {
    pub fn new(key: impl Into<String>, expression: impl Into<String>) -> Self {
        DerSchema {
            key: key.into(),
            expression: expression.into(),
            any_type_class: None,
        }
    }

    pub fn in_class(mut self, class: impl Into<String>) -> Self {
        self.any_type_class = Some(class.into());
        self
    }
}

/// An attribute whose values live on an external resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirSchema {
    pub key: String,
    pub ext_attr_name: String,
    pub resource: String,
    /// Any type whose provision on `resource` serves this schema.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub any_type: Option<String>,
    #[serde(default)]
    pub readonly: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub any_type_class: Option<String>,
}

impl VirSchema {
    pub fn new(
        key: impl Into<String>,
        ext_attr_name: impl Into<String>,
        resource: impl Into<String>,
    ) -> Self {
        VirSchema {
            key: key.into(),
            ext_attr_name: ext_attr_name.into(),
            resource: resource.into(),
            any_type: None,
            readonly: false,
            any_type_class: None,
        }
    }

    pub fn in_class(mut self, class: impl Into<String>) -> Self {
        self.any_type_class = Some(class.into());
        self
    }

    pub fn readonly(mut self) -> Self {
        self.readonly = true;
        self
    }
}

/// Any schema, tagged by kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Schema {
    Plain(PlainSchema),
    Derived(DerSchema),
    Virtual(VirSchema),
}

impl Schema {
    pub fn key(&self) -> &str {
        match self {
            Schema::Plain(s) => &s.key,
            Schema::Derived(s) => &s.key,
            Schema::Virtual(s) => &s.key,
        }
    }

    pub fn kind(&self) -> SchemaKind {
        match self {
            Schema::Plain(_) => SchemaKind::Plain,
            Schema::Derived(_) => SchemaKind::Derived,
            Schema::Virtual(_) => SchemaKind::Virtual,
        }
    }

    pub fn any_type_class(&self) -> Option<&str> {
        match self {
            Schema::Plain(s) => s.any_type_class.as_deref(),
            Schema::Derived(s) => s.any_type_class.as_deref(),
            Schema::Virtual(s) => s.any_type_class.as_deref(),
        }
    }

    /// Derived and virtual schemas are always String typed.
    pub fn ty(&self) -> AttrSchemaType {
        match self {
            Schema::Plain(s) => s.ty,
            _ => AttrSchemaType::String,
        }
    }

    pub fn multivalue(&self) -> bool {
        match self {
            Schema::Plain(s) => s.multivalue,
            Schema::Derived(_) => false,
            Schema::Virtual(_) => true,
        }
    }

    pub fn unique_constraint(&self) -> bool {
        match self {
            Schema::Plain(s) => s.unique_constraint,
            _ => false,
        }
    }

    pub fn readonly(&self) -> bool {
        match self {
            Schema::Plain(s) => s.readonly,
            Schema::Derived(_) => false,
            Schema::Virtual(s) => s.readonly,
        }
    }

    pub fn mandatory_condition(&self) -> &str {
        match self {
            Schema::Plain(s) => &s.mandatory_condition,
            _ => NEVER_MANDATORY,
        }
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        match self {
            Schema::Plain(s) => s.validate(),
            Schema::Derived(s) => {
                validate_key(&s.key)?;
                if s.expression.trim().is_empty() {
                    return Err(CoreError::InvalidSchema {
                        key: s.key.clone(),
                        reason: "expression is required".into(),
                    });
                }
                Ok(())
            }
            Schema::Virtual(s) => {
                validate_key(&s.key)?;
                if s.ext_attr_name.is_empty() || s.resource.is_empty() {
                    return Err(CoreError::InvalidSchema {
                        key: s.key.clone(),
                        reason: "external attribute name and resource are required".into(),
                    });
                }
                Ok(())
            }
        }
    }
}

impl From<PlainSchema> for Schema {
    fn from(s: PlainSchema) -> Self {
        Schema::Plain(s)
    }
}

impl From<DerSchema> for Schema {
    fn from(s: DerSchema) -> Self {
        Schema::Derived(s)
    }
}

impl From<VirSchema> for Schema {
    fn from(s: VirSchema) -> Self {
        Schema::Virtual(s)
    }
}

fn validate_key(key: &str) -> Result<(), CoreError> {
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if valid {
        Ok(())
    } else {
        Err(CoreError::InvalidSchema {
            key: key.to_string(),
            reason: "keys are non-empty and made of letters, digits, '_', '-' or '.'".into(),
        })
    }
}

/// Named grouping of schemas. Membership is recorded on each schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnyTypeClass {
    pub key: String,
}

impl AnyTypeClass {
    pub fn new(key: impl Into<String>) -> Self {
        AnyTypeClass { key: key.into() }
    }
}

/// Type of an owner: its kind plus the classes every instance may use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnyType {
    pub key: String,
    pub kind: AnyTypeKind,
    #[serde(default)]
    pub classes: Vec<String>,
}

impl AnyType {
    pub const USER: &'static str = "USER";
    pub const GROUP: &'static str = "GROUP";

    pub fn new(key: impl Into<String>, kind: AnyTypeKind) -> Self {
        AnyType {
            key: key.into(),
            kind,
            classes: Vec::new(),
        }
    }

    pub fn with_classes(mut self, classes: &[&str]) -> Self {
        self.classes = classes.iter().map(|c| c.to_string()).collect();
        self
    }
}
