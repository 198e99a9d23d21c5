//! Enumerations shared by schemas, owners and storage backends.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Declared type of a schema; selects the value slot an attribute uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttrSchemaType {
    String,
    Long,
    Double,
    Boolean,
    Date,
    Enum,
    Binary,
    Encrypted,
}

impl AttrSchemaType {
    pub const ALL: [AttrSchemaType; 8] = [
        AttrSchemaType::String,
        AttrSchemaType::Long,
        AttrSchemaType::Double,
        AttrSchemaType::Boolean,
        AttrSchemaType::Date,
        AttrSchemaType::Enum,
        AttrSchemaType::Binary,
        AttrSchemaType::Encrypted,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AttrSchemaType::String => "String",
            AttrSchemaType::Long => "Long",
            AttrSchemaType::Double => "Double",
            AttrSchemaType::Boolean => "Boolean",
            AttrSchemaType::Date => "Date",
            AttrSchemaType::Enum => "Enum",
            AttrSchemaType::Binary => "Binary",
            AttrSchemaType::Encrypted => "Encrypted",
        }
    }

    /// Whether a conversion pattern is meaningful for this type.
    pub fn is_conversion_pattern_needed(self) -> bool {
        matches!(
            self,
            AttrSchemaType::Long | AttrSchemaType::Double | AttrSchemaType::Date
        )
    }
}

impl fmt::Display for AttrSchemaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttrSchemaType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AttrSchemaType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown schema type: {}", s))
    }
}

/// The three schema families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SchemaKind {
    Plain,
    Derived,
    Virtual,
}

impl SchemaKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SchemaKind::Plain => "PLAIN",
            SchemaKind::Derived => "DERIVED",
            SchemaKind::Virtual => "VIRTUAL",
        }
    }
}

impl FromStr for SchemaKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PLAIN" => Ok(SchemaKind::Plain),
            "DERIVED" => Ok(SchemaKind::Derived),
            "VIRTUAL" => Ok(SchemaKind::Virtual),
            other => Err(format!("unknown schema kind: {}", other)),
        }
    }
}

/// Kind of an attribute owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnyTypeKind {
    User,
    Group,
    AnyObject,
}

impl AnyTypeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AnyTypeKind::User => "USER",
            AnyTypeKind::Group => "GROUP",
            AnyTypeKind::AnyObject => "ANY_OBJECT",
        }
    }

    /// Users and any objects can be members of groups; groups cannot.
    pub fn is_groupable(self) -> bool {
        !matches!(self, AnyTypeKind::Group)
    }
}

impl fmt::Display for AnyTypeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnyTypeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "USER" => Ok(AnyTypeKind::User),
            "GROUP" => Ok(AnyTypeKind::Group),
            "ANY_OBJECT" => Ok(AnyTypeKind::AnyObject),
            other => Err(format!("unknown any type kind: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_type_from_str_is_case_insensitive() {
        assert_eq!("long".parse::<AttrSchemaType>().unwrap(), AttrSchemaType::Long);
        assert_eq!("DATE".parse::<AttrSchemaType>().unwrap(), AttrSchemaType::Date);
        assert!("Float".parse::<AttrSchemaType>().is_err());
    }

    #[test]
    fn kind_strings_roundtrip() {
        for kind in [AnyTypeKind::User, AnyTypeKind::Group, AnyTypeKind::AnyObject] {
            assert_eq!(kind.as_str().parse::<AnyTypeKind>().unwrap(), kind);
        }
        for kind in [SchemaKind::Plain, SchemaKind::Derived, SchemaKind::Virtual] {
            assert_eq!(kind.as_str().parse::<SchemaKind>().unwrap(), kind);
        }
    }

    #[test]
    fn only_groups_are_not_groupable() {
        assert!(AnyTypeKind::User.is_groupable());
        assert!(AnyTypeKind::AnyObject.is_groupable());
        assert!(!AnyTypeKind::Group.is_groupable());
    }

    #[test]
    fn serde_names() {
        assert_eq!(
            serde_json::to_string(&AnyTypeKind::AnyObject).unwrap(),
            "\"ANY_OBJECT\""
        );
        assert_eq!(serde_json::to_string(&AttrSchemaType::Long).unwrap(), "\"Long\"");
    }
}
