//! AttrValue: one typed value of a plain attribute.
//!
//! A value keeps one slot per representation; exactly one is populated
//! for values built through [`AttrValue::from_typed`]. Reads resolve the
//! first populated slot in the order boolean, date, double, long, binary,
//! string, and a value with every slot empty reads as `""`.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use crate::codec::{TypeCodec, TypedValue};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttrValue {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub string_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_value: Option<DateTime<FixedOffset>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boolean_value: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub long_value: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub double_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary_value: Option<Vec<u8>>,
}

impl AttrValue {
    pub fn from_typed(value: TypedValue) -> Self {
        let mut slots = AttrValue::default();
        match value {
            TypedValue::String(s) => slots.string_value = Some(s),
            TypedValue::Date(d) => slots.date_value = Some(d),
            TypedValue::Boolean(b) => slots.boolean_value = Some(b),
            TypedValue::Long(n) => slots.long_value = Some(n),
            TypedValue::Double(d) => slots.double_value = Some(d),
            TypedValue::Binary(b) => slots.binary_value = Some(b),
        }
        slots
    }

    pub fn string(s: impl Into<String>) -> Self {
        AttrValue::from_typed(TypedValue::String(s.into()))
    }

    pub fn is_empty(&self) -> bool {
        self.value().is_none()
    }

    /// The first populated slot, by read precedence.
    pub fn value(&self) -> Option<TypedValue> {
        if let Some(b) = self.boolean_value {
            Some(TypedValue::Boolean(b))
        } else if let Some(d) = self.date_value {
            Some(TypedValue::Date(d))
        } else if let Some(d) = self.double_value {
            Some(TypedValue::Double(d))
        } else if let Some(n) = self.long_value {
            Some(TypedValue::Long(n))
        } else if let Some(b) = &self.binary_value {
            Some(TypedValue::Binary(b.clone()))
        } else {
            self.string_value.clone().map(TypedValue::String)
        }
    }

    /// Wire string of this value.
    ///
    /// All-empty values format as `""`: empty strings were historically
    /// stored as NULL and must keep reading back as empty.
    pub fn format(&self, conversion_pattern: Option<&str>) -> String {
        match self.value() {
            Some(value) => TypeCodec::format(&value, conversion_pattern),
            None => String::new(),
        }
    }

    pub fn populated_slots(&self) -> usize {
        [
            self.string_value.is_some(),
            self.date_value.is_some(),
            self.boolean_value.is_some(),
            self.long_value.is_some(),
            self.double_value.is_some(),
            self.binary_value.is_some(),
        ]
        .iter()
        .filter(|set| **set)
        .count()
    }
}
