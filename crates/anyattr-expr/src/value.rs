//! Runtime values of the expression language.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Long(i64),
    Double(f64),
    String(String),
    List(Vec<Value>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Long(_) => "long",
            Value::Double(_) => "double",
            Value::String(_) => "string",
            Value::List(_) => "list",
        }
    }

    /// `null`, `false`, zero, `""` and empty lists are false.
    pub fn truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Long(n) => *n != 0,
            Value::Double(d) => *d != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::List(l) => !l.is_empty(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Value::Null => true,
            Value::String(s) => s.is_empty(),
            Value::List(l) => l.is_empty(),
            _ => false,
        }
    }

    /// Numeric view: numbers as-is, null as zero, numeric strings parsed.
    pub fn as_number(&self) -> Option<Number> {
        match self {
            Value::Null => Some(Number::Long(0)),
            Value::Long(n) => Some(Number::Long(*n)),
            Value::Double(d) => Some(Number::Double(*d)),
            Value::String(s) => {
                let t = s.trim();
                t.parse::<i64>()
                    .map(Number::Long)
                    .or_else(|_| t.parse::<f64>().map(Number::Double))
                    .ok()
            }
            Value::Bool(_) | Value::List(_) => None,
        }
    }

    /// Text used when the value ends up in a string; null renders empty.
    pub fn to_text(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Long(n) => write!(f, "{}", n),
            Value::Double(d) => write!(f, "{}", d),
            Value::String(s) => f.write_str(s),
            Value::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Long(i64),
    Double(f64),
}

impl Number {
    pub fn as_f64(self) -> f64 {
        match self {
            Number::Long(n) => n as f64,
            Number::Double(d) => d,
        }
    }
}

impl From<Number> for Value {
    fn from(n: Number) -> Self {
        match n {
            Number::Long(n) => Value::Long(n),
            Number::Double(d) => Value::Double(d),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_renders_empty() {
        assert_eq!(Value::Null.to_text(), "");
    }

    #[test]
    fn list_renders_bracketed() {
        let list = Value::List(vec![Value::String("a".into()), Value::Long(2)]);
        assert_eq!(list.to_text(), "[a, 2]");
    }

    #[test]
    fn truthiness() {
        assert!(!Value::String(String::new()).truthy());
        assert!(Value::String("x".into()).truthy());
        assert!(!Value::Long(0).truthy());
        assert!(!Value::List(vec![]).truthy());
    }

    #[test]
    fn numeric_strings_coerce() {
        assert_eq!(Value::String(" 42 ".into()).as_number(), Some(Number::Long(42)));
        assert_eq!(Value::String("1.5".into()).as_number(), Some(Number::Double(1.5)));
        assert_eq!(Value::String("abc".into()).as_number(), None);
    }
}
