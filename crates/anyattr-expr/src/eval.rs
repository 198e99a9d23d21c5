//! Tree-walking evaluation of parsed expressions.
//!
//! Identifiers missing from the [`Context`] evaluate to `null`, which
//! concatenates as the empty string and compares equal only to `null`.

use crate::context::Context;
use crate::error::EvalError;
use crate::parse::{BinaryOp, Expr};
use crate::value::{Number, Value};

/// Evaluation limits.
#[derive(Debug, Clone)]
pub struct EvalConfig {
    /// Maximum nesting depth of the expression tree.
    pub max_depth: usize,
}

impl Default for EvalConfig {
    fn default() -> Self {
        EvalConfig { max_depth: 256 }
    }
}

pub fn eval(expr: &Expr, ctx: &Context, config: &EvalConfig) -> Result<Value, EvalError> {
    Evaluator { ctx, config }.eval(expr, 0)
}

struct Evaluator<'a> {
    ctx: &'a Context,
    config: &'a EvalConfig,
}

impl Evaluator<'_> {
    fn eval(&self, expr: &Expr, depth: usize) -> Result<Value, EvalError> {
        if depth > self.config.max_depth {
            return Err(EvalError::DepthExceeded {
                limit: self.config.max_depth,
            });
        }
        let d = depth + 1;

        match expr {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::Ident(name) => Ok(self.ctx.get(name).cloned().unwrap_or(Value::Null)),
            Expr::List(items) => Ok(Value::List(
                items.iter().map(|e| self.eval(e, d)).collect::<Result<_, _>>()?,
            )),
            Expr::Not(inner) => Ok(Value::Bool(!self.eval(inner, d)?.truthy())),
            Expr::Neg(inner) => {
                let v = self.eval(inner, d)?;
                match v.as_number() {
                    Some(Number::Long(n)) => Ok(n
                        .checked_neg()
                        .map(Value::Long)
                        .unwrap_or(Value::Double(-(n as f64)))),
                    Some(Number::Double(x)) => Ok(Value::Double(-x)),
                    None => Err(mismatch("-", &v, &v)),
                }
            }
            Expr::And(l, r) => {
                if !self.eval(l, d)?.truthy() {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(self.eval(r, d)?.truthy()))
            }
            Expr::Or(l, r) => {
                if self.eval(l, d)?.truthy() {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(self.eval(r, d)?.truthy()))
            }
            Expr::Ternary { cond, then, otherwise } => {
                if self.eval(cond, d)?.truthy() {
                    self.eval(then, d)
                } else {
                    self.eval(otherwise, d)
                }
            }
            Expr::Binary { op, left, right } => {
                let l = self.eval(left, d)?;
                let r = self.eval(right, d)?;
                binary(*op, &l, &r)
            }
            Expr::Call { name, args } => {
                let args = args.iter().map(|e| self.eval(e, d)).collect::<Result<Vec<_>, _>>()?;
                call(name, &args)
            }
            Expr::Method { target, name, args } => {
                let target = self.eval(target, d)?;
                let args = args.iter().map(|e| self.eval(e, d)).collect::<Result<Vec<_>, _>>()?;
                method(&target, name, &args)
            }
            Expr::Index { target, index } => {
                let target = self.eval(target, d)?;
                let index = self.eval(index, d)?;
                Ok(index_into(&target, &index))
            }
        }
    }
}

fn mismatch(op: &str, l: &Value, r: &Value) -> EvalError {
    EvalError::TypeMismatch {
        op: op.to_string(),
        left: l.type_name().to_string(),
        right: r.type_name().to_string(),
    }
}

fn numeric(l: &Value, r: &Value) -> bool {
    numeric_side(l) && numeric_side(r)
}

fn binary(op: BinaryOp, l: &Value, r: &Value) -> Result<Value, EvalError> {
    match op {
        BinaryOp::Add => {
            if numeric(l, r) {
                arith(op, l, r)
            } else if let (Value::List(a), Value::List(b)) = (l, r) {
                Ok(Value::List(a.iter().chain(b).cloned().collect()))
            } else {
                Ok(Value::String(format!("{}{}", l, r)))
            }
        }
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => arith(op, l, r),
        BinaryOp::Eq => Ok(Value::Bool(equals(l, r))),
        BinaryOp::Ne => Ok(Value::Bool(!equals(l, r))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ord = compare(l, r).ok_or_else(|| mismatch(op.symbol(), l, r))?;
            Ok(Value::Bool(match op {
                BinaryOp::Lt => ord.is_lt(),
                BinaryOp::Le => ord.is_le(),
                BinaryOp::Gt => ord.is_gt(),
                _ => ord.is_ge(),
            }))
        }
    }
}

fn arith(op: BinaryOp, l: &Value, r: &Value) -> Result<Value, EvalError> {
    let (Some(a), Some(b)) = (l.as_number(), r.as_number()) else {
        return Err(mismatch(op.symbol(), l, r));
    };

    if let (Number::Long(x), Number::Long(y)) = (a, b) {
        let checked = match op {
            BinaryOp::Add => x.checked_add(y),
            BinaryOp::Sub => x.checked_sub(y),
            BinaryOp::Mul => x.checked_mul(y),
            BinaryOp::Div | BinaryOp::Rem if y == 0 => return Err(EvalError::DivideByZero),
            BinaryOp::Div => x.checked_div(y),
            BinaryOp::Rem => x.checked_rem(y),
            _ => None,
        };
        if let Some(n) = checked {
            return Ok(Value::Long(n));
        }
    }

    let (x, y) = (a.as_f64(), b.as_f64());
    let result = match op {
        BinaryOp::Add => x + y,
        BinaryOp::Sub => x - y,
        BinaryOp::Mul => x * y,
        BinaryOp::Div | BinaryOp::Rem if y == 0.0 => return Err(EvalError::DivideByZero),
        BinaryOp::Div => x / y,
        BinaryOp::Rem => x % y,
        _ => return Err(mismatch(op.symbol(), l, r)),
    };
    Ok(Value::Double(result))
}

fn equals(l: &Value, r: &Value) -> bool {
    match (l, r) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::List(a), Value::List(b)) => a.len() == b.len() && a.iter().zip(b).all(|(x, y)| equals(x, y)),
        (Value::Bool(a), Value::Bool(b)) => a == b,
        _ if numeric_side(l) || numeric_side(r) => match (l.as_number(), r.as_number()) {
            (Some(a), Some(b)) => a.as_f64() == b.as_f64(),
            _ => false,
        },
        _ => l.to_text() == r.to_text(),
    }
}

fn numeric_side(v: &Value) -> bool {
    matches!(v, Value::Long(_) | Value::Double(_))
}

fn compare(l: &Value, r: &Value) -> Option<std::cmp::Ordering> {
    match (l, r) {
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => {
            let (a, b) = (l.as_number()?, r.as_number()?);
            a.as_f64().partial_cmp(&b.as_f64())
        }
    }
}

fn arity(name: &str, args: &[Value], expected: std::ops::RangeInclusive<usize>) -> Result<(), EvalError> {
    if expected.contains(&args.len()) {
        return Ok(());
    }
    let expected = if expected.start() == expected.end() {
        expected.start().to_string()
    } else {
        format!("{}..{}", expected.start(), expected.end())
    };
    Err(EvalError::Arity {
        name: name.to_string(),
        expected,
        got: args.len(),
    })
}

fn call(name: &str, args: &[Value]) -> Result<Value, EvalError> {
    match name {
        "empty" => {
            arity(name, args, 1..=1)?;
            Ok(Value::Bool(args[0].is_empty()))
        }
        "size" => {
            arity(name, args, 1..=1)?;
            Ok(Value::Long(size_of(&args[0])))
        }
        _ => Err(EvalError::UnknownFunction { name: name.to_string() }),
    }
}

fn size_of(v: &Value) -> i64 {
    match v {
        Value::Null => 0,
        Value::List(items) => items.len() as i64,
        other => other.to_text().chars().count() as i64,
    }
}

fn index_into(target: &Value, index: &Value) -> Value {
    let Some(Number::Long(i)) = index.as_number() else {
        return Value::Null;
    };
    let Ok(i) = usize::try_from(i) else {
        return Value::Null;
    };
    match target {
        Value::List(items) => items.get(i).cloned().unwrap_or(Value::Null),
        // a single-valued attribute indexes like a one-element list
        Value::String(_) if i == 0 => target.clone(),
        _ => Value::Null,
    }
}

/// Char-indexed substring clamped to the string bounds.
fn substring(s: &str, from: i64, to: Option<i64>) -> String {
    let len = s.chars().count() as i64;
    let from = from.clamp(0, len);
    let to = to.unwrap_or(len).clamp(from, len);
    s.chars().skip(from as usize).take((to - from) as usize).collect()
}

fn long_arg(name: &str, v: &Value) -> Result<i64, EvalError> {
    match v.as_number() {
        Some(Number::Long(n)) => Ok(n),
        Some(Number::Double(d)) => Ok(d as i64),
        None => Err(mismatch(name, v, v)),
    }
}

fn method(target: &Value, name: &str, args: &[Value]) -> Result<Value, EvalError> {
    if let Value::List(items) = target {
        return match name {
            "size" | "length" => {
                arity(name, args, 0..=0)?;
                Ok(Value::Long(items.len() as i64))
            }
            "contains" => {
                arity(name, args, 1..=1)?;
                Ok(Value::Bool(items.iter().any(|i| equals(i, &args[0]))))
            }
            "isEmpty" => {
                arity(name, args, 0..=0)?;
                Ok(Value::Bool(items.is_empty()))
            }
            _ => Err(EvalError::UnknownMethod {
                name: name.to_string(),
                target: target.type_name().to_string(),
            }),
        };
    }

    let s = target.to_text();
    match name {
        "toUpperCase" => {
            arity(name, args, 0..=0)?;
            Ok(Value::String(s.to_uppercase()))
        }
        "toLowerCase" => {
            arity(name, args, 0..=0)?;
            Ok(Value::String(s.to_lowercase()))
        }
        "trim" => {
            arity(name, args, 0..=0)?;
            Ok(Value::String(s.trim().to_string()))
        }
        "length" | "size" => {
            arity(name, args, 0..=0)?;
            Ok(Value::Long(s.chars().count() as i64))
        }
        "isEmpty" => {
            arity(name, args, 0..=0)?;
            Ok(Value::Bool(s.is_empty()))
        }
        "toString" => {
            arity(name, args, 0..=0)?;
            Ok(Value::String(s))
        }
        "substring" => {
            arity(name, args, 1..=2)?;
            let from = long_arg(name, &args[0])?;
            let to = args.get(1).map(|a| long_arg(name, a)).transpose()?;
            Ok(Value::String(substring(&s, from, to)))
        }
        "startsWith" => {
            arity(name, args, 1..=1)?;
            Ok(Value::Bool(s.starts_with(&args[0].to_text())))
        }
        "endsWith" => {
            arity(name, args, 1..=1)?;
            Ok(Value::Bool(s.ends_with(&args[0].to_text())))
        }
        "contains" => {
            arity(name, args, 1..=1)?;
            Ok(Value::Bool(s.contains(&args[0].to_text())))
        }
        "replace" => {
            arity(name, args, 2..=2)?;
            Ok(Value::String(s.replace(&args[0].to_text(), &args[1].to_text())))
        }
        "concat" => {
            arity(name, args, 1..=1)?;
            Ok(Value::String(s + &args[0].to_text()))
        }
        _ => Err(EvalError::UnknownMethod {
            name: name.to_string(),
            target: target.type_name().to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse;
    use proptest::prelude::*;

    fn run(src: &str, ctx: &Context) -> Result<Value, EvalError> {
        eval(&parse(src)?, ctx, &EvalConfig::default())
    }

    fn ctx() -> Context {
        let mut ctx = Context::new();
        ctx.set("firstName", Value::String("Ann".into()));
        ctx.set("age", Value::String("41".into()));
        ctx.set(
            "phones",
            Value::List(vec![Value::String("555-1".into()), Value::String("555-2".into())]),
        );
        ctx
    }

    #[test]
    fn missing_identifier_concatenates_empty() {
        assert_eq!(
            run("firstName + ' ' + lastName", &ctx()).unwrap(),
            Value::String("Ann ".into())
        );
    }

    #[test]
    fn numeric_strings_do_arithmetic_but_plus_concatenates() {
        assert_eq!(run("age * 2", &ctx()).unwrap(), Value::Long(82));
        assert_eq!(run("age + 1", &ctx()).unwrap(), Value::String("411".into()));
        assert_eq!(run("1 + 2", &ctx()).unwrap(), Value::Long(3));
        assert_eq!(run("7 / 2.0", &ctx()).unwrap(), Value::Double(3.5));
    }

    #[test]
    fn overflow_promotes_to_double() {
        let v = run("9223372036854775807 + 1", &Context::new()).unwrap();
        assert!(matches!(v, Value::Double(_)));
    }

    #[test]
    fn divide_by_zero_is_an_error() {
        assert_eq!(run("1 / 0", &ctx()).unwrap_err(), EvalError::DivideByZero);
        assert_eq!(run("1 % 0", &ctx()).unwrap_err(), EvalError::DivideByZero);
    }

    #[test]
    fn equality_and_null() {
        assert_eq!(run("age == 41", &ctx()).unwrap(), Value::Bool(true));
        assert_eq!(run("firstName eq 'Ann'", &ctx()).unwrap(), Value::Bool(true));
        assert_eq!(run("missing == null", &ctx()).unwrap(), Value::Bool(true));
        assert_eq!(run("missing == ''", &ctx()).unwrap(), Value::Bool(false));
        assert_eq!(run("empty(missing)", &ctx()).unwrap(), Value::Bool(true));
    }

    #[test]
    fn short_circuit_skips_errors() {
        assert_eq!(run("false && 1 / 0", &ctx()).unwrap(), Value::Bool(false));
        assert_eq!(run("true || 1 / 0", &ctx()).unwrap(), Value::Bool(true));
    }

    #[test]
    fn ternary_and_methods() {
        assert_eq!(
            run("empty(lastName) ? firstName.toUpperCase() : lastName", &ctx()).unwrap(),
            Value::String("ANN".into())
        );
        assert_eq!(
            run("firstName.substring(1)", &ctx()).unwrap(),
            Value::String("nn".into())
        );
        assert_eq!(run("phones.size()", &ctx()).unwrap(), Value::Long(2));
        assert_eq!(run("phones[1]", &ctx()).unwrap(), Value::String("555-2".into()));
        assert_eq!(run("phones[5]", &ctx()).unwrap(), Value::Null);
        assert_eq!(run("size(firstName)", &ctx()).unwrap(), Value::Long(3));
    }

    #[test]
    fn unknown_calls_fail() {
        assert!(matches!(
            run("nope(1)", &ctx()).unwrap_err(),
            EvalError::UnknownFunction { .. }
        ));
        assert!(matches!(
            run("firstName.explode()", &ctx()).unwrap_err(),
            EvalError::UnknownMethod { .. }
        ));
        assert!(matches!(
            run("firstName.substring()", &ctx()).unwrap_err(),
            EvalError::Arity { got: 0, .. }
        ));
    }

    #[test]
    fn depth_limit() {
        let config = EvalConfig { max_depth: 4 };
        let expr = parse("1+1+1+1+1+1").unwrap();
        match eval(&expr, &Context::new(), &config) {
            Err(EvalError::DepthExceeded { limit: 4 }) => {}
            other => panic!("expected DepthExceeded, got {:?}", other),
        }
    }

    proptest! {
        #[test]
        fn substring_never_panics(s in "\\PC{0,12}", from in -5i64..20, to in -5i64..20) {
            let out = substring(&s, from, Some(to));
            prop_assert!(out.chars().count() <= s.chars().count());
        }

        #[test]
        fn plus_on_strings_concatenates(a in "[a-z]{0,8}", b in "[a-z]{0,8}") {
            let mut ctx = Context::new();
            ctx.set("a", Value::String(a.clone()));
            ctx.set("b", Value::String(b.clone()));
            prop_assert_eq!(run("a + b", &ctx).unwrap(), Value::String(format!("{}{}", a, b)));
        }
    }
}
