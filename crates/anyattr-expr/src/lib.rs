//! A small JEXL-style expression language for derived attributes and
//! mandatory conditions.
//!
//! ```text
//! firstName + ' ' + surname
//! empty(title) ? 'n/a' : title.toUpperCase()
//! realm == '/even' && size(phones) > 1
//! ```

pub mod context;
pub mod error;
pub mod eval;
pub mod parse;
pub mod value;

use tracing::debug;

use anyattr_core::{Any, CoreError, ExpressionEvaluator, PlainAttr};

pub use context::Context;
pub use error::EvalError;
pub use eval::EvalConfig;
pub use value::Value;

/// Parses and evaluates `expression` against `ctx`.
pub fn evaluate(expression: &str, ctx: &Context) -> Result<Value, EvalError> {
    evaluate_with(expression, ctx, &EvalConfig::default())
}

pub fn evaluate_with(expression: &str, ctx: &Context, config: &EvalConfig) -> Result<Value, EvalError> {
    let expr = parse::parse_with_limit(expression, config.max_depth)?;
    eval::eval(&expr, ctx, config)
}

/// [`ExpressionEvaluator`] backed by this crate's language.
#[derive(Debug, Clone, Default)]
pub struct JexlEvaluator {
    pub config: EvalConfig,
}

impl JexlEvaluator {
    pub fn new(config: EvalConfig) -> Self {
        JexlEvaluator { config }
    }
}

impl ExpressionEvaluator for JexlEvaluator {
    fn evaluate(&self, expression: &str, owner: &Any, attrs: &[&PlainAttr]) -> Result<String, CoreError> {
        let ctx = Context::for_owner(owner, attrs);
        debug!(expression = %expression, vars = ctx.len(), "evaluating expression");
        evaluate_with(expression, &ctx, &self.config)
            .map(|v| v.to_text())
            .map_err(|e| CoreError::Evaluation {
                expression: expression.to_string(),
                reason: e.to_string(),
            })
    }
}
