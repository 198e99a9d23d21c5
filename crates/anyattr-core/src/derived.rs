//! Derived attributes: values computed from an expression over the
//! owner's plain attributes on every read.

use std::sync::Arc;

use indexmap::IndexMap;
use tracing::error;

use crate::allowed::AllowedSchemas;
use crate::any::Any;
use crate::attr::PlainAttr;
use crate::error::CoreError;
use crate::id::MembershipKey;
use crate::registry::SchemaRegistry;
use crate::schema::DerSchema;

/// Expression language collaborator.
///
/// Identifiers not bound by the owner or `attrs` must evaluate as empty.
pub trait ExpressionEvaluator: Send + Sync {
    fn evaluate(&self, expression: &str, owner: &Any, attrs: &[&PlainAttr]) -> Result<String, CoreError>;
}

#[derive(Clone)]
pub struct DerivedAttrEvaluator {
    evaluator: Arc<dyn ExpressionEvaluator>,
}

impl std::fmt::Debug for DerivedAttrEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedAttrEvaluator").finish_non_exhaustive()
    }
}

impl DerivedAttrEvaluator {
    pub fn new(evaluator: Arc<dyn ExpressionEvaluator>) -> Self {
        DerivedAttrEvaluator { evaluator }
    }

    /// Value of `schema` for `owner`; `""` when evaluation fails.
    pub fn evaluate(&self, schema: &DerSchema, owner: &Any, attrs: &[&PlainAttr]) -> String {
        self.expression(&schema.expression, owner, attrs)
    }

    /// Evaluates an arbitrary expression with the same fallback.
    pub fn expression(&self, expression: &str, owner: &Any, attrs: &[&PlainAttr]) -> String {
        match self.evaluator.evaluate(expression, owner, attrs) {
            Ok(value) => value,
            Err(e) => {
                error!(expression = %expression, owner = %owner.key(), error = %e, "expression evaluation failed");
                String::new()
            }
        }
    }

    /// Values of every derived schema allowed directly, against the direct
    /// plain attributes.
    pub fn evaluate_all(&self, owner: &Any, registry: &SchemaRegistry, allowed: &AllowedSchemas) -> IndexMap<String, String> {
        let attrs: Vec<&PlainAttr> = owner.plain_attrs().collect();
        allowed
            .for_self
            .derived
            .iter()
            .filter_map(|key| registry.derived(key))
            .map(|schema| (schema.key.clone(), self.evaluate(&schema, owner, &attrs)))
            .collect()
    }

    /// Values of the derived schemas allowed in one membership, against
    /// that membership's overlay.
    pub fn evaluate_for_membership(
        &self,
        owner: &Any,
        membership: MembershipKey,
        registry: &SchemaRegistry,
        allowed: &AllowedSchemas,
    ) -> IndexMap<String, String> {
        let (Some(m), Some(set)) = (owner.membership(membership), allowed.for_membership(membership)) else {
            return IndexMap::new();
        };
        let attrs: Vec<&PlainAttr> = m.plain_attrs().collect();
        set.derived
            .iter()
            .filter_map(|key| registry.derived(key))
            .map(|schema| (schema.key.clone(), self.evaluate(&schema, owner, &attrs)))
            .collect()
    }

    /// Whether a mandatory condition holds. `true` and `false` are
    /// answered without evaluation; failures count as not mandatory.
    pub fn condition_holds(&self, condition: &str, owner: &Any, attrs: &[&PlainAttr]) -> bool {
        match condition.trim() {
            "" => false,
            c if c.eq_ignore_ascii_case("true") => true,
            c if c.eq_ignore_ascii_case("false") => false,
            c => self.expression(c, owner, attrs).eq_ignore_ascii_case("true"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Joins the first value of each named attribute with spaces.
    struct JoinFirst;

    impl ExpressionEvaluator for JoinFirst {
        fn evaluate(&self, expression: &str, _owner: &Any, attrs: &[&PlainAttr]) -> Result<String, CoreError> {
            let parts: Vec<String> = expression
                .split('+')
                .map(|name| {
                    attrs
                        .iter()
                        .find(|a| a.schema_key() == Some(name.trim()))
                        .and_then(|a| a.values_as_strings().into_iter().next())
                        .unwrap_or_default()
                })
                .collect();
            Ok(parts.join(" "))
        }
    }

    struct Failing(AtomicUsize);

    impl ExpressionEvaluator for Failing {
        fn evaluate(&self, expression: &str, _owner: &Any, _attrs: &[&PlainAttr]) -> Result<String, CoreError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(CoreError::Evaluation {
                expression: expression.to_string(),
                reason: "boom".into(),
            })
        }
    }

    #[test]
    fn failure_degrades_to_empty_string() {
        let failing = Arc::new(Failing(AtomicUsize::new(0)));
        let evaluator = DerivedAttrEvaluator::new(failing.clone());
        let owner = Any::user("ann", "/");
        let value = evaluator.evaluate(&DerSchema::new("x", "anything"), &owner, &[]);
        assert_eq!(value, "");
        assert_eq!(failing.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn missing_attribute_evaluates_empty() {
        let evaluator = DerivedAttrEvaluator::new(Arc::new(JoinFirst));
        let owner = Any::user("ann", "/");
        let value = evaluator.evaluate(&DerSchema::new("fullName", "firstName + lastName"), &owner, &[]);
        assert_eq!(value, " ");
    }

    #[test]
    fn literal_conditions_skip_evaluation() {
        let failing = Arc::new(Failing(AtomicUsize::new(0)));
        let evaluator = DerivedAttrEvaluator::new(failing.clone());
        let owner = Any::user("ann", "/");
        assert!(evaluator.condition_holds("TRUE", &owner, &[]));
        assert!(!evaluator.condition_holds("false", &owner, &[]));
        assert!(!evaluator.condition_holds("", &owner, &[]));
        assert_eq!(failing.0.load(Ordering::SeqCst), 0);

        assert!(!evaluator.condition_holds("realm == '/'", &owner, &[]));
        assert_eq!(failing.0.load(Ordering::SeqCst), 1);
    }
}
