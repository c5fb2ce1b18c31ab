//! Field processors: named syntactic repair and scoring functions applied
//! to predicted output fields before they are judged.
//!
//! A signature maps output field names to processor names. Fields without a
//! processor pass through unchanged with a perfect score, so tasks that
//! configure nothing are unaffected.

pub mod pln;

use std::collections::BTreeMap;
use std::sync::Arc;

use promptsmith_storage::{FieldValue, Signature};
use tracing::warn;

use crate::policy::LineAggregation;
use crate::unify::{StructuralUnifier, UnificationOracle};

/// A processed field value and its syntactic score in `[0, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Processed {
    pub value: FieldValue,
    pub score: f64,
}

impl Processed {
    pub fn identity(value: &FieldValue) -> Self {
        Self {
            value: value.clone(),
            score: 1.0,
        }
    }
}

/// A pure `(value) -> (cleaned_value, score)` function.
pub trait FieldProcessor: Send + Sync {
    fn process(&self, value: &FieldValue) -> Processed;
}

// ──────────────────────────────────────────────
// Built-in processors
// ──────────────────────────────────────────────

/// Line-by-line PLN repair over a list field.
///
/// A text value is split on newlines and the cleaned lines re-joined, so
/// the field keeps its shape.
pub struct CleanPlnList {
    pub oracle: Arc<dyn UnificationOracle>,
    pub aggregation: LineAggregation,
}

impl FieldProcessor for CleanPlnList {
    fn process(&self, value: &FieldValue) -> Processed {
        match value {
            FieldValue::Lines(lines) => {
                let (cleaned, score) =
                    pln::clean_pln_list(self.oracle.as_ref(), lines, self.aggregation);
                Processed {
                    value: FieldValue::Lines(cleaned),
                    score,
                }
            }
            FieldValue::Text(text) => {
                let lines: Vec<&str> = text.split('\n').collect();
                let (cleaned, score) =
                    pln::clean_pln_list(self.oracle.as_ref(), &lines, self.aggregation);
                Processed {
                    value: FieldValue::Text(cleaned.join("\n")),
                    score,
                }
            }
        }
    }
}

/// Single-line repair plus statement check.
pub struct CleanAndScore {
    pub oracle: Arc<dyn UnificationOracle>,
}

impl FieldProcessor for CleanAndScore {
    fn process(&self, value: &FieldValue) -> Processed {
        let (line, score) = pln::clean_and_score(self.oracle.as_ref(), value.to_text().trim());
        Processed {
            value: FieldValue::Text(line),
            score,
        }
    }
}

/// Parenthesis repair only; always scores 1.0.
pub struct CleanPln;

impl FieldProcessor for CleanPln {
    fn process(&self, value: &FieldValue) -> Processed {
        Processed {
            value: FieldValue::Text(pln::clean_pln(value.to_text().trim())),
            score: 1.0,
        }
    }
}

/// Parenthesis repair with its balance score.
pub struct BalanceParentheses;

impl FieldProcessor for BalanceParentheses {
    fn process(&self, value: &FieldValue) -> Processed {
        let (line, score) = pln::balance_parentheses(value.to_text().trim());
        Processed {
            value: FieldValue::Text(line),
            score,
        }
    }
}

/// Statement check without repair; the value passes through unchanged.
pub struct CheckStatement {
    pub oracle: Arc<dyn UnificationOracle>,
}

impl FieldProcessor for CheckStatement {
    fn process(&self, value: &FieldValue) -> Processed {
        Processed {
            value: value.clone(),
            score: pln::check_statement(self.oracle.as_ref(), value.to_text().trim()),
        }
    }
}

// ──────────────────────────────────────────────
// Registry
// ──────────────────────────────────────────────

/// Processor names to implementations.
#[derive(Clone, Default)]
pub struct ProcessorRegistry {
    processors: BTreeMap<String, Arc<dyn FieldProcessor>>,
}

impl ProcessorRegistry {
    /// An empty registry: every field passes through.
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in PLN processors, under their current and legacy names.
    pub fn with_defaults(oracle: Arc<dyn UnificationOracle>, aggregation: LineAggregation) -> Self {
        let mut registry = Self::new();
        let clean_and_score: Arc<dyn FieldProcessor> = Arc::new(CleanAndScore {
            oracle: oracle.clone(),
        });
        let clean_pln: Arc<dyn FieldProcessor> = Arc::new(CleanPln);
        let check_statement: Arc<dyn FieldProcessor> = Arc::new(CheckStatement {
            oracle: oracle.clone(),
        });

        registry.register(
            "clean_pln_list",
            Arc::new(CleanPlnList {
                oracle,
                aggregation,
            }),
        );
        registry.register("clean_and_score", clean_and_score.clone());
        registry.register("cleanAndScore", clean_and_score);
        registry.register("clean_pln", clean_pln.clone());
        registry.register("cleanPLN", clean_pln);
        registry.register("balance_parentheses", Arc::new(BalanceParentheses));
        registry.register("check_statement", check_statement.clone());
        registry.register("checkStmt", check_statement);
        registry
    }

    /// Built-in processors backed by [`StructuralUnifier`].
    pub fn builtin(aggregation: LineAggregation) -> Self {
        Self::with_defaults(Arc::new(StructuralUnifier), aggregation)
    }

    pub fn register(&mut self, name: impl Into<String>, processor: Arc<dyn FieldProcessor>) {
        self.processors.insert(name.into(), processor);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn FieldProcessor>> {
        self.processors.get(name)
    }

    /// Apply the processor configured for `field` on `signature`.
    ///
    /// No configured processor, or a name this registry does not know,
    /// yields the value unchanged with score 1.0.
    pub fn process(&self, field: &str, value: &FieldValue, signature: &Signature) -> Processed {
        let Some(name) = signature.field_processors.get(field) else {
            return Processed::identity(value);
        };
        match self.processors.get(name) {
            Some(processor) => processor.process(value),
            None => {
                warn!(
                    signature = %signature.name,
                    field,
                    processor = %name,
                    "unknown field processor, passing value through"
                );
                Processed::identity(value)
            }
        }
    }
}

impl std::fmt::Debug for ProcessorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorRegistry")
            .field("processors", &self.processors.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signature_with(processor: Option<&str>) -> Signature {
        let mut sig = Signature::pln_default();
        sig.field_processors.clear();
        if let Some(p) = processor {
            sig.field_processors
                .insert("pln_statements".to_string(), p.to_string());
        }
        sig
    }

    fn registry() -> ProcessorRegistry {
        ProcessorRegistry::builtin(LineAggregation::Mean)
    }

    #[test]
    fn unconfigured_field_is_identity() {
        let value = FieldValue::from("(broken");
        let out = registry().process("pln_statements", &value, &signature_with(None));
        assert_eq!(out, Processed::identity(&value));
    }

    #[test]
    fn unknown_processor_is_identity() {
        let value = FieldValue::from("(broken");
        let out = registry().process("pln_statements", &value, &signature_with(Some("nope")));
        assert_eq!(out.value, value);
        assert_eq!(out.score, 1.0);
    }

    #[test]
    fn list_processor_keeps_text_shape() {
        let value = FieldValue::from(
            "(: a (WithTV (Dog max) (STV 1.0 1.0)))\n\n(: b (WithTV (Cat tom) (STV 1.0 1.0)",
        );
        let out = registry().process(
            "pln_statements",
            &value,
            &signature_with(Some("clean_pln_list")),
        );
        assert_eq!(
            out.value,
            FieldValue::from(
                "(: a (WithTV (Dog max) (STV 1.0 1.0)))\n(: b (WithTV (Cat tom) (STV 1.0 1.0)))"
            )
        );
        assert_eq!(out.score, 0.75);
    }

    #[test]
    fn list_processor_on_lines() {
        let value = FieldValue::Lines(vec![]);
        let out = registry().process(
            "pln_statements",
            &value,
            &signature_with(Some("clean_pln_list")),
        );
        assert_eq!(out.value, FieldValue::Lines(vec![]));
        assert_eq!(out.score, 1.0);
    }

    #[test]
    fn legacy_aliases_registered() {
        let r = registry();
        for name in ["cleanAndScore", "cleanPLN", "checkStmt", "clean_and_score"] {
            assert!(r.get(name).is_some(), "{name} missing");
        }
    }

    #[test]
    fn check_statement_passes_value_through() {
        let value = FieldValue::from("(Dog max)");
        let out = registry().process(
            "pln_statements",
            &value,
            &signature_with(Some("check_statement")),
        );
        assert_eq!(out.value, value);
        assert_eq!(out.score, 0.0);
    }
}
