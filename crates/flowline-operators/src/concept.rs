//! `match_concept`: keep events where any field mapped to a concept equals
//! a value.
//!
//! Concept mappings come from the catalog snapshot the control plane hands
//! out when the operator is instantiated.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use flowline_core::diagnostic::Diagnostic;
use flowline_core::element::ElementType;
use flowline_core::error::{ConstructionError, OperatorError};
use flowline_core::expr::{CmpOp, Expression};
use flowline_core::types::EventBatch;

use crate::control::Ctrl;
use crate::generator::{OperatorInput, OperatorOutput};
use crate::json::json_to_scalar;
use crate::registry::{parse_config, to_config};
use crate::traits::{expect_input, unexpected_input, Operator};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchConcept {
    pub concept: String,
    pub value: Value,
}

impl MatchConcept {
    pub fn new(concept: impl Into<String>, value: Value) -> Self {
        Self {
            concept: concept.into(),
            value,
        }
    }

    pub fn from_config(config: &Value) -> Result<Box<dyn Operator>, ConstructionError> {
        let op: MatchConcept = parse_config("match_concept", config)?;
        if op.concept.is_empty() {
            return Err(ConstructionError::invalid("match_concept", "concept must not be empty"));
        }
        Ok(Box::new(op))
    }

    /// Disjunction over every field the concept resolves to.
    fn resolve(&self, ctrl: &Ctrl) -> Expression {
        let value = json_to_scalar(&self.value);
        let fields = ctrl.concepts().get(&self.concept).cloned().unwrap_or_default();
        if fields.is_empty() {
            ctrl.warn(
                Diagnostic::warning(format!("unknown concept `{}`", self.concept))
                    .hint("no events will match"),
            );
        }
        Expression::Or(
            fields
                .into_iter()
                .map(|f| Expression::compare(f, CmpOp::Eq, value.clone()))
                .collect(),
        )
    }
}

impl Operator for MatchConcept {
    fn name(&self) -> &'static str {
        "match_concept"
    }

    fn infer_type(&self, input: ElementType) -> Result<ElementType, ConstructionError> {
        expect_input(self.name(), input, ElementType::Events, ElementType::Events)
    }

    fn instantiate(&self, input: OperatorInput, ctrl: Ctrl) -> Result<OperatorOutput, OperatorError> {
        let input = match input {
            OperatorInput::Events(input) => input,
            other => return Err(unexpected_input(self.name(), &other)),
        };
        let expr = self.resolve(&ctrl);
        let gen = input.map(move |batch: EventBatch| {
            if batch.is_empty() {
                return Ok(batch);
            }
            Ok(batch.filter(&expr.eval_rows(&batch)))
        });
        Ok(OperatorOutput::Events(Box::new(gen)))
    }

    fn config(&self) -> Value {
        to_config(self)
    }

    fn copy(&self) -> Box<dyn Operator> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use super::*;
    use crate::local::{run_local, LocalControl};
    use flowline_core::catalog::StaticCatalog;
    use flowline_core::schema::{DataType, Field, Schema};
    use flowline_core::types::Scalar;

    fn conn(rows: &[(&str, &str)]) -> EventBatch {
        let schema = Arc::new(Schema::new(
            "conn",
            vec![
                Field::new("src_ip", DataType::Utf8, true),
                Field::new("dst_ip", DataType::Utf8, true),
            ],
        ));
        let rows = rows
            .iter()
            .map(|(s, d)| vec![Scalar::Str(s.to_string()), Scalar::Str(d.to_string())])
            .collect();
        EventBatch::from_rows(schema, rows).expect("batch")
    }

    #[test]
    fn test_matches_any_mapped_field() {
        let mut concepts = BTreeMap::new();
        concepts.insert("net.ip".to_string(), vec!["src_ip".to_string(), "dst_ip".to_string()]);
        let ctrl = Arc::new(LocalControl::new(StaticCatalog::new(Vec::new(), concepts)));
        let op = MatchConcept::new("net.ip", serde_json::json!("10.0.0.1"));
        let input = vec![conn(&[("10.0.0.1", "a"), ("b", "c"), ("d", "10.0.0.1")])];
        let out: Vec<EventBatch> = run_local(&op, ctrl, input).expect("run");
        assert_eq!(out.iter().map(EventBatch::rows).sum::<usize>(), 2);
    }

    #[test]
    fn test_unknown_concept_warns() {
        let ctrl = Arc::new(LocalControl::default());
        let op = MatchConcept::new("nope", serde_json::json!(1));
        let out: Vec<EventBatch> =
            run_local(&op, Arc::clone(&ctrl), vec![conn(&[("a", "b")])]).expect("run");
        assert!(out.is_empty());
        assert_eq!(ctrl.warnings().len(), 1);
    }
}
