//! `where <expression>`: keep the events the predicate holds for.
//!
//! Comparisons against a field the schema does not have evaluate to false;
//! the operator warns once per missing field instead of failing.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use flowline_core::diagnostic::Diagnostic;
use flowline_core::element::ElementType;
use flowline_core::error::{ConstructionError, OperatorError};
use flowline_core::expr::Expression;
use flowline_core::types::EventBatch;

use crate::control::Ctrl;
use crate::generator::{Input, OperatorInput, OperatorOutput, Output};
use crate::optimize::{eliminate, EventOrder, OptimizeResult};
use crate::registry::to_config;
use crate::traits::{expect_input, unexpected_input, Operator};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Where {
    pub expression: Expression,
}

/// Either the textual form (`"a > 1 and b == x"`) or a structured tree.
#[derive(Deserialize)]
#[serde(untagged)]
enum ExpressionArg {
    Text(String),
    Tree(Expression),
}

#[derive(Deserialize)]
struct WhereArgs {
    expression: ExpressionArg,
}

impl Where {
    pub fn new(expression: Expression) -> Self {
        Self { expression }
    }

    pub fn parse(src: &str) -> Result<Self, ConstructionError> {
        Ok(Self::new(Expression::parse(src)?))
    }

    pub fn from_config(config: &Value) -> Result<Box<dyn Operator>, ConstructionError> {
        let args: WhereArgs = match config {
            Value::String(s) => WhereArgs {
                expression: ExpressionArg::Text(s.clone()),
            },
            other => serde_json::from_value(other.clone())
                .map_err(|e| ConstructionError::invalid("where", e.to_string()))?,
        };
        let expression = match args.expression {
            ExpressionArg::Text(src) => Expression::parse(&src)?,
            ExpressionArg::Tree(tree) => tree,
        };
        Ok(Box::new(Self::new(expression)))
    }
}

fn filter(input: Input<EventBatch>, expr: Expression, ctrl: Ctrl) -> Output<EventBatch> {
    let fields: Vec<String> = expr.fields().into_iter().map(str::to_string).collect();
    let mut checked: BTreeSet<String> = BTreeSet::new();
    Box::new(input.map(move |batch| {
        if batch.is_empty() {
            return Ok(batch);
        }
        let schema = batch.schema();
        if checked.insert(schema.name.clone()) {
            for field in fields.iter().filter(|f| schema.index_of(f).is_none()) {
                ctrl.warn(
                    Diagnostic::warning(format!("field `{field}` does not exist"))
                        .note(format!("in schema `{}`", schema.name)),
                );
            }
        }
        let mask = expr.eval_rows(&batch);
        if mask.iter().all(|keep| *keep) {
            return Ok(batch);
        }
        Ok(batch.filter(&mask))
    }))
}

impl Operator for Where {
    fn name(&self) -> &'static str {
        "where"
    }

    fn infer_type(&self, input: ElementType) -> Result<ElementType, ConstructionError> {
        expect_input(self.name(), input, ElementType::Events, ElementType::Events)
    }

    fn instantiate(&self, input: OperatorInput, ctrl: Ctrl) -> Result<OperatorOutput, OperatorError> {
        match input {
            OperatorInput::Events(input) => Ok(OperatorOutput::Events(filter(
                input,
                self.expression.clone(),
                ctrl,
            ))),
            other => Err(unexpected_input(self.name(), &other)),
        }
    }

    fn config(&self) -> Value {
        to_config(self)
    }

    fn copy(&self) -> Box<dyn Operator> {
        Box::new(self.clone())
    }

    fn optimize(&self, filter: &Expression, _order: EventOrder) -> OptimizeResult {
        eliminate(filter.clone().conjoin(self.expression.clone()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::local::{run_local, LocalControl};
    use crate::source::sequence_batches;
    use flowline_core::expr::CmpOp;
    use flowline_core::types::Scalar;

    #[test]
    fn test_where_keeps_matching_rows() {
        let op = Where::parse("id >= 3 and id < 6").expect("parse");
        let out: Vec<EventBatch> =
            run_local(&op, Arc::new(LocalControl::default()), sequence_batches(10, 4))
                .expect("run");
        let total: usize = out.iter().map(EventBatch::rows).sum();
        assert_eq!(total, 3);
    }

    #[test]
    fn test_missing_field_warns_once() {
        let ctrl = Arc::new(LocalControl::default());
        let op = Where::parse("missing == 1").expect("parse");
        let out: Vec<EventBatch> =
            run_local(&op, Arc::clone(&ctrl), sequence_batches(10, 2)).expect("run");
        assert!(out.is_empty());
        assert_eq!(ctrl.warnings().len(), 1);
    }

    #[test]
    fn test_optimize_conjoins_and_disappears() {
        let op = Where::new(Expression::compare("a", CmpOp::Eq, Scalar::I64(1)));
        let downstream = Expression::compare("b", CmpOp::Lt, Scalar::I64(2));
        let res = op.optimize(&downstream, EventOrder::Ordered);
        assert!(res.replacement.is_empty());
        assert_eq!(res.filter.map(|f| f.fields().len()), Some(2));
    }

    #[test]
    fn test_from_config_accepts_text_and_tree() {
        let text = Where::from_config(&serde_json::json!({"expression": "a == 1"})).expect("text");
        let tree = Where::from_config(&text.config()).expect("tree");
        assert_eq!(text.config(), tree.config());
    }
}
