//! `fail_after n`: forwards `n` events, then fails. For fault drills.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use flowline_core::element::{Element, ElementType};
use flowline_core::error::{ConstructionError, OperatorError};
use flowline_core::types::EventBatch;

use crate::control::Ctrl;
use crate::generator::{Input, OperatorInput, OperatorOutput, Output};
use crate::registry::{parse_config, to_config};
use crate::traits::{expect_input, unexpected_input, Operator};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailAfter {
    pub count: u64,
    #[serde(default = "default_message")]
    pub message: String,
}

fn default_message() -> String {
    "injected failure".to_string()
}

impl FailAfter {
    pub fn new(count: u64, message: impl Into<String>) -> Self {
        Self {
            count,
            message: message.into(),
        }
    }

    pub fn from_config(config: &Value) -> Result<Box<dyn Operator>, ConstructionError> {
        let op: FailAfter = parse_config("fail_after", config)?;
        Ok(Box::new(op))
    }
}

fn fail_after(mut input: Input<EventBatch>, count: u64, message: String) -> Output<EventBatch> {
    let mut remaining = count;
    let mut tripped = false;
    Box::new(std::iter::from_fn(move || {
        if tripped {
            return Some(Err(OperatorError::Exec(message.clone())));
        }
        let batch = input.next()?;
        let rows = batch.size();
        if rows == 0 || rows <= remaining {
            remaining -= rows;
            return Some(Ok(batch));
        }
        let (head, _) = Element::split_at(batch, remaining);
        remaining = 0;
        tripped = true;
        if head.size() == 0 {
            return Some(Err(OperatorError::Exec(message.clone())));
        }
        Some(Ok(head))
    }))
}

impl Operator for FailAfter {
    fn name(&self) -> &'static str {
        "fail_after"
    }

    fn infer_type(&self, input: ElementType) -> Result<ElementType, ConstructionError> {
        expect_input(self.name(), input, ElementType::Events, ElementType::Events)
    }

    fn instantiate(&self, input: OperatorInput, _ctrl: Ctrl) -> Result<OperatorOutput, OperatorError> {
        match input {
            OperatorInput::Events(input) => Ok(OperatorOutput::Events(fail_after(
                input,
                self.count,
                self.message.clone(),
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

    fn deterministic(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::local::{run_local, LocalControl};
    use crate::source::sequence_batches;

    #[test]
    fn test_fails_mid_batch() {
        let err = run_local::<EventBatch, EventBatch>(
            &FailAfter::new(4, "boom"),
            Arc::new(LocalControl::default()),
            sequence_batches(10, 3),
        )
        .expect_err("fails");
        assert_eq!(err, OperatorError::Exec("boom".into()));
    }

    #[test]
    fn test_enough_budget_never_fails() {
        let out: Vec<EventBatch> = run_local(
            &FailAfter::new(10, "boom"),
            Arc::new(LocalControl::default()),
            sequence_batches(10, 3),
        )
        .expect("no failure");
        assert_eq!(out.iter().map(EventBatch::rows).sum::<usize>(), 10);
    }
}
