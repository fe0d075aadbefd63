//! Limiting operators.
//!
//! - `head n`: the first `n` events overall, then done.
//! - `limit n`: the first `n` events of every schema. Finishes only when
//!   input does, since a later schema may still have budget.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use flowline_core::element::{Element, ElementType};
use flowline_core::error::{ConstructionError, OperatorError};
use flowline_core::types::EventBatch;

use crate::control::Ctrl;
use crate::generator::{Input, OperatorInput, OperatorOutput, Output};
use crate::registry::{parse_config, to_config};
use crate::traits::{expect_input, unexpected_input, Operator};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Head {
    pub count: u64,
}

impl Head {
    pub fn new(count: u64) -> Self {
        Self { count }
    }

    pub fn from_config(config: &Value) -> Result<Box<dyn Operator>, ConstructionError> {
        let op: Head = parse_config("head", config)?;
        Ok(Box::new(op))
    }
}

fn head<T: Element>(mut input: Input<T>, count: u64) -> Output<T> {
    let mut remaining = count;
    Box::new(std::iter::from_fn(move || {
        if remaining == 0 {
            return None;
        }
        let item = input.next()?;
        let (taken, _) = item.split_at(remaining);
        remaining -= taken.size();
        Some(Ok(taken))
    }))
}

impl Operator for Head {
    fn name(&self) -> &'static str {
        "head"
    }

    fn infer_type(&self, input: ElementType) -> Result<ElementType, ConstructionError> {
        expect_input(self.name(), input, ElementType::Events, ElementType::Events)
    }

    fn instantiate(&self, input: OperatorInput, _ctrl: Ctrl) -> Result<OperatorOutput, OperatorError> {
        match input {
            OperatorInput::Events(input) => Ok(OperatorOutput::Events(head(input, self.count))),
            other => Err(unexpected_input(self.name(), &other)),
        }
    }

    fn config(&self) -> Value {
        to_config(self)
    }

    fn copy(&self) -> Box<dyn Operator> {
        Box::new(*self)
    }
}

/// Per-schema budget of a `limit`.
///
/// `remaining(schema)` starts at the budget and only ever decreases, by
/// exactly the number of rows `take` lets through.
#[derive(Debug, Clone)]
pub struct LimitState {
    budget: u64,
    remaining: HashMap<String, u64>,
}

impl LimitState {
    pub fn new(budget: u64) -> Self {
        Self {
            budget,
            remaining: HashMap::new(),
        }
    }

    pub fn remaining(&self, schema: &str) -> u64 {
        self.remaining.get(schema).copied().unwrap_or(self.budget)
    }

    /// Consume up to `rows` from `schema`'s budget; returns how many may pass.
    pub fn take(&mut self, schema: &str, rows: u64) -> u64 {
        let budget = self.budget;
        let left = self.remaining.entry(schema.to_string()).or_insert(budget);
        let taken = rows.min(*left);
        *left -= taken;
        taken
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limit {
    pub count: u64,
}

impl Limit {
    pub fn new(count: u64) -> Self {
        Self { count }
    }

    pub fn from_config(config: &Value) -> Result<Box<dyn Operator>, ConstructionError> {
        let op: Limit = parse_config("limit", config)?;
        Ok(Box::new(op))
    }
}

fn limit(input: Input<EventBatch>, count: u64) -> Output<EventBatch> {
    let mut state = LimitState::new(count);
    Box::new(input.map(move |batch| {
        if batch.is_empty() {
            return Ok(batch);
        }
        let schema = batch.schema().name.clone();
        let taken = state.take(&schema, batch.size());
        let (head, _) = Element::split_at(batch, taken);
        Ok(head)
    }))
}

impl Operator for Limit {
    fn name(&self) -> &'static str {
        "limit"
    }

    fn infer_type(&self, input: ElementType) -> Result<ElementType, ConstructionError> {
        expect_input(self.name(), input, ElementType::Events, ElementType::Events)
    }

    fn instantiate(&self, input: OperatorInput, _ctrl: Ctrl) -> Result<OperatorOutput, OperatorError> {
        match input {
            OperatorInput::Events(input) => Ok(OperatorOutput::Events(limit(input, self.count))),
            other => Err(unexpected_input(self.name(), &other)),
        }
    }

    fn config(&self) -> Value {
        to_config(self)
    }

    fn copy(&self) -> Box<dyn Operator> {
        Box::new(*self)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::local::{run_local, LocalControl};
    use crate::source::sequence_batches;
    use flowline_core::schema::{DataType, Field, Schema};
    use flowline_core::types::Scalar;

    fn rows(out: &[EventBatch]) -> usize {
        out.iter().map(EventBatch::rows).sum()
    }

    fn named(schema: &str, n: i64) -> EventBatch {
        let schema = Arc::new(Schema::new(schema, vec![Field::new("n", DataType::Int64, false)]));
        EventBatch::from_rows(schema, (0..n).map(|i| vec![Scalar::I64(i)]).collect())
            .expect("batch")
    }

    #[test]
    fn test_head_splits_crossing_batch() {
        let out: Vec<EventBatch> = run_local(
            &Head::new(5),
            Arc::new(LocalControl::default()),
            sequence_batches(10, 3),
        )
        .expect("run");
        assert_eq!(rows(&out), 5);
        assert_eq!(out.last().and_then(|b| b.row(1)), Some(vec![Scalar::I64(4)]));
    }

    #[test]
    fn test_head_zero_finishes_without_reading() {
        let out: Vec<EventBatch> =
            run_local(&Head::new(0), Arc::new(LocalControl::default()), sequence_batches(3, 1))
                .expect("run");
        assert!(out.is_empty());
    }

    #[test]
    fn test_limit_budget_is_per_schema() {
        let input = vec![named("a", 2), named("b", 4), named("a", 4), named("b", 1)];
        let out: Vec<EventBatch> =
            run_local(&Limit::new(3), Arc::new(LocalControl::default()), input).expect("run");
        let count = |name: &str| -> usize {
            out.iter()
                .filter(|b| b.schema().name == name)
                .map(EventBatch::rows)
                .sum()
        };
        assert_eq!(count("a"), 3);
        assert_eq!(count("b"), 3);
    }

    #[test]
    fn test_limit_budget_decreases_by_emitted() {
        let mut state = LimitState::new(10);
        for chunk in [4u64, 0, 3, 7, 2] {
            let before = state.remaining("x");
            let taken = state.take("x", chunk);
            assert!(taken <= chunk);
            assert_eq!(state.remaining("x"), before - taken);
        }
        assert_eq!(state.remaining("x"), 0);
        assert_eq!(state.remaining("y"), 10);
    }
}
