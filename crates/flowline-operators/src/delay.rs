//! `pass` and `delay`: operators that never change what flows through.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use flowline_core::element::{Element, ElementType};
use flowline_core::error::{ConstructionError, OperatorError};
use flowline_core::expr::Expression;

use crate::control::Ctrl;
use crate::generator::{forward, Input, OperatorInput, OperatorOutput, Output};
use crate::optimize::{eliminate, EventOrder, OptimizeResult};
use crate::registry::{parse_config, to_config};
use crate::traits::{unexpected_input, Operator};

fn same_type(operator: &str, input: ElementType) -> Result<ElementType, ConstructionError> {
    match input {
        ElementType::Void => Err(ConstructionError::TypeMismatch {
            operator: operator.to_string(),
            input,
        }),
        other => Ok(other),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pass;

impl Pass {
    pub fn from_config(_config: &Value) -> Result<Box<dyn Operator>, ConstructionError> {
        Ok(Box::new(Pass))
    }
}

impl Operator for Pass {
    fn name(&self) -> &'static str {
        "pass"
    }

    fn infer_type(&self, input: ElementType) -> Result<ElementType, ConstructionError> {
        same_type(self.name(), input)
    }

    fn instantiate(&self, input: OperatorInput, _ctrl: Ctrl) -> Result<OperatorOutput, OperatorError> {
        match input {
            OperatorInput::Bytes(input) => Ok(OperatorOutput::Bytes(forward(input))),
            OperatorInput::Events(input) => Ok(OperatorOutput::Events(forward(input))),
            other => Err(unexpected_input(self.name(), &other)),
        }
    }

    fn config(&self) -> Value {
        Value::Object(Default::default())
    }

    fn copy(&self) -> Box<dyn Operator> {
        Box::new(Pass)
    }

    fn optimize(&self, filter: &Expression, _order: EventOrder) -> OptimizeResult {
        eliminate(filter.clone())
    }
}

/// Hold every element back for a fixed duration after it arrived.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delay {
    pub duration_ms: u64,
}

impl Delay {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
        }
    }

    pub fn from_config(config: &Value) -> Result<Box<dyn Operator>, ConstructionError> {
        let op: Delay = parse_config("delay", config)?;
        Ok(Box::new(op))
    }
}

fn delay<T: Element>(mut input: Input<T>, after: Duration, ctrl: Ctrl) -> Output<T> {
    if after.is_zero() {
        return forward(input);
    }
    let mut pending: VecDeque<(Instant, T)> = VecDeque::new();
    let mut input_done = false;
    Box::new(std::iter::from_fn(move || {
        if !input_done {
            match input.next() {
                Some(item) if item.size() > 0 => pending.push_back((Instant::now() + after, item)),
                Some(_) => {}
                None => input_done = true,
            }
        }
        let now = Instant::now();
        match pending.front() {
            Some((due, _)) if *due <= now => pending.pop_front().map(|(_, item)| Ok(item)),
            Some((due, _)) => {
                ctrl.schedule_wake(*due - now);
                Some(Ok(T::default()))
            }
            None if input_done => None,
            None => Some(Ok(T::default())),
        }
    }))
}

impl Operator for Delay {
    fn name(&self) -> &'static str {
        "delay"
    }

    fn infer_type(&self, input: ElementType) -> Result<ElementType, ConstructionError> {
        same_type(self.name(), input)
    }

    fn instantiate(&self, input: OperatorInput, ctrl: Ctrl) -> Result<OperatorOutput, OperatorError> {
        let after = Duration::from_millis(self.duration_ms);
        match input {
            OperatorInput::Bytes(input) => Ok(OperatorOutput::Bytes(delay(input, after, ctrl))),
            OperatorInput::Events(input) => Ok(OperatorOutput::Events(delay(input, after, ctrl))),
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
