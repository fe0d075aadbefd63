//! Sinks: `discard` drops everything, `collect` keeps it in memory.

use std::sync::{Arc, Mutex};

use serde_json::Value;

use flowline_core::element::{Chunk, Element, ElementType, Payload};
use flowline_core::error::{ConstructionError, OperatorError};
use flowline_core::expr::Expression;
use flowline_core::location::Location;
use flowline_core::types::EventBatch;

use crate::control::Ctrl;
use crate::generator::{drain, OperatorInput, OperatorOutput};
use crate::optimize::{EventOrder, OptimizeResult, OrderEffect};
use crate::traits::{unexpected_input, Operator};

fn sink_type(operator: &str, input: ElementType) -> Result<ElementType, ConstructionError> {
    match input {
        ElementType::Void => Err(ConstructionError::TypeMismatch {
            operator: operator.to_string(),
            input,
        }),
        _ => Ok(ElementType::Void),
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Discard;

impl Discard {
    pub fn from_config(_config: &Value) -> Result<Box<dyn Operator>, ConstructionError> {
        Ok(Box::new(Discard))
    }
}

impl Operator for Discard {
    fn name(&self) -> &'static str {
        "discard"
    }

    fn infer_type(&self, input: ElementType) -> Result<ElementType, ConstructionError> {
        sink_type(self.name(), input)
    }

    fn instantiate(&self, input: OperatorInput, _ctrl: Ctrl) -> Result<OperatorOutput, OperatorError> {
        match input {
            OperatorInput::Bytes(input) => Ok(OperatorOutput::Void(drain(input, |_| Ok(())))),
            OperatorInput::Events(input) => Ok(OperatorOutput::Void(drain(input, |_| Ok(())))),
            other => Err(unexpected_input(self.name(), &other)),
        }
    }

    fn config(&self) -> Value {
        Value::Object(Default::default())
    }

    fn copy(&self) -> Box<dyn Operator> {
        Box::new(Discard)
    }

    fn optimize(&self, _filter: &Expression, _order: EventOrder) -> OptimizeResult {
        OptimizeResult::new(Some(Expression::True), OrderEffect::Unordered, vec![self.copy()])
    }
}

/// Shared buffer a `collect` sink appends to.
#[derive(Debug, Clone, Default)]
pub struct Collector {
    items: Arc<Mutex<Vec<Payload>>>,
}

impl Collector {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, payload: Payload) -> Result<(), OperatorError> {
        self.items
            .lock()
            .map_err(|_| OperatorError::Exec("collector lock poisoned".into()))?
            .push(payload);
        Ok(())
    }

    pub fn payloads(&self) -> Vec<Payload> {
        self.items.lock().map(|i| i.clone()).unwrap_or_default()
    }

    pub fn events(&self) -> Vec<EventBatch> {
        self.payloads()
            .into_iter()
            .filter_map(EventBatch::from_payload)
            .collect()
    }

    pub fn chunks(&self) -> Vec<Chunk> {
        self.payloads()
            .into_iter()
            .filter_map(Chunk::from_payload)
            .collect()
    }

    /// Rows for events, bytes for chunks.
    pub fn total_size(&self) -> u64 {
        self.payloads()
            .iter()
            .map(|p| match p {
                Payload::Bytes(c) => c.size(),
                Payload::Events(b) => b.size(),
            })
            .sum()
    }
}

/// Sink appending everything to a [`Collector`]. Only runs on the client,
/// where the collector lives.
#[derive(Debug, Clone, Default)]
pub struct Collect {
    collector: Collector,
}

impl Collect {
    pub fn new(collector: Collector) -> Self {
        Self { collector }
    }

    pub fn collector(&self) -> &Collector {
        &self.collector
    }

    pub fn from_config(_config: &Value) -> Result<Box<dyn Operator>, ConstructionError> {
        Err(ConstructionError::invalid(
            "collect",
            "needs an in-process collector and cannot be built from a definition",
        ))
    }
}

impl Operator for Collect {
    fn name(&self) -> &'static str {
        "collect"
    }

    fn infer_type(&self, input: ElementType) -> Result<ElementType, ConstructionError> {
        sink_type(self.name(), input)
    }

    fn instantiate(&self, input: OperatorInput, _ctrl: Ctrl) -> Result<OperatorOutput, OperatorError> {
        let sink = self.collector.clone();
        match input {
            OperatorInput::Bytes(input) => Ok(OperatorOutput::Void(drain(input, move |c: Chunk| {
                sink.push(Payload::Bytes(c))
            }))),
            OperatorInput::Events(input) => {
                Ok(OperatorOutput::Void(drain(input, move |b: EventBatch| {
                    sink.push(Payload::Events(b))
                })))
            }
            other => Err(unexpected_input(self.name(), &other)),
        }
    }

    fn config(&self) -> Value {
        Value::Null
    }

    fn copy(&self) -> Box<dyn Operator> {
        Box::new(self.clone())
    }

    fn location(&self) -> Location {
        Location::Local
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::{run_local, LocalControl};
    use crate::source::sequence_batches;

    #[test]
    fn test_collect_shares_buffer_across_copies() {
        let op = Collect::default();
        let copy = op.copy();
        let _: Vec<()> =
            run_local(copy.as_ref(), Arc::new(LocalControl::default()), sequence_batches(7, 3))
                .expect("run");
        assert_eq!(op.collector().total_size(), 7);
        assert_eq!(op.collector().events().len(), 3);
    }

    #[test]
    fn test_discard_signature_is_sink() {
        let sig = Discard.signature();
        assert!(sig.sink && !sig.source && !sig.transformation);
        let res = Discard.optimize(&Expression::True, EventOrder::Ordered);
        assert_eq!(res.order, OrderEffect::Unordered);
    }
}
