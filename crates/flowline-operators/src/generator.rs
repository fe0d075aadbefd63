//! Lazy element sequences between an operator and its execution node.
//!
//! An operator body is a plain iterator driven one step at a time by the
//! node hosting it. Suspension is explicit:
//! - the input side yields an *empty* element when nothing is buffered yet
//!   and `None` once upstream has finished and the buffer is drained;
//! - the output side yields an empty element to say "nothing to emit right
//!   now", `Err` for an unrecovered failure, and `None` when done.
//!
//! Per-element-type overloads are resolved once, when the operator matches on
//! `OperatorInput` in `instantiate`; inner loops are generic over `Element`.

use flowline_core::element::{Chunk, Element, ElementType};
use flowline_core::error::OperatorError;
use flowline_core::types::EventBatch;

pub type Input<T> = Box<dyn Iterator<Item = T> + Send>;

pub type Output<T> = Box<dyn Iterator<Item = Result<T, OperatorError>> + Send>;

pub enum OperatorInput {
    Void,
    Bytes(Input<Chunk>),
    Events(Input<EventBatch>),
}

impl OperatorInput {
    pub fn element_type(&self) -> ElementType {
        match self {
            OperatorInput::Void => ElementType::Void,
            OperatorInput::Bytes(_) => ElementType::Bytes,
            OperatorInput::Events(_) => ElementType::Events,
        }
    }
}

impl std::fmt::Debug for OperatorInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "OperatorInput::{}", self.element_type())
    }
}

pub enum OperatorOutput {
    Void(Output<()>),
    Bytes(Output<Chunk>),
    Events(Output<EventBatch>),
}

impl OperatorOutput {
    pub fn element_type(&self) -> ElementType {
        match self {
            OperatorOutput::Void(_) => ElementType::Void,
            OperatorOutput::Bytes(_) => ElementType::Bytes,
            OperatorOutput::Events(_) => ElementType::Events,
        }
    }
}

impl std::fmt::Debug for OperatorOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "OperatorOutput::{}", self.element_type())
    }
}

/// Moves typed sequences in and out of the tagged wrappers.
pub trait ElementIo: Element {
    fn wrap_input(input: Input<Self>) -> OperatorInput;

    fn wrap_output(output: Output<Self>) -> OperatorOutput;

    fn unwrap_output(output: OperatorOutput) -> Option<Output<Self>>;
}

impl ElementIo for () {
    fn wrap_input(_input: Input<Self>) -> OperatorInput {
        OperatorInput::Void
    }

    fn wrap_output(output: Output<Self>) -> OperatorOutput {
        OperatorOutput::Void(output)
    }

    fn unwrap_output(output: OperatorOutput) -> Option<Output<Self>> {
        match output {
            OperatorOutput::Void(gen) => Some(gen),
            _ => None,
        }
    }
}

impl ElementIo for Chunk {
    fn wrap_input(input: Input<Self>) -> OperatorInput {
        OperatorInput::Bytes(input)
    }

    fn wrap_output(output: Output<Self>) -> OperatorOutput {
        OperatorOutput::Bytes(output)
    }

    fn unwrap_output(output: OperatorOutput) -> Option<Output<Self>> {
        match output {
            OperatorOutput::Bytes(gen) => Some(gen),
            _ => None,
        }
    }
}

impl ElementIo for EventBatch {
    fn wrap_input(input: Input<Self>) -> OperatorInput {
        OperatorInput::Events(input)
    }

    fn wrap_output(output: Output<Self>) -> OperatorOutput {
        OperatorOutput::Events(output)
    }

    fn unwrap_output(output: OperatorOutput) -> Option<Output<Self>> {
        match output {
            OperatorOutput::Events(gen) => Some(gen),
            _ => None,
        }
    }
}

/// Identity transformation, used by operators that only observe elements.
pub fn forward<T: Element>(input: Input<T>) -> Output<T> {
    Box::new(input.map(Ok))
}

/// Drain a sequence into a sink output: one `()` per input step.
pub fn drain<T, F>(input: Input<T>, mut on_element: F) -> Output<()>
where
    T: Element,
    F: FnMut(T) -> Result<(), OperatorError> + Send + 'static,
{
    Box::new(input.map(move |item| {
        if item.size() > 0 {
            on_element(item)?;
        }
        Ok(())
    }))
}

/// Feed a fixed list of elements, e.g. for tests or in-memory sources.
pub fn from_vec<T: Element>(items: Vec<T>) -> Input<T> {
    Box::new(items.into_iter())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unwrap_output_checks_tag() {
        let out = <Chunk as ElementIo>::wrap_output(forward(from_vec(vec![Chunk::new(vec![1])])));
        assert_eq!(out.element_type(), ElementType::Bytes);
        assert!(<EventBatch as ElementIo>::unwrap_output(out).is_none());
    }

    #[test]
    fn test_drain_skips_empty_elements() {
        use std::sync::{Arc, Mutex};
        let seen = Arc::new(Mutex::new(0usize));
        let counter = Arc::clone(&seen);
        let input = from_vec(vec![Chunk::new(vec![1, 2]), Chunk::default(), Chunk::new(vec![3])]);
        let steps = drain(input, move |c: Chunk| {
            *counter.lock().expect("lock") += c.len();
            Ok(())
        })
        .count();
        assert_eq!(steps, 3);
        assert_eq!(*seen.lock().expect("lock"), 3);
    }
}
