//! A linear sequence of operators with the adjacency invariant
//! `output_type(op[i]) == input_type(op[i + 1])`.

use flowline_core::element::ElementType;
use flowline_core::error::{ConstructionError, Error};
use flowline_core::hash::Hash256;
use flowline_core::location::Location;
use flowline_operators::registry::{OperatorSpec, Registry};
use flowline_operators::traits::Operator;

#[derive(Default)]
pub struct Pipeline {
    operators: Vec<Box<dyn Operator>>,
}

impl Clone for Pipeline {
    fn clone(&self) -> Self {
        Self {
            operators: self.operators.iter().map(|op| op.copy()).collect(),
        }
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.operators.iter().map(|op| op.name()).collect();
        write!(f, "Pipeline({})", names.join(" | "))
    }
}

impl Pipeline {
    /// Build a pipeline, checking that some input type makes it well-typed.
    pub fn new(operators: Vec<Box<dyn Operator>>) -> Result<Self, ConstructionError> {
        let pipeline = Self { operators };
        pipeline.guess_input_type()?;
        Ok(pipeline)
    }

    /// Build without type checking; used for intermediate optimizer results.
    pub(crate) fn from_unchecked(operators: Vec<Box<dyn Operator>>) -> Self {
        Self { operators }
    }

    pub fn operators(&self) -> &[Box<dyn Operator>] {
        &self.operators
    }

    pub fn into_operators(self) -> Vec<Box<dyn Operator>> {
        self.operators
    }

    pub fn len(&self) -> usize {
        self.operators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }

    /// Append `other`, flattening it.
    pub fn append(&mut self, other: Pipeline) -> Result<(), ConstructionError> {
        self.operators.extend(other.operators);
        self.guess_input_type().map(|_| ())
    }

    /// Prepend `other`, flattening it.
    pub fn prepend(&mut self, other: Pipeline) -> Result<(), ConstructionError> {
        let mut ops = other.operators;
        ops.append(&mut self.operators);
        self.operators = ops;
        self.guess_input_type().map(|_| ())
    }

    pub fn push(&mut self, op: Box<dyn Operator>) -> Result<(), ConstructionError> {
        self.operators.push(op);
        self.guess_input_type().map(|_| ())
    }

    /// Output type for `input`, or the first type error along the way.
    pub fn infer_type(&self, input: ElementType) -> Result<ElementType, ConstructionError> {
        let mut current = input;
        for (i, op) in self.operators.iter().enumerate() {
            if i > 0 && current == ElementType::Void {
                return Err(ConstructionError::Pipeline(format!(
                    "pipeline continues with `{}` after sink",
                    op.name()
                )));
            }
            current = op.infer_type(current)?;
        }
        Ok(current)
    }

    /// The first input type (void, then events, then bytes) that type checks.
    pub fn guess_input_type(&self) -> Result<ElementType, ConstructionError> {
        let mut first_err = None;
        for guess in [ElementType::Void, ElementType::Events, ElementType::Bytes] {
            match self.infer_type(guess) {
                Ok(_) => return Ok(guess),
                Err(e) => {
                    // Prefer an error from past the first operator; it is the
                    // one that explains why an otherwise plausible input failed.
                    let accepted = self
                        .operators
                        .first()
                        .is_some_and(|op| op.infer_type(guess).is_ok());
                    if first_err.is_none() || accepted {
                        first_err = Some(e);
                    }
                }
            }
        }
        Err(first_err.unwrap_or_else(|| ConstructionError::Pipeline("empty pipeline".into())))
    }

    /// Void in, void out.
    pub fn is_closed(&self) -> bool {
        self.infer_type(ElementType::Void) == Ok(ElementType::Void)
    }

    pub fn check_runnable(&self) -> Result<(), ConstructionError> {
        let (Some(first), Some(last)) = (self.operators.first(), self.operators.last()) else {
            return Err(ConstructionError::Pipeline(
                "expected pipeline to start with a source".into(),
            ));
        };
        if first.infer_type(ElementType::Void).is_err() {
            return Err(ConstructionError::Pipeline(
                "expected pipeline to start with a source".into(),
            ));
        }
        let output = self.infer_type(ElementType::Void)?;
        if output != ElementType::Void {
            tracing::debug!(last = last.name(), %output, "pipeline is not closed");
            return Err(ConstructionError::Pipeline(
                "expected pipeline to end with a sink".into(),
            ));
        }
        Ok(())
    }

    /// Operators `[0, index)` and `[index, len)`.
    pub fn split_at(mut self, index: usize) -> (Pipeline, Pipeline) {
        let index = index.min(self.operators.len());
        let rest = self.operators.split_off(index);
        (self, Pipeline::from_unchecked(rest))
    }

    /// Split into sub-pipelines wherever the element type between two
    /// operators is void.
    pub fn split_at_void(self) -> Result<Vec<Pipeline>, ConstructionError> {
        let mut result: Vec<Pipeline> = Vec::new();
        let mut input: Option<ElementType> = None;
        for op in self.operators {
            if matches!(input, None | Some(ElementType::Void)) {
                result.push(Pipeline::default());
            }
            let output = match input {
                Some(ty) => op.infer_type(ty)?,
                None => op
                    .infer_type(ElementType::Void)
                    .or_else(|_| op.infer_type(ElementType::Events))
                    .or_else(|_| op.infer_type(ElementType::Bytes))?,
            };
            input = Some(output);
            if let Some(last) = result.last_mut() {
                last.operators.push(op);
            }
        }
        Ok(result)
    }

    /// The one location every operator agrees on, or `None` if a local-only
    /// and a remote-only operator are mixed.
    pub fn infer_location(&self) -> Option<Location> {
        let mut result = Location::Anywhere;
        for op in &self.operators {
            let loc = op.location();
            if result == Location::Anywhere {
                result = loc;
            } else if loc != Location::Anywhere && loc != result {
                return None;
            }
        }
        Some(result)
    }

    pub fn to_specs(&self) -> Vec<OperatorSpec> {
        self.operators
            .iter()
            .map(|op| OperatorSpec::of(op.as_ref()))
            .collect()
    }

    pub fn from_specs(registry: &Registry, specs: &[OperatorSpec]) -> Result<Self, ConstructionError> {
        let ops = specs
            .iter()
            .map(|spec| registry.make(spec))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(ops)
    }

    /// Stable content hash over the serialized operators.
    pub fn fingerprint(&self) -> Result<Hash256, Error> {
        Hash256::of_serde(&self.to_specs())
    }
}
