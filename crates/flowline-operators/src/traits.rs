//! Operator trait + common interfaces.
//!
//! An operator is a value describing one pipeline step. It is type checked
//! with `infer_type`, rewritten by `optimize`, shipped between processes via
//! `config`, and finally turned into a lazy output sequence by `instantiate`,
//! which runs inside an execution node.

use flowline_core::element::ElementType;
use flowline_core::error::{ConstructionError, OperatorError};
use flowline_core::expr::Expression;
use flowline_core::location::Location;

use crate::control::Ctrl;
use crate::generator::{OperatorInput, OperatorOutput};
use crate::optimize::{do_not_optimize, EventOrder, OptimizeResult};

/// Which roles an operator can play, derived from `infer_type`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Signature {
    /// Accepts void input.
    pub source: bool,
    /// Turns some non-void input into non-void output.
    pub transformation: bool,
    /// Produces void from some input.
    pub sink: bool,
}

/// Trait that all operators must implement.
///
/// Invariants:
/// - `infer_type` is pure; it must agree with what `instantiate` produces.
/// - `copy` followed by `config` yields the same config.
/// - `instantiate` performs no blocking work; any waiting goes through the
///   control plane.
pub trait Operator: Send + Sync + 'static {
    /// Registry name (stable).
    fn name(&self) -> &'static str;

    fn infer_type(&self, input: ElementType) -> Result<ElementType, ConstructionError>;

    fn instantiate(&self, input: OperatorInput, ctrl: Ctrl)
        -> Result<OperatorOutput, OperatorError>;

    /// Arguments in the form the registry factory accepts.
    fn config(&self) -> serde_json::Value;

    fn copy(&self) -> Box<dyn Operator>;

    fn location(&self) -> Location {
        Location::Anywhere
    }

    fn deterministic(&self) -> bool {
        true
    }

    /// Hidden from user-facing listings; metrics are tagged accordingly.
    fn internal(&self) -> bool {
        false
    }

    fn optimize(&self, _filter: &Expression, _order: EventOrder) -> OptimizeResult {
        do_not_optimize(self.copy())
    }

    fn signature(&self) -> Signature {
        let from_void = self.infer_type(ElementType::Void);
        let mut sig = Signature {
            source: from_void.is_ok(),
            sink: from_void == Ok(ElementType::Void),
            ..Signature::default()
        };
        for input in [ElementType::Bytes, ElementType::Events] {
            match self.infer_type(input) {
                Ok(ElementType::Void) => sig.sink = true,
                Ok(_) => sig.transformation = true,
                Err(_) => {}
            }
        }
        sig
    }
}

impl std::fmt::Debug for dyn Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.name(), self.config())
    }
}

/// `infer_type` for operators that only accept one input type.
pub fn expect_input(
    operator: &str,
    input: ElementType,
    expected: ElementType,
    output: ElementType,
) -> Result<ElementType, ConstructionError> {
    if input == expected {
        Ok(output)
    } else {
        Err(ConstructionError::TypeMismatch {
            operator: operator.to_string(),
            input,
        })
    }
}

/// Shorthand for a `TypeMismatch` raised from `instantiate`.
pub fn unexpected_input(operator: &str, input: &OperatorInput) -> OperatorError {
    OperatorError::Exec(format!("`{operator}` does not accept {}", input.element_type()))
}
