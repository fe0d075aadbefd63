#![forbid(unsafe_code)]
//! flowline-operators: the operator abstraction and the builtin operators.
//!
//! Design intent:
//! - An operator is a description; `instantiate` turns it into a lazy,
//!   synchronous element sequence. All scheduling belongs to the node that
//!   drives it (see `flowline-exec`).
//! - Element-type overloads are resolved once per instantiation; inner loops
//!   are generic over `Element`.
//! - Everything an operator may do to the outside world goes through the
//!   `ControlPlane` trait, so operators run unchanged under an executor or
//!   under `local::run_local`.

pub mod builtins;
pub mod control;
pub mod generator;
pub mod local;
pub mod optimize;
pub mod registry;
pub mod traits;

mod concept;
mod delay;
mod fail;
mod filter;
mod head;
mod json;
mod sink;
mod slice;
mod source;

pub use control::{request, ControlPlane, Ctrl, Pending};
pub use generator::{ElementIo, Input, OperatorInput, OperatorOutput, Output};
pub use optimize::{EventOrder, OptimizeResult, OrderEffect};
pub use registry::{OperatorSpec, Registry};
pub use traits::{Operator, Signature};

pub use json::print_batch;
pub use source::{sequence_batches, SEQUENCE_SCHEMA};
