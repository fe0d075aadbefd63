//! Convenient re-exports for downstream crates.

pub use crate::catalog::{Catalog, Concepts, StaticCatalog};
pub use crate::config::{DemandSettings, EngineConfig};
pub use crate::diagnostic::{Diagnostic, DiagnosticHandler, RunDiagnostic, Severity};
pub use crate::element::{Chunk, Element, ElementType, Payload};
pub use crate::error::{ConstructionError, Error, OperatorError, Result, SystemError};
pub use crate::expr::{CmpOp, Expression};
pub use crate::id::{LinkId, OperatorIndex, RunId};
pub use crate::location::{Location, Placement};
pub use crate::manifest::{RunManifest, RunState};
pub use crate::metrics::{MetricSample, MetricsReceiver, OperatorMetric};
pub use crate::schema::{DataType, Field, Schema};
pub use crate::types::{Column, EventBatch, Scalar};
