#![forbid(unsafe_code)]
//! flowline-planner: pipelines of operators → optimized pipeline → placed
//! physical plan.
//!
//! Design:
//! - `Pipeline` owns the operator sequence and its adjacency invariant;
//!   nested pipelines are flattened on composition.
//! - `rules` runs the sink-to-source pushdown protocol every operator
//!   answers, and repeats it up to a bounded number of passes.
//! - `placement` assigns each operator to the client or the server from its
//!   declared location; `physical` freezes the result with element types
//!   and serialized specs for the executor.
//! - `dsl` reads YAML definitions through the operator registry.
//!
//! NOTE: No runtime here. Executing a plan lives in `flowline-exec`.

pub mod dsl;
pub mod physical;
pub mod pipeline;
pub mod placement;
pub mod rules;

pub use dsl::yaml::{load_pipeline, parse_yaml_pipeline, ParsedPipeline};
pub use physical::{PhysicalPlan, PlannedStep};
pub use pipeline::Pipeline;
pub use placement::{crossings, plan_placements};
pub use rules::{optimize_if_closed, optimize_to_fixpoint, Optimized};
