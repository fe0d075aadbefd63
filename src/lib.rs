#![forbid(unsafe_code)]
//! flowline: build pipelines of operators and run them with backpressure,
//! optionally split across a client and a server.
//!
//! This crate only re-exports the workspace crates:
//! - `flowline_core`: elements, schemas, expressions, errors, config;
//! - `flowline_operators`: the operator trait and the builtin operators;
//! - `flowline_planner`: pipelines, the optimizer, placement, YAML;
//! - `flowline_exec`: execution nodes and the pipeline executor.

pub use flowline_core;
pub use flowline_exec;
pub use flowline_operators;
pub use flowline_planner;

pub use flowline_core::config::EngineConfig;
pub use flowline_core::error::{ConstructionError, Error, OperatorError, SystemError};
pub use flowline_exec::{PipelineExecutor, Receivers, RunError, RunReport};
pub use flowline_operators::{Operator, Registry};
pub use flowline_planner::Pipeline;
