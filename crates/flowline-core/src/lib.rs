#![forbid(unsafe_code)]
//! flowline-core: element types, schemas, expressions, diagnostics, and configs.
//!
//! Design intent:
//! - Pure data and small helpers only; no async runtime and no I/O here.
//! - Every collaborator interface the engine *consumes* (diagnostics handler,
//!   metrics receiver, catalog) is declared here so operators and the runtime
//!   agree on it without depending on each other.
//! - Errors are split by who raises them: construction, operator, system.

pub mod catalog;
pub mod config;
pub mod diagnostic;
pub mod element;
pub mod error;
pub mod expr;
pub mod hash;
pub mod id;
pub mod location;
pub mod manifest;
pub mod metrics;
pub mod prelude;
pub mod schema;
pub mod types;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
