#![forbid(unsafe_code)]
//! flowline-exec: execution nodes, links, and the pipeline executor.
//!
//! Design:
//! - One tokio task per operator. A node steps its operator's generator and
//!   talks to neighbors only through channels: elements downstream, credit
//!   upstream. Nothing is pushed without credit.
//! - Operators see the node through `NodeControl`, the `ControlPlane`
//!   implementation; diagnostics and metrics leave through `Receivers`.
//! - Neighbors on different sides of the client/server boundary are joined
//!   by a `Transport` and a pair of bridge tasks.
//! - The executor spawns every node before starting any of them and turns
//!   the first node failure into a cancelled run with that error.

pub mod control;
pub mod executor;
pub mod host;
pub mod link;
mod metrics;
pub mod node;
pub mod transport;

pub use control::Receivers;
pub use executor::{AbortHandle, PipelineExecutor, RunError, RunReport};
pub use host::{LocalHost, NodeHost, ServerHost};
pub use link::{link, Flow, Inlet, Outlet};
pub use node::{NodeExit, NodeHandle, NodeOutcome, NodeState, ShippedOperator, SpawnRequest};
pub use transport::{BoxFuture, Duplex, Frame, LoopbackTransport, Transport};
