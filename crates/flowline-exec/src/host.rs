//! Where nodes run.
//!
//! The executor always owns a `LocalHost` for the client side. A server side
//! is any `NodeHost` reporting `Placement::Server`; operators reach it in
//! serialized form and are rebuilt from its own registry.

use tokio::runtime::Handle;

use flowline_core::error::SystemError;
use flowline_core::location::Placement;
use flowline_operators::registry::{OperatorSpec, Registry};

use crate::node::{spawn_node, NodeHandle, ShippedOperator, SpawnRequest};
use crate::transport::BoxFuture;

pub trait NodeHost: Send + Sync {
    fn placement(&self) -> Placement;

    /// Instantiate the operator and start its node task (not yet stepping).
    fn spawn(&self, request: SpawnRequest) -> BoxFuture<'_, Result<NodeHandle, SystemError>>;
}

/// Runs nodes on the caller's tokio runtime.
pub struct LocalHost {
    registry: Registry,
}

impl LocalHost {
    pub fn new(registry: Registry) -> Self {
        Self { registry }
    }
}

impl Default for LocalHost {
    fn default() -> Self {
        Self::new(Registry::with_builtins())
    }
}

impl NodeHost for LocalHost {
    fn placement(&self) -> Placement {
        Placement::Client
    }

    fn spawn(&self, mut request: SpawnRequest) -> BoxFuture<'_, Result<NodeHandle, SystemError>> {
        Box::pin(async move {
            let runtime = Handle::try_current().map_err(|e| SystemError::Spawn {
                operator: request.operator.name(),
                message: e.to_string(),
            })?;
            request.placement = Placement::Client;
            spawn_node(&runtime, &self.registry, request)
        })
    }
}

/// The remote side of a run, on a runtime of its own choosing.
pub struct ServerHost {
    runtime: Handle,
    registry: Registry,
}

impl ServerHost {
    pub fn new(runtime: Handle, registry: Registry) -> Self {
        Self { runtime, registry }
    }
}

impl NodeHost for ServerHost {
    fn placement(&self) -> Placement {
        Placement::Server
    }

    fn spawn(&self, mut request: SpawnRequest) -> BoxFuture<'_, Result<NodeHandle, SystemError>> {
        Box::pin(async move {
            // Never share an instance across the boundary.
            if let ShippedOperator::Instance(op) = &request.operator {
                request.operator = ShippedOperator::Spec(OperatorSpec::of(op.as_ref()));
            }
            request.placement = Placement::Server;
            tracing::debug!(
                run_id = %request.run_id,
                index = request.index.get(),
                operator = %request.operator.name(),
                "spawning on server"
            );
            spawn_node(&self.runtime, &self.registry, request)
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::{mpsc, watch};

    use super::*;
    use crate::control::Receivers;
    use crate::link::link;
    use flowline_core::catalog::StaticCatalog;
    use flowline_core::config::EngineConfig;
    use flowline_core::diagnostic::NullDiagnostics;
    use flowline_core::element::ElementType;
    use flowline_core::id::{OperatorIndex, RunId};
    use flowline_core::metrics::NullMetrics;
    use flowline_operators::builtins::FromEvents;

    fn request(operator: ShippedOperator) -> (SpawnRequest, watch::Sender<bool>) {
        let (cancel, cancel_rx) = watch::channel(false);
        let (exits, _) = mpsc::unbounded_channel();
        let (outlet, _inlet) = link();
        (
            SpawnRequest {
                run_id: RunId::generate(),
                index: OperatorIndex::new(0),
                operator,
                input: ElementType::Void,
                output: ElementType::Events,
                placement: Placement::Client,
                inlet: None,
                outlet: Some(outlet),
                config: EngineConfig::default(),
                receivers: Receivers {
                    diagnostics: Arc::new(NullDiagnostics),
                    metrics: Arc::new(NullMetrics),
                    catalog: Arc::new(StaticCatalog::default()),
                },
                cancel: cancel_rx,
                exits,
            },
            cancel,
        )
    }

    #[tokio::test]
    async fn test_server_host_rebuilds_from_its_registry() {
        let host = ServerHost::new(Handle::current(), Registry::with_builtins());
        let (req, _cancel) = request(ShippedOperator::Instance(Box::new(FromEvents::sequence(3))));
        let handle = host.spawn(req).await.expect("spawn");
        assert_eq!(handle.placement, Placement::Server);
        assert_eq!(handle.name, "from_events");
        handle.cancel();
        handle.join().await;
    }

    #[tokio::test]
    async fn test_server_without_operator_refuses() {
        let host = ServerHost::new(Handle::current(), Registry::new());
        let (req, _cancel) = request(ShippedOperator::Instance(Box::new(FromEvents::sequence(3))));
        let err = host.spawn(req).await.expect_err("empty registry");
        assert!(matches!(err, SystemError::Spawn { .. }));
    }
}
