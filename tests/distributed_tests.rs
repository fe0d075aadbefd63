//! Pipelines split between the client and a server.

mod common;

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::mpsc;

use common::{ids, Observed};
use flowline_core::config::EngineConfig;
use flowline_core::error::{ConstructionError, Error, SystemError};
use flowline_core::id::{LinkId, OperatorIndex, RunId};
use flowline_core::location::Placement;
use flowline_core::manifest::RunState;
use flowline_exec::{BoxFuture, Duplex, Frame, LoopbackTransport, ServerHost, Transport};
use flowline_operators::builtins::{Collect, Discard, FromEvents, Head};
use flowline_operators::{Operator, Registry};

fn server() -> Arc<ServerHost> {
    Arc::new(ServerHost::new(Handle::current(), Registry::with_builtins()))
}

fn ops(collect: Collect) -> Vec<Box<dyn Operator>> {
    vec![
        Box::new(FromEvents::sequence(50).with_batch_size(7)),
        Box::new(Head::new(20)),
        Box::new(collect),
    ]
}

#[tokio::test]
async fn test_split_run_matches_local_run() {
    let local_collect = Collect::default();
    let local_rows = local_collect.collector().clone();
    let observed = Observed::new();
    let mut local = observed.executor(ops(local_collect), EngineConfig::default());
    assert!(local.run().await.expect("local run").is_success());

    let split_collect = Collect::default();
    let split_rows = split_collect.collector().clone();
    let transport = LoopbackTransport::new();
    let observed = Observed::new();
    let mut split = observed
        .executor(ops(split_collect), EngineConfig::default())
        .with_server(server())
        .with_transport(Arc::new(transport.clone()))
        .with_override(0, Placement::Server);
    let report = split.run().await.expect("split run");
    assert!(report.is_success(), "{:?}", report.error);

    assert_eq!(ids(&split_rows), ids(&local_rows));
    assert_eq!(ids(&split_rows), (0..20).collect::<Vec<_>>());
    assert_eq!(transport.connections(), 1);
    let placements: Vec<Placement> = report.manifest.operators.iter().map(|e| e.placement).collect();
    assert_eq!(placements, vec![Placement::Server, Placement::Server, Placement::Client]);
}

#[tokio::test]
async fn test_local_operator_cannot_be_forced_onto_server() {
    let observed = Observed::new();
    let mut executor = observed
        .executor(ops(Collect::default()), EngineConfig::default())
        .with_server(server())
        .with_override(2, Placement::Server);
    let err = executor.start().await.expect_err("collect is local");
    assert!(matches!(
        err.source,
        Error::Construction(ConstructionError::InvalidArgument { ref operator, .. }) if operator == "collect"
    ));
}

#[tokio::test]
async fn test_failed_spawn_tears_down_started_nodes() {
    let observed = Observed::new();
    let collect = Collect::default();
    let rows = collect.collector().clone();
    let mut executor = observed
        .executor(ops(collect), EngineConfig::default())
        .with_server(Arc::new(ServerHost::new(Handle::current(), Registry::new())))
        .with_override(1, Placement::Server);
    let err = executor.start().await.expect_err("server knows no operators");
    assert!(matches!(
        err.source,
        Error::System(SystemError::Spawn { ref operator, .. }) if operator == "head"
    ));

    // The source was spawned, then cancelled and joined before `start` returned.
    let latest = observed.metrics.latest();
    let source = &latest[&OperatorIndex::new(0)];
    assert_eq!(source.outbound.elements, 0);
    assert!(!latest.contains_key(&OperatorIndex::new(1)));
    assert!(rows.payloads().is_empty());
    assert!(executor.wait().await.is_err());
}

/// Forwards the first `data_frames` data frames, then drops the connection.
struct FlakyTransport {
    data_frames: usize,
}

impl Transport for FlakyTransport {
    fn open(&self, _run_id: RunId, _link: LinkId) -> BoxFuture<'_, Result<(Duplex, Duplex), SystemError>> {
        let limit = self.data_frames;
        Box::pin(async move {
            let (client_tx, mut relay_rx) = mpsc::unbounded_channel();
            let (relay_tx, server_rx) = mpsc::unbounded_channel();
            let (server_tx, client_rx) = mpsc::unbounded_channel();
            tokio::spawn(async move {
                let mut forwarded = 0;
                while let Some(frame) = relay_rx.recv().await {
                    if matches!(frame, Frame::Data(_)) {
                        if forwarded == limit {
                            break;
                        }
                        forwarded += 1;
                    }
                    if relay_tx.send(frame).is_err() {
                        break;
                    }
                }
            });
            Ok((
                Duplex {
                    tx: client_tx,
                    rx: client_rx,
                },
                Duplex {
                    tx: server_tx,
                    rx: server_rx,
                },
            ))
        })
    }
}

#[tokio::test]
async fn test_lost_connection_fails_the_run() {
    let observed = Observed::new();
    let mut executor = observed
        .executor(
            vec![Box::new(FromEvents::sequence(100).with_batch_size(5)), Box::new(Discard)],
            EngineConfig::default(),
        )
        .with_server(server())
        .with_transport(Arc::new(FlakyTransport { data_frames: 2 }))
        .with_override(1, Placement::Server);
    let report = executor.run().await.expect("run");
    assert_eq!(report.state, RunState::Failed);
    let error = report.error.expect("error");
    assert!(matches!(error.source, Error::System(SystemError::ConnectionLost(_))), "{error}");
    assert_eq!(observed.diagnostics.errors().len(), 1);
}
