//! Executor control: pause, resume, abort, and asynchronous sub-requests.

mod common;

use std::time::Duration;

use common::{ids, tight_demand, Enrich, Metered, Observed, Ticker};
use flowline_core::config::EngineConfig;
use flowline_core::error::{Error, OperatorError, SystemError};
use flowline_core::id::OperatorIndex;
use flowline_core::manifest::RunState;
use flowline_operators::builtins::{Collect, Discard, FromEvents};
use flowline_planner::{optimize_to_fixpoint, Pipeline};

fn ticker(count: u64, every_ms: u64) -> Box<Ticker> {
    Box::new(Ticker {
        count,
        every: Duration::from_millis(every_ms),
    })
}

#[tokio::test]
async fn test_pause_stops_flow_and_resume_continues() {
    let observed = Observed::new();
    let collect = Collect::default();
    let collector = collect.collector().clone();
    let mut executor = observed.executor(vec![ticker(30, 10), Box::new(collect)], EngineConfig::default());
    executor.start().await.expect("start");

    tokio::time::sleep(Duration::from_millis(50)).await;
    executor.pause().await.expect("pause");
    let at_pause = ids(&collector).len();
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(ids(&collector).len(), at_pause);
    assert!(at_pause < 30);

    executor.resume().await.expect("resume");
    let report = executor.wait().await.expect("wait");
    assert!(report.is_success(), "{:?}", report.error);
    assert_eq!(ids(&collector), (0..30).collect::<Vec<_>>());

    let source = &observed.metrics.latest()[&OperatorIndex::new(0)];
    assert!(source.time_paused >= Duration::from_millis(80));
}

#[tokio::test]
async fn test_abort_cancels_run_and_reports_reason() {
    let observed = Observed::new();
    let collect = Collect::default();
    let collector = collect.collector().clone();
    let mut executor = observed.executor(vec![ticker(1000, 5), Box::new(collect)], EngineConfig::default());
    executor.start().await.expect("start");
    tokio::time::sleep(Duration::from_millis(30)).await;
    executor.abort("operator request");

    let report = executor.wait().await.expect("wait");
    assert_eq!(report.state, RunState::Cancelled);
    assert!(report.error.is_none());
    assert!(ids(&collector).len() < 1000);
    let warnings = observed.diagnostics.warnings();
    assert!(warnings
        .iter()
        .any(|w| w.diagnostic.message == "run aborted: operator request" && w.operator.is_none()));
}

#[tokio::test]
async fn test_abort_handle_from_another_task() {
    let observed = Observed::new();
    let mut executor = observed.executor(vec![ticker(1000, 5), Box::new(Discard)], EngineConfig::default());
    let handle = executor.abort_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.abort("deadline");
    });
    let report = executor.run().await.expect("run");
    assert_eq!(report.state, RunState::Cancelled);
    assert_eq!(report.manifest.state, RunState::Cancelled);
}

#[tokio::test]
async fn test_pause_before_start_is_rejected() {
    let observed = Observed::new();
    let executor = observed.executor(
        vec![Box::new(FromEvents::sequence(1)), Box::new(Discard)],
        EngineConfig::default(),
    );
    let err = executor.pause().await.expect_err("not running");
    assert!(matches!(err.source, Error::System(SystemError::InvalidState(_))));
}

#[tokio::test]
async fn test_sub_requests_complete_without_blocking() {
    let observed = Observed::new();
    let collect = Collect::default();
    let collector = collect.collector().clone();
    let mut executor = observed.executor(
        vec![
            Box::new(FromEvents::sequence(12).with_batch_size(3)),
            Box::new(Enrich {
                latency: Duration::from_millis(5),
                timeout: Duration::from_secs(5),
            }),
            Box::new(collect),
        ],
        EngineConfig::default(),
    );
    let report = executor.run().await.expect("run");
    assert!(report.is_success(), "{:?}", report.error);
    assert_eq!(ids(&collector), (0..12).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_sub_request_timeout_fails_the_run() {
    let observed = Observed::new();
    let mut executor = observed.executor(
        vec![
            Box::new(FromEvents::sequence(3)),
            Box::new(Enrich {
                latency: Duration::from_millis(500),
                timeout: Duration::from_millis(20),
            }),
            Box::new(Discard),
        ],
        EngineConfig::default(),
    );
    let report = executor.run().await.expect("run");
    assert_eq!(report.state, RunState::Failed);
    assert_eq!(
        report.error.map(|e| e.source),
        Some(Error::Operator(OperatorError::Timeout(Duration::from_millis(20))))
    );
}

#[tokio::test]
async fn test_metrics_are_emitted_periodically() {
    let observed = Observed::new();
    let config = EngineConfig {
        metrics_interval_ms: 10,
        ..EngineConfig::default()
    };
    let mut executor = observed.executor(vec![ticker(10, 10), Box::new(Discard)], config);
    assert!(executor.run().await.expect("run").is_success());

    let source_records = observed
        .metrics
        .operators()
        .into_iter()
        .filter(|m| m.operator_index == OperatorIndex::new(0))
        .count();
    assert!(source_records > 1, "only {source_records} records");
    let latest = observed.metrics.latest();
    assert_eq!(latest[&OperatorIndex::new(0)].outbound.elements, 10);
    assert_eq!(latest[&OperatorIndex::new(1)].inbound.elements, 10);
    assert!(latest.values().all(|m| m.run_id == executor.run_id()));
}

#[tokio::test]
async fn test_operator_samples_and_demand_reach_the_run() {
    let observed = Observed::new();
    let metered = Metered::default();
    let collect = Collect::default();
    let collector = collect.collector().clone();
    let mut executor = observed.executor(
        vec![
            Box::new(FromEvents::sequence(30).with_batch_size(10)),
            Box::new(metered.clone()),
            Box::new(collect),
        ],
        tight_demand(4),
    );
    let report = executor.run().await.expect("run");
    assert!(report.is_success(), "{:?}", report.error);
    assert_eq!(ids(&collector), (0..30).collect::<Vec<_>>());

    let reads = metered.reads();
    assert!(!reads.is_empty());
    for (demand, emitted) in &reads {
        assert!(*demand <= 4, "demand {demand} above the granted window");
        assert!(emitted <= demand, "emitted {emitted} with demand {demand}");
    }
    assert_eq!(reads.iter().map(|(_, emitted)| emitted).sum::<u64>(), 30);

    let metered_index = observed
        .metrics
        .latest()
        .values()
        .find(|m| m.operator_name == "metered")
        .expect("metered metrics")
        .operator_index;
    let samples = observed.metrics.samples();
    assert_eq!(samples.len(), reads.len());
    for (run_id, index, sample) in &samples {
        assert_eq!(*run_id, report.run_id);
        assert_eq!(*index, metered_index);
        assert_eq!(sample.key, "metered.piece");
    }
    assert_eq!(samples.iter().map(|(_, _, s)| s.events).sum::<u64>(), 30);
}

#[test]
fn test_optimizing_twice_changes_nothing() {
    let pipeline = Pipeline::new(vec![
        Box::new(FromEvents::sequence(10)),
        Box::new(flowline_operators::builtins::Where::parse("id > 3").expect("expr")),
        Box::new(flowline_operators::builtins::Tail::new(2)),
        Box::new(Discard),
    ])
    .expect("pipeline");
    let once = optimize_to_fixpoint(&pipeline, 8);
    let twice = optimize_to_fixpoint(&once, 8);
    assert_eq!(once.to_specs(), twice.to_specs());
}
