//! Pipelines defined in YAML, run through the executor.

mod common;

use common::Observed;
use flowline_core::error::ConstructionError;
use flowline_core::manifest::RunState;
use flowline_exec::PipelineExecutor;
use flowline_operators::Registry;
use flowline_planner::load_pipeline;

const JSON_ROUND_TRIP: &str = r#"
config:
  metrics_interval_ms: 50
  events_demand: { min_elements: 2, max_elements: 8, max_batches: 2 }
steps:
  - op: from_events
    count: 40
    batch_size: 6
  - op: write_json
  - op: read_json
  - op: where
    expression: "id >= 37"
  - op: discard
"#;

#[tokio::test]
async fn test_yaml_pipeline_runs_end_to_end() {
    let (pipeline, config) = load_pipeline(JSON_ROUND_TRIP, &Registry::with_builtins()).expect("load");
    assert_eq!(config.events_demand.max_elements, 8);
    assert_eq!(pipeline.len(), 5);

    let observed = Observed::new();
    let mut executor = PipelineExecutor::new(pipeline, config, observed.receivers());
    let report = executor.run().await.expect("run");
    assert_eq!(report.state, RunState::Finished, "{:?}", report.error);

    let latest = observed.metrics.latest();
    let discard = latest
        .values()
        .find(|m| m.operator_name == "discard")
        .expect("discard metrics");
    assert_eq!(discard.inbound.elements, 3);
    let source = latest
        .values()
        .find(|m| m.operator_name == "from_events")
        .expect("source metrics");
    assert_eq!(source.outbound.elements, 40);
}

#[test]
fn test_collect_cannot_come_from_a_definition() {
    let src = "steps:\n  - op: from_events\n    count: 1\n  - op: collect\n";
    let err = load_pipeline(src, &Registry::with_builtins()).expect_err("collect");
    assert!(matches!(err, ConstructionError::InvalidArgument { ref operator, .. } if operator == "collect"));
}

#[test]
fn test_ill_typed_definition_is_rejected() {
    let src = "steps:\n  - op: from_events\n    count: 1\n  - op: read_json\n  - op: discard\n";
    let err = load_pipeline(src, &Registry::with_builtins()).expect_err("events into read_json");
    assert!(matches!(err, ConstructionError::TypeMismatch { ref operator, .. } if operator == "read_json"));
}
