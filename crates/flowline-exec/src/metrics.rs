//! Tracing hooks for node lifecycle and metric snapshots.
//!
//! Metrics proper go to the run's `MetricsReceiver`; these helpers only
//! mirror them into `tracing` so a subscriber can follow a run without one.

use flowline_core::id::{OperatorIndex, RunId};
use flowline_core::metrics::OperatorMetric;

use crate::node::NodeState;

pub(crate) fn trace_lifecycle(run_id: RunId, index: OperatorIndex, operator: &str, state: NodeState) {
    tracing::trace!(%run_id, index = index.get(), operator, ?state, "node state");
}

pub(crate) fn trace_metric(metric: &OperatorMetric) {
    let span = tracing::trace_span!("operator_metric", run_id = %metric.run_id, index = metric.operator_index.get());
    let _enter = span.enter();
    tracing::trace!(
        operator = %metric.operator_name,
        inbound = metric.inbound.elements,
        outbound = metric.outbound.elements,
        runs = metric.num_runs,
        processing_us = metric.time_processing.as_micros() as u64,
        paused_us = metric.time_paused.as_micros() as u64,
        "metric"
    );
}
