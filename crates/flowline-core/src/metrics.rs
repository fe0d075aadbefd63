//! Metric records and the receiver interface they are pushed to.
//!
//! Two kinds of records exist:
//! - `MetricSample`: self-reported by an operator through its control plane.
//! - `OperatorMetric`: collected by the runtime for every node, periodically
//!   and once more when the node exits.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::element::ElementType;
use crate::id::{OperatorIndex, RunId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricSample {
    pub key: String,
    pub duration: Duration,
    pub events: u64,
    pub tags: BTreeMap<String, String>,
}

impl MetricSample {
    pub fn new(key: impl Into<String>, duration: Duration, events: u64) -> Self {
        Self {
            key: key.into(),
            duration,
            events,
            tags: BTreeMap::new(),
        }
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}

/// Volume that went through one side of a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Measurement {
    pub unit: ElementType,
    /// Rows for events, bytes for chunks.
    pub elements: u64,
    pub batches: u64,
    pub approx_bytes: u64,
}

impl Measurement {
    pub fn new(unit: ElementType) -> Self {
        Self {
            unit,
            elements: 0,
            batches: 0,
            approx_bytes: 0,
        }
    }

    pub fn record(&mut self, elements: u64, approx_bytes: u64) {
        self.elements += elements;
        self.batches += 1;
        self.approx_bytes += approx_bytes;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorMetric {
    pub run_id: RunId,
    pub operator_index: OperatorIndex,
    pub operator_name: String,
    pub inbound: Measurement,
    pub outbound: Measurement,
    pub time_starting: Duration,
    pub time_processing: Duration,
    pub time_scheduled: Duration,
    pub time_running: Duration,
    pub time_paused: Duration,
    pub time_total: Duration,
    pub num_runs: u64,
    pub num_runs_processing: u64,
    pub num_runs_processing_input: u64,
    pub num_runs_processing_output: u64,
    pub internal: bool,
}

impl OperatorMetric {
    pub fn new(
        run_id: RunId,
        operator_index: OperatorIndex,
        operator_name: impl Into<String>,
        input: ElementType,
        output: ElementType,
        internal: bool,
    ) -> Self {
        Self {
            run_id,
            operator_index,
            operator_name: operator_name.into(),
            inbound: Measurement::new(input),
            outbound: Measurement::new(output),
            time_starting: Duration::ZERO,
            time_processing: Duration::ZERO,
            time_scheduled: Duration::ZERO,
            time_running: Duration::ZERO,
            time_paused: Duration::ZERO,
            time_total: Duration::ZERO,
            num_runs: 0,
            num_runs_processing: 0,
            num_runs_processing_input: 0,
            num_runs_processing_output: 0,
            internal,
        }
    }
}

/// Receiver for metrics of one or more runs.
pub trait MetricsReceiver: Send + Sync {
    fn sample(&self, run_id: RunId, operator: OperatorIndex, sample: MetricSample);

    fn operator(&self, metric: OperatorMetric);
}

/// Keeps every record in memory.
#[derive(Debug, Default)]
pub struct CollectingMetrics {
    samples: Mutex<Vec<(RunId, OperatorIndex, MetricSample)>>,
    operators: Mutex<Vec<OperatorMetric>>,
}

impl CollectingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn samples(&self) -> Vec<(RunId, OperatorIndex, MetricSample)> {
        self.samples.lock().map(|v| v.clone()).unwrap_or_default()
    }

    pub fn operators(&self) -> Vec<OperatorMetric> {
        self.operators.lock().map(|v| v.clone()).unwrap_or_default()
    }

    /// Most recent record per operator index.
    pub fn latest(&self) -> BTreeMap<OperatorIndex, OperatorMetric> {
        let mut out = BTreeMap::new();
        for m in self.operators() {
            out.insert(m.operator_index, m);
        }
        out
    }
}

impl MetricsReceiver for CollectingMetrics {
    fn sample(&self, run_id: RunId, operator: OperatorIndex, sample: MetricSample) {
        if let Ok(mut v) = self.samples.lock() {
            v.push((run_id, operator, sample));
        }
    }

    fn operator(&self, metric: OperatorMetric) {
        if let Ok(mut v) = self.operators.lock() {
            v.push(metric);
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullMetrics;

impl MetricsReceiver for NullMetrics {
    fn sample(&self, _run_id: RunId, _operator: OperatorIndex, _sample: MetricSample) {}

    fn operator(&self, _metric: OperatorMetric) {}
}
