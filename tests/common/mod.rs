//! Helpers shared by the integration tests.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::{json, Value};

use flowline_core::config::{DemandSettings, EngineConfig};
use flowline_core::diagnostic::CollectingDiagnostics;
use flowline_core::element::{Element, ElementType};
use flowline_core::error::{ConstructionError, OperatorError};
use flowline_core::metrics::{CollectingMetrics, MetricSample};
use flowline_core::types::{EventBatch, Scalar};
use flowline_exec::{PipelineExecutor, Receivers};
use flowline_operators::builtins::Collector;
use flowline_operators::traits::{expect_input, unexpected_input};
use flowline_operators::{request, sequence_batches, Ctrl, Operator, OperatorInput, OperatorOutput, Pending};
use flowline_planner::Pipeline;

pub struct Observed {
    pub diagnostics: Arc<CollectingDiagnostics>,
    pub metrics: Arc<CollectingMetrics>,
}

impl Observed {
    pub fn new() -> Self {
        Self {
            diagnostics: Arc::new(CollectingDiagnostics::new()),
            metrics: Arc::new(CollectingMetrics::new()),
        }
    }

    pub fn receivers(&self) -> Receivers {
        Receivers::new(self.diagnostics.clone(), self.metrics.clone())
    }

    pub fn executor(&self, ops: Vec<Box<dyn Operator>>, config: EngineConfig) -> PipelineExecutor {
        let pipeline = Pipeline::new(ops).expect("valid pipeline");
        PipelineExecutor::new(pipeline, config, self.receivers())
    }
}

/// Values of the `id` column, in arrival order.
pub fn ids(collector: &Collector) -> Vec<i64> {
    collector
        .events()
        .iter()
        .filter_map(|batch| batch.column("id"))
        .flat_map(|column| column.values.iter())
        .filter_map(|value| match value {
            Scalar::I64(v) => Some(*v),
            _ => None,
        })
        .collect()
}

pub fn tight_demand(max_elements: u64) -> EngineConfig {
    EngineConfig {
        events_demand: DemandSettings {
            min_elements: 1,
            max_elements,
            max_batches: 1,
        },
        ..EngineConfig::default()
    }
}

/// Source emitting one sequence event per `every`, waiting on timers.
#[derive(Debug, Clone)]
pub struct Ticker {
    pub count: u64,
    pub every: Duration,
}

impl Operator for Ticker {
    fn name(&self) -> &'static str {
        "ticker"
    }

    fn infer_type(&self, input: ElementType) -> Result<ElementType, ConstructionError> {
        expect_input(self.name(), input, ElementType::Void, ElementType::Events)
    }

    fn instantiate(&self, input: OperatorInput, ctrl: Ctrl) -> Result<OperatorOutput, OperatorError> {
        if !matches!(input, OperatorInput::Void) {
            return Err(unexpected_input(self.name(), &input));
        }
        let mut batches = sequence_batches(self.count, 1).into_iter();
        let every = self.every;
        let mut next_due = Instant::now();
        Ok(OperatorOutput::Events(Box::new(std::iter::from_fn(move || {
            let now = Instant::now();
            if now < next_due {
                ctrl.schedule_wake(next_due - now);
                return Some(Ok(EventBatch::default()));
            }
            let batch = batches.next()?;
            next_due = now + every;
            Some(Ok(batch))
        }))))
    }

    fn config(&self) -> Value {
        json!({ "count": self.count, "every_ms": self.every.as_millis() as u64 })
    }

    fn copy(&self) -> Box<dyn Operator> {
        Box::new(self.clone())
    }
}

/// Sends every batch through a slow asynchronous lookup before emitting it.
#[derive(Debug, Clone)]
pub struct Enrich {
    pub latency: Duration,
    pub timeout: Duration,
}

impl Operator for Enrich {
    fn name(&self) -> &'static str {
        "enrich"
    }

    fn infer_type(&self, input: ElementType) -> Result<ElementType, ConstructionError> {
        expect_input(self.name(), input, ElementType::Events, ElementType::Events)
    }

    fn instantiate(&self, input: OperatorInput, ctrl: Ctrl) -> Result<OperatorOutput, OperatorError> {
        let mut input = match input {
            OperatorInput::Events(input) => input,
            other => return Err(unexpected_input(self.name(), &other)),
        };
        let latency = self.latency;
        let timeout = self.timeout;
        let mut pending: Option<Pending<EventBatch>> = None;
        Ok(OperatorOutput::Events(Box::new(std::iter::from_fn(move || {
            if let Some(lookup) = pending.take() {
                match lookup.take() {
                    Some(result) => return Some(result),
                    None => {
                        pending = Some(lookup);
                        return Some(Ok(EventBatch::default()));
                    }
                }
            }
            let batch = input.next()?;
            if batch.size() == 0 {
                return Some(Ok(batch));
            }
            pending = Some(request(&ctrl, timeout, async move {
                tokio::time::sleep(latency).await;
                batch
            }));
            Some(Ok(EventBatch::default()))
        }))))
    }

    fn config(&self) -> Value {
        json!({
            "latency_ms": self.latency.as_millis() as u64,
            "timeout_ms": self.timeout.as_millis() as u64,
        })
    }

    fn copy(&self) -> Box<dyn Operator> {
        Box::new(self.clone())
    }
}

/// Passes events on in pieces no larger than the downstream demand, and
/// reports one metric sample per piece.
#[derive(Debug, Clone, Default)]
pub struct Metered {
    /// `(demand read, rows emitted)` per emitted piece.
    pub reads: Arc<Mutex<Vec<(u64, u64)>>>,
}

impl Metered {
    pub fn reads(&self) -> Vec<(u64, u64)> {
        self.reads.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

impl Operator for Metered {
    fn name(&self) -> &'static str {
        "metered"
    }

    fn infer_type(&self, input: ElementType) -> Result<ElementType, ConstructionError> {
        expect_input(self.name(), input, ElementType::Events, ElementType::Events)
    }

    fn instantiate(&self, input: OperatorInput, ctrl: Ctrl) -> Result<OperatorOutput, OperatorError> {
        let mut input = match input {
            OperatorInput::Events(input) => input,
            other => return Err(unexpected_input(self.name(), &other)),
        };
        let reads = Arc::clone(&self.reads);
        let mut rest = EventBatch::default();
        Ok(OperatorOutput::Events(Box::new(std::iter::from_fn(move || {
            if rest.size() == 0 {
                rest = input.next()?;
                if rest.size() == 0 {
                    return Some(Ok(EventBatch::default()));
                }
            }
            let demand = ctrl.demand(Some(rest.schema().name.as_str()));
            if demand == 0 {
                return Some(Ok(EventBatch::default()));
            }
            let take = demand.min(rest.size()) as usize;
            let (piece, tail) = std::mem::take(&mut rest).split_at(take);
            rest = tail;
            if let Ok(mut reads) = reads.lock() {
                reads.push((demand, piece.size()));
            }
            ctrl.emit(MetricSample::new("metered.piece", Duration::ZERO, piece.size()));
            Some(Ok(piece))
        }))))
    }

    fn config(&self) -> Value {
        Value::Null
    }

    fn copy(&self) -> Box<dyn Operator> {
        Box::new(self.clone())
    }
}
