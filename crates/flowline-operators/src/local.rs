//! Drive a single operator in the calling thread, without an executor.
//!
//! Used by operator unit tests and by tooling that wants to check an
//! operator's output for a fixed input. There is no backpressure here: the
//! whole input is available up front and demand is unbounded unless set.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use flowline_core::catalog::{Catalog, Concepts, StaticCatalog};
use flowline_core::diagnostic::Diagnostic;
use flowline_core::error::OperatorError;
use flowline_core::id::{OperatorIndex, RunId};
use flowline_core::metrics::MetricSample;
use flowline_core::schema::Schema;

use crate::control::{ControlPlane, Ctrl};
use crate::generator::{ElementIo, Input};
use crate::traits::Operator;

/// Upper bound on consecutive steps without input, output, or a wake-up.
const MAX_IDLE_STEPS: usize = 100_000;

pub struct LocalControl {
    run_id: RunId,
    runtime: Option<tokio::runtime::Handle>,
    demand: AtomicU64,
    waiting: AtomicBool,
    wake_at: Mutex<Option<Instant>>,
    stopped: Mutex<Option<Option<OperatorError>>>,
    warnings: Mutex<Vec<Diagnostic>>,
    samples: Mutex<Vec<MetricSample>>,
    catalog: StaticCatalog,
}

impl Default for LocalControl {
    fn default() -> Self {
        Self::new(StaticCatalog::default())
    }
}

impl LocalControl {
    pub fn new(catalog: StaticCatalog) -> Self {
        Self {
            run_id: RunId::generate(),
            runtime: tokio::runtime::Handle::try_current().ok(),
            demand: AtomicU64::new(u64::MAX),
            waiting: AtomicBool::new(false),
            wake_at: Mutex::new(None),
            stopped: Mutex::new(None),
            warnings: Mutex::new(Vec::new()),
            samples: Mutex::new(Vec::new()),
            catalog,
        }
    }

    pub fn set_demand(&self, demand: u64) {
        self.demand.store(demand, Ordering::SeqCst);
    }

    pub fn warnings(&self) -> Vec<Diagnostic> {
        self.warnings.lock().map(|w| w.clone()).unwrap_or_default()
    }

    pub fn samples(&self) -> Vec<MetricSample> {
        self.samples.lock().map(|s| s.clone()).unwrap_or_default()
    }

    fn take_stop(&self) -> Option<Option<OperatorError>> {
        self.stopped.lock().ok().and_then(|mut s| s.take())
    }

    /// Block until a scheduled wake-up is due.
    fn wait_if_suspended(&self) -> bool {
        if !self.waiting.load(Ordering::SeqCst) {
            return false;
        }
        let due = self.wake_at.lock().ok().and_then(|mut w| w.take());
        if let Some(due) = due {
            let now = Instant::now();
            if due > now {
                std::thread::sleep(due - now);
            }
            self.waiting.store(false, Ordering::SeqCst);
            return true;
        }
        // Waiting on a sub-request: give it a moment to land.
        std::thread::sleep(Duration::from_millis(1));
        true
    }
}

impl ControlPlane for LocalControl {
    fn run_id(&self) -> RunId {
        self.run_id
    }

    fn operator_index(&self) -> OperatorIndex {
        OperatorIndex::new(0)
    }

    fn runtime(&self) -> Option<tokio::runtime::Handle> {
        self.runtime.clone()
    }

    fn schedule_wake(&self, after: Duration) {
        self.waiting.store(true, Ordering::SeqCst);
        if let Ok(mut w) = self.wake_at.lock() {
            let due = Instant::now() + after;
            *w = Some(w.map_or(due, |prev| prev.min(due)));
        }
    }

    fn suspend(&self) {
        self.waiting.store(true, Ordering::SeqCst);
    }

    fn wake(&self) {
        self.waiting.store(false, Ordering::SeqCst);
    }

    fn stop(&self, error: Option<OperatorError>) {
        if let Ok(mut s) = self.stopped.lock() {
            s.get_or_insert(error);
        }
    }

    fn warn(&self, diagnostic: Diagnostic) {
        if let Ok(mut w) = self.warnings.lock() {
            if !w.contains(&diagnostic) {
                w.push(diagnostic);
            }
        }
    }

    fn emit(&self, sample: MetricSample) {
        if let Ok(mut s) = self.samples.lock() {
            s.push(sample);
        }
    }

    fn demand(&self, _schema: Option<&str>) -> u64 {
        self.demand.load(Ordering::SeqCst)
    }

    fn schemas(&self) -> Vec<Arc<Schema>> {
        self.catalog.schemas()
    }

    fn concepts(&self) -> Concepts {
        self.catalog.concepts()
    }

    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Instantiate `op` over `input` and collect every non-empty output element.
pub fn run_local<I, O>(
    op: &dyn Operator,
    ctrl: Arc<LocalControl>,
    input: Vec<I>,
) -> Result<Vec<O>, OperatorError>
where
    I: ElementIo,
    O: ElementIo,
{
    let pulled = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&pulled);
    let input: Input<I> = Box::new(input.into_iter().inspect(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    }));
    let shared: Ctrl = ctrl.clone();
    let output = op.instantiate(I::wrap_input(input), shared)?;
    let actual = output.element_type();
    let mut gen = O::unwrap_output(output).ok_or_else(|| {
        OperatorError::Exec(format!("`{}` produced {actual}, expected {}", op.name(), O::TYPE))
    })?;

    let mut out = Vec::new();
    let mut idle = 0usize;
    let mut last_pulled = 0u64;
    loop {
        if let Some(stop) = ctrl.take_stop() {
            return match stop {
                Some(err) => Err(err),
                None => Ok(out),
            };
        }
        if ctrl.wait_if_suspended() {
            idle = 0;
            continue;
        }
        match gen.next() {
            None => return Ok(out),
            Some(Err(err)) => return Err(err),
            Some(Ok(item)) if item.size() > 0 => {
                idle = 0;
                out.push(item);
            }
            Some(Ok(_)) => {
                let now_pulled = pulled.load(Ordering::SeqCst);
                if now_pulled != last_pulled {
                    last_pulled = now_pulled;
                    idle = 0;
                    continue;
                }
                idle += 1;
                if idle > MAX_IDLE_STEPS {
                    return Err(OperatorError::Exec(format!(
                        "`{}` made no progress",
                        op.name()
                    )));
                }
            }
        }
    }
}
