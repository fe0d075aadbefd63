//! Control plane handed to operators running inside an execution node.
//!
//! The node and the operator's generator share one `NodeControl`. The
//! operator side only ever flips flags and pushes records; the node reads
//! those flags between steps.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{watch, Notify};
use tokio::time::Instant;

use flowline_core::catalog::{Catalog, Concepts, StaticCatalog};
use flowline_core::diagnostic::{Diagnostic, DiagnosticHandler, RunDiagnostic};
use flowline_core::error::OperatorError;
use flowline_core::id::{OperatorIndex, RunId};
use flowline_core::metrics::{MetricSample, MetricsReceiver};
use flowline_core::schema::Schema;
use flowline_operators::control::ControlPlane;

/// Collaborators a node reports to.
#[derive(Clone)]
pub struct Receivers {
    pub diagnostics: Arc<dyn DiagnosticHandler>,
    pub metrics: Arc<dyn MetricsReceiver>,
    pub catalog: Arc<dyn Catalog>,
}

impl Receivers {
    /// Receivers with an empty catalog.
    pub fn new(diagnostics: Arc<dyn DiagnosticHandler>, metrics: Arc<dyn MetricsReceiver>) -> Self {
        Self {
            diagnostics,
            metrics,
            catalog: Arc::new(StaticCatalog::default()),
        }
    }
}

pub(crate) struct NodeControl {
    run_id: RunId,
    index: OperatorIndex,
    name: String,
    runtime: tokio::runtime::Handle,
    strict: bool,
    receivers: Receivers,

    notify: Notify,
    suspended: AtomicBool,
    wake_at: Mutex<Option<Instant>>,
    stop: Mutex<Option<Option<OperatorError>>>,
    seen: Mutex<HashSet<Diagnostic>>,
    credit: AtomicU64,
    cancelled: watch::Sender<bool>,
}

impl std::fmt::Debug for NodeControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeControl")
            .field("run_id", &self.run_id)
            .field("index", &self.index)
            .field("name", &self.name)
            .field("cancelled", &*self.cancelled.borrow())
            .finish_non_exhaustive()
    }
}

impl NodeControl {
    pub(crate) fn new(
        run_id: RunId,
        index: OperatorIndex,
        name: impl Into<String>,
        runtime: tokio::runtime::Handle,
        strict: bool,
        receivers: Receivers,
    ) -> Self {
        Self {
            run_id,
            index,
            name: name.into(),
            runtime,
            strict,
            receivers,
            notify: Notify::new(),
            suspended: AtomicBool::new(false),
            wake_at: Mutex::new(None),
            stop: Mutex::new(None),
            seen: Mutex::new(HashSet::new()),
            credit: AtomicU64::new(u64::MAX),
            cancelled: watch::channel(false).0,
        }
    }

    pub(crate) fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::SeqCst)
    }

    /// Resolves on the next `wake`, or immediately if one is pending.
    pub(crate) async fn woken(&self) {
        self.notify.notified().await
    }

    /// The scheduled wake-up. A due one is handed out once and cleared.
    pub(crate) fn wake_deadline(&self) -> Option<Instant> {
        let mut slot = self.wake_at.lock().ok()?;
        match *slot {
            Some(due) if due <= Instant::now() => slot.take(),
            other => other,
        }
    }

    pub(crate) fn take_stop(&self) -> Option<Option<OperatorError>> {
        self.stop.lock().ok().and_then(|mut s| s.take())
    }

    pub(crate) fn set_credit(&self, credit: u64) {
        self.credit.store(credit, Ordering::SeqCst);
    }

    /// Marks the operator cancelled and releases pending sub-requests.
    pub(crate) fn cancel(&self) {
        self.cancelled.send_replace(true);
    }

    pub(crate) fn metrics(&self) -> &Arc<dyn MetricsReceiver> {
        &self.receivers.metrics
    }

    pub(crate) fn report(&self, diagnostic: Diagnostic) {
        self.receivers.diagnostics.emit(RunDiagnostic {
            run_id: self.run_id,
            operator: Some((self.index, self.name.clone())),
            diagnostic,
        });
    }
}

impl ControlPlane for NodeControl {
    fn run_id(&self) -> RunId {
        self.run_id
    }

    fn operator_index(&self) -> OperatorIndex {
        self.index
    }

    fn runtime(&self) -> Option<tokio::runtime::Handle> {
        Some(self.runtime.clone())
    }

    fn schedule_wake(&self, after: Duration) {
        if let Ok(mut slot) = self.wake_at.lock() {
            let due = Instant::now() + after;
            *slot = Some(slot.map_or(due, |prev| prev.min(due)));
        }
    }

    fn suspend(&self) {
        self.suspended.store(true, Ordering::SeqCst);
    }

    fn wake(&self) {
        self.suspended.store(false, Ordering::SeqCst);
        self.notify.notify_one();
    }

    fn stop(&self, error: Option<OperatorError>) {
        if let Ok(mut s) = self.stop.lock() {
            s.get_or_insert(error);
        }
        self.notify.notify_one();
    }

    fn warn(&self, diagnostic: Diagnostic) {
        let fresh = self
            .seen
            .lock()
            .map(|mut seen| seen.insert(diagnostic.clone()))
            .unwrap_or(true);
        if !fresh {
            return;
        }
        tracing::warn!(
            run_id = %self.run_id,
            index = self.index.get(),
            operator = %self.name,
            message = %diagnostic.message,
            "operator warning"
        );
        let message = diagnostic.message.clone();
        self.report(diagnostic);
        if self.strict {
            self.stop(Some(OperatorError::Strict(message)));
        }
    }

    fn emit(&self, sample: MetricSample) {
        self.receivers.metrics.sample(self.run_id, self.index, sample);
    }

    fn demand(&self, _schema: Option<&str>) -> u64 {
        self.credit.load(Ordering::SeqCst)
    }

    fn schemas(&self) -> Vec<Arc<Schema>> {
        self.receivers.catalog.schemas()
    }

    fn concepts(&self) -> Concepts {
        self.receivers.catalog.concepts()
    }

    fn is_cancelled(&self) -> bool {
        *self.cancelled.borrow()
    }

    fn cancellation(&self) -> Option<watch::Receiver<bool>> {
        Some(self.cancelled.subscribe())
    }
}
