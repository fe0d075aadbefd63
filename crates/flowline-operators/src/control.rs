//! The control plane: the only way an operator reaches outside its own
//! sequence while running.
//!
//! Implemented by the execution node in `flowline-exec` and by
//! `LocalControl` for driving operators outside an executor. Nothing here
//! exposes executor state; an operator sees its own demand, its own run, and
//! a read-only catalog snapshot.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;

use flowline_core::catalog::Concepts;
use flowline_core::diagnostic::Diagnostic;
use flowline_core::error::OperatorError;
use flowline_core::id::{OperatorIndex, RunId};
use flowline_core::metrics::MetricSample;
use flowline_core::schema::Schema;

pub trait ControlPlane: Send + Sync {
    fn run_id(&self) -> RunId;

    fn operator_index(&self) -> OperatorIndex;

    /// Scheduling context for timers and sub-requests, if any.
    fn runtime(&self) -> Option<tokio::runtime::Handle>;

    /// Stop driving the operator until `after` has passed.
    fn schedule_wake(&self, after: Duration);

    /// Stop driving the operator until `wake` is called.
    fn suspend(&self);

    fn wake(&self);

    /// Voluntary early termination; `Some` fails the node.
    fn stop(&self, error: Option<OperatorError>);

    /// Non-fatal issue. Identical warnings are reported once per operator.
    fn warn(&self, diagnostic: Diagnostic);

    fn emit(&self, sample: MetricSample);

    /// Output volume downstream currently accepts (rows or bytes).
    ///
    /// Credit is granted per link, not per schema: every schema shares the
    /// same budget and implementations may ignore `schema`.
    fn demand(&self, schema: Option<&str>) -> u64;

    fn schemas(&self) -> Vec<Arc<Schema>>;

    fn concepts(&self) -> Concepts;

    fn is_cancelled(&self) -> bool;

    /// Flips to `true` once the operator is cancelled. `None` when the
    /// implementation never cancels.
    fn cancellation(&self) -> Option<watch::Receiver<bool>> {
        None
    }
}

pub type Ctrl = Arc<dyn ControlPlane>;

/// Result slot of a sub-request started with [`request`].
pub struct Pending<T> {
    slot: Arc<Mutex<Option<Result<T, OperatorError>>>>,
}

impl<T> Pending<T> {
    pub fn is_ready(&self) -> bool {
        self.slot.lock().map(|s| s.is_some()).unwrap_or(true)
    }

    /// Take the result once it arrived.
    pub fn take(&self) -> Option<Result<T, OperatorError>> {
        match self.slot.lock() {
            Ok(mut s) => s.take(),
            Err(_) => Some(Err(OperatorError::Exec("request slot poisoned".into()))),
        }
    }
}

/// Run `fut` on the hosting runtime, bounded by `timeout`.
///
/// The operator is suspended until the result (or the timeout) arrives, so
/// the node never polls for it. The calling operator keeps the `Pending`
/// and checks it on its next step.
pub fn request<T, F>(ctrl: &Ctrl, timeout: Duration, fut: F) -> Pending<T>
where
    T: Send + 'static,
    F: Future<Output = T> + Send + 'static,
{
    let slot = Arc::new(Mutex::new(None));
    let Some(runtime) = ctrl.runtime() else {
        *slot.lock().unwrap_or_else(|e| e.into_inner()) = Some(Err(OperatorError::Exec(
            "no runtime available for sub-request".into(),
        )));
        return Pending { slot };
    };
    ctrl.suspend();
    let out = Arc::clone(&slot);
    let ctrl = Arc::clone(ctrl);
    let cancellation = ctrl.cancellation();
    runtime.spawn(async move {
        let result = tokio::select! {
            result = tokio::time::timeout(timeout, fut) => result.map_err(|_| {
                tracing::debug!(run_id = %ctrl.run_id(), index = ctrl.operator_index().get(), ?timeout, "sub-request timed out");
                OperatorError::Timeout(timeout)
            }),
            _ = cancelled(cancellation) => {
                tracing::debug!(run_id = %ctrl.run_id(), index = ctrl.operator_index().get(), "sub-request cancelled");
                Err(OperatorError::Exec("sub-request cancelled".into()))
            }
        };
        if let Ok(mut s) = out.lock() {
            *s = Some(result);
        }
        ctrl.wake();
    });
    Pending { slot }
}

async fn cancelled(cancellation: Option<watch::Receiver<bool>>) {
    match cancellation {
        Some(mut rx) => {
            if rx.wait_for(|cancelled| *cancelled).await.is_err() {
                std::future::pending::<()>().await;
            }
        }
        None => std::future::pending().await,
    }
}
