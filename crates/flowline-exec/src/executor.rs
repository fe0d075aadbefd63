//! Pipeline executor: plans a pipeline, spawns one node per operator, and
//! supervises the run until every node exited.
//!
//! Start is a barrier. Nodes are spawned in `Instantiated` state and only
//! receive `Start` once every spawn succeeded; a failed spawn cancels and
//! joins whatever was already brought up and returns the failure.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use flowline_core::catalog::Catalog;
use flowline_core::config::EngineConfig;
use flowline_core::diagnostic::{Diagnostic, RunDiagnostic};
use flowline_core::error::{Error, SystemError};
use flowline_core::id::{LinkId, OperatorIndex, RunId};
use flowline_core::location::Placement;
use flowline_core::manifest::{ManifestEntry, RunManifest, RunState};
use flowline_planner::{optimize_to_fixpoint, PhysicalPlan, Pipeline};

use crate::control::Receivers;
use crate::host::{LocalHost, NodeHost};
use crate::link::{link, Inlet, Outlet};
use crate::node::{NodeExit, NodeHandle, NodeOutcome, ShippedOperator, SpawnRequest};
use crate::transport::{bridge_downstream, bridge_upstream, LoopbackTransport, Transport};

/// Any error surfaced by the executor, tagged with its run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("run {run_id}: {source}")]
pub struct RunError {
    pub run_id: RunId,
    pub source: Error,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: RunId,
    pub state: RunState,
    /// First fatal error, verbatim.
    pub error: Option<RunError>,
    pub manifest: RunManifest,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.state == RunState::Finished
    }
}

struct Signals {
    run_id: RunId,
    cancel: watch::Sender<bool>,
    aborted: Mutex<Option<String>>,
    receivers: Receivers,
}

impl Signals {
    fn abort(&self, reason: &str) {
        let first = self
            .aborted
            .lock()
            .map(|mut slot| {
                let first = slot.is_none();
                slot.get_or_insert_with(|| reason.to_string());
                first
            })
            .unwrap_or(false);
        if !first {
            return;
        }
        tracing::debug!(run_id = %self.run_id, reason, "aborting run");
        self.receivers.diagnostics.emit(RunDiagnostic {
            run_id: self.run_id,
            operator: None,
            diagnostic: Diagnostic::warning(format!("run aborted: {reason}")),
        });
        self.cancel.send_replace(true);
    }

    fn is_aborted(&self) -> bool {
        self.aborted.lock().map(|slot| slot.is_some()).unwrap_or(true)
    }
}

/// Cancels a running pipeline from another task.
#[derive(Clone)]
pub struct AbortHandle {
    signals: Arc<Signals>,
}

impl AbortHandle {
    pub fn abort(&self, reason: &str) {
        self.signals.abort(reason);
    }
}

struct ActiveRun {
    nodes: Vec<NodeHandle>,
    bridges: Vec<JoinHandle<()>>,
    exits: mpsc::UnboundedReceiver<NodeExit>,
    faults: mpsc::UnboundedReceiver<SystemError>,
    manifest: RunManifest,
}

pub struct PipelineExecutor {
    run_id: RunId,
    pipeline: Pipeline,
    config: EngineConfig,
    receivers: Receivers,
    local: Arc<dyn NodeHost>,
    server: Option<Arc<dyn NodeHost>>,
    transport: Arc<dyn Transport>,
    overrides: BTreeMap<usize, Placement>,
    signals: Arc<Signals>,
    run: Option<ActiveRun>,
    started: bool,
}

impl PipelineExecutor {
    pub fn new(pipeline: Pipeline, config: EngineConfig, receivers: Receivers) -> Self {
        let run_id = RunId::generate();
        let (cancel, _) = watch::channel(false);
        Self {
            run_id,
            pipeline,
            config,
            signals: Arc::new(Signals {
                run_id,
                cancel,
                aborted: Mutex::new(None),
                receivers: receivers.clone(),
            }),
            receivers,
            local: Arc::new(LocalHost::default()),
            server: None,
            transport: Arc::new(LoopbackTransport::new()),
            overrides: BTreeMap::new(),
            run: None,
            started: false,
        }
    }

    pub fn with_server(mut self, host: Arc<dyn NodeHost>) -> Self {
        self.server = Some(host);
        self
    }

    pub fn with_local(mut self, host: Arc<dyn NodeHost>) -> Self {
        self.local = host;
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    /// Force the operator at `index` onto `placement`.
    pub fn with_override(mut self, index: usize, placement: Placement) -> Self {
        self.overrides.insert(index, placement);
        self
    }

    pub fn with_catalog(mut self, catalog: Arc<dyn Catalog>) -> Self {
        self.receivers.catalog = catalog;
        self
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle {
            signals: Arc::clone(&self.signals),
        }
    }

    fn error(&self, source: impl Into<Error>) -> RunError {
        RunError {
            run_id: self.run_id,
            source: source.into(),
        }
    }

    fn host_for(&self, placement: Placement) -> Option<&Arc<dyn NodeHost>> {
        match placement {
            Placement::Client => Some(&self.local),
            Placement::Server => self.server.as_ref(),
        }
    }

    /// Plan, spawn every node, then release them all at once.
    pub async fn start(&mut self) -> Result<(), RunError> {
        if self.started {
            return Err(self.error(SystemError::InvalidState("executor was already started".into())));
        }
        self.started = true;
        self.config.validate().map_err(|e| self.error(e))?;
        self.pipeline.check_runnable().map_err(|e| self.error(e))?;

        let pipeline = if self.config.optimize {
            optimize_to_fixpoint(&self.pipeline, self.config.max_optimizer_passes)
        } else {
            self.pipeline.clone()
        };
        let plan = PhysicalPlan::build(&pipeline, &self.overrides).map_err(|e| self.error(e))?;
        if let Some(step) = plan.steps.iter().find(|s| s.placement == Placement::Server) {
            if self.server.is_none() {
                return Err(self.error(SystemError::NoServer(step.name.clone())));
            }
        }
        tracing::debug!(
            run_id = %self.run_id,
            operators = plan.len(),
            crossings = plan.crossings().len(),
            fingerprint = %plan.fingerprint.short(),
            "starting pipeline"
        );

        let (exits_tx, exits) = mpsc::unbounded_channel();
        let (faults_tx, faults) = mpsc::unbounded_channel();
        let mut bridges = Vec::new();
        let mut inlets: Vec<Option<Inlet>> = plan.steps.iter().map(|_| None).collect();
        let mut outlets: Vec<Option<Outlet>> = plan.steps.iter().map(|_| None).collect();

        for (i, pair) in plan.steps.windows(2).enumerate() {
            let (up, down) = (&pair[0], &pair[1]);
            if up.placement == down.placement {
                let (outlet, inlet) = link();
                outlets[i] = Some(outlet);
                inlets[i + 1] = Some(inlet);
                continue;
            }
            let link_id = LinkId::new(i as u64);
            let (client, server) = match self.transport.open(self.run_id, link_id).await {
                Ok(ends) => ends,
                Err(e) => {
                    self.abort_start(Vec::new(), bridges).await;
                    return Err(self.error(e));
                }
            };
            let (up_end, down_end) = match up.placement {
                Placement::Client => (client, server),
                Placement::Server => (server, client),
            };
            let (up_outlet, up_inlet) = link();
            let (down_outlet, down_inlet) = link();
            let cancel = self.signals.cancel.subscribe();
            bridges.push(bridge_upstream(link_id, up_inlet, up_end, cancel.clone(), faults_tx.clone()));
            bridges.push(bridge_downstream(link_id, down_outlet, down_end, cancel, faults_tx.clone()));
            outlets[i] = Some(up_outlet);
            inlets[i + 1] = Some(down_inlet);
        }
        drop(faults_tx);

        let mut nodes = Vec::with_capacity(plan.len());
        for (i, step) in plan.steps.iter().enumerate() {
            let Some(host) = self.host_for(step.placement).cloned() else {
                self.abort_start(nodes, bridges).await;
                return Err(self.error(SystemError::NoServer(step.name.clone())));
            };
            let operator = match step.placement {
                Placement::Client => ShippedOperator::Instance(pipeline.operators()[i].copy()),
                Placement::Server => ShippedOperator::Spec(step.spec.clone()),
            };
            let request = SpawnRequest {
                run_id: self.run_id,
                index: step.index,
                operator,
                input: step.input,
                output: step.output,
                placement: step.placement,
                inlet: inlets[i].take(),
                outlet: outlets[i].take(),
                config: self.config.clone(),
                receivers: self.receivers.clone(),
                cancel: self.signals.cancel.subscribe(),
                exits: exits_tx.clone(),
            };
            let timeout = self.config.start_timeout();
            let spawned = match tokio::time::timeout(timeout, host.spawn(request)).await {
                Ok(result) => result,
                Err(_) => Err(SystemError::Timeout(timeout, format!("spawn of `{}`", step.name))),
            };
            match spawned {
                Ok(node) => {
                    tracing::trace!(run_id = %self.run_id, index = i, operator = %step.name, placement = %step.placement, "spawned node");
                    nodes.push(node);
                }
                Err(e) => {
                    tracing::warn!(run_id = %self.run_id, index = i, operator = %step.name, error = %e, "spawn failed");
                    self.abort_start(nodes, bridges).await;
                    return Err(self.error(e));
                }
            }
        }
        drop(exits_tx);

        if let Err(e) = nodes.iter().try_for_each(NodeHandle::start) {
            self.abort_start(nodes, bridges).await;
            return Err(self.error(e));
        }

        let entries = plan
            .steps
            .iter()
            .map(|s| ManifestEntry {
                name: s.name.clone(),
                placement: s.placement,
            })
            .collect();
        self.run = Some(ActiveRun {
            nodes,
            bridges,
            exits,
            faults,
            manifest: RunManifest::new(self.run_id, plan.fingerprint, entries, now_millis()),
        });
        tracing::debug!(run_id = %self.run_id, "all nodes started");
        Ok(())
    }

    /// Tear down a partially started run; nothing is left running afterwards.
    async fn abort_start(&self, nodes: Vec<NodeHandle>, bridges: Vec<JoinHandle<()>>) {
        tracing::debug!(run_id = %self.run_id, spawned = nodes.len(), "aborting start");
        self.signals.cancel.send_replace(true);
        for node in &nodes {
            node.cancel();
        }
        for node in nodes {
            node.join().await;
        }
        for bridge in bridges {
            bridge.abort();
        }
    }

    fn active(&self) -> Result<&ActiveRun, RunError> {
        self.run
            .as_ref()
            .ok_or_else(|| self.error(SystemError::InvalidState("pipeline is not running".into())))
    }

    /// Pause every node between two steps and wait until all of them did.
    pub async fn pause(&self) -> Result<(), RunError> {
        let run = self.active()?;
        let acks: Vec<_> = run.nodes.iter().filter_map(NodeHandle::pause).collect();
        for ack in acks {
            let _ = ack.await;
        }
        tracing::debug!(run_id = %self.run_id, "pipeline paused");
        Ok(())
    }

    pub async fn resume(&self) -> Result<(), RunError> {
        let run = self.active()?;
        let acks: Vec<_> = run.nodes.iter().filter_map(NodeHandle::resume).collect();
        for ack in acks {
            let _ = ack.await;
        }
        tracing::debug!(run_id = %self.run_id, "pipeline resumed");
        Ok(())
    }

    /// Cancel the run; `wait` then reports `Cancelled`.
    pub fn abort(&self, reason: &str) {
        self.signals.abort(reason);
    }

    /// Supervise the run until every node exited.
    pub async fn wait(&mut self) -> Result<RunReport, RunError> {
        let Some(mut run) = self.run.take() else {
            return Err(self.error(SystemError::InvalidState("pipeline is not running".into())));
        };
        let mut supervisor = Supervisor::default();
        let total = run.nodes.len();
        let mut faults_open = true;

        while supervisor.exited < total {
            tokio::select! {
                biased;
                exit = run.exits.recv() => match exit {
                    Some(exit) => self.on_exit(&mut supervisor, &run, exit),
                    None => {
                        supervisor.fail(SystemError::InvalidState("a node exited without reporting".into()).into());
                        break;
                    }
                },
                fault = run.faults.recv(), if faults_open => match fault {
                    Some(fault) => {
                        // Exits queued before the link broke explain the fault.
                        while let Ok(exit) = run.exits.try_recv() {
                            self.on_exit(&mut supervisor, &run, exit);
                        }
                        if supervisor.error.is_none() && !self.signals.is_aborted() {
                            tracing::warn!(run_id = %self.run_id, error = %fault, "transport fault");
                            supervisor.fail(fault.into());
                            self.cancel_nodes(&run);
                        }
                    }
                    None => faults_open = false,
                },
            }
        }

        // A broken link can be reported after the last node exited.
        while let Ok(fault) = run.faults.try_recv() {
            if supervisor.error.is_none() && !self.signals.is_aborted() {
                tracing::warn!(run_id = %self.run_id, error = %fault, "transport fault");
                supervisor.fail(fault.into());
            }
        }
        for node in std::mem::take(&mut run.nodes) {
            node.join().await;
        }
        for bridge in std::mem::take(&mut run.bridges) {
            bridge.abort();
        }

        let state = if supervisor.error.is_some() {
            RunState::Failed
        } else if supervisor.cancelled || self.signals.is_aborted() {
            RunState::Cancelled
        } else {
            RunState::Finished
        };
        if let Some(e) = &supervisor.error {
            self.receivers.diagnostics.emit(RunDiagnostic {
                run_id: self.run_id,
                operator: supervisor.origin.clone(),
                diagnostic: Diagnostic::error(e.to_string()),
            });
        }
        tracing::debug!(run_id = %self.run_id, ?state, "run finished");
        let manifest = run.manifest.clone().finish(state, now_millis());
        Ok(RunReport {
            run_id: self.run_id,
            state,
            error: supervisor.error.map(|source| self.error(source)),
            manifest,
        })
    }

    /// `start` followed by `wait`.
    pub async fn run(&mut self) -> Result<RunReport, RunError> {
        self.start().await?;
        self.wait().await
    }

    fn on_exit(&self, supervisor: &mut Supervisor, run: &ActiveRun, exit: NodeExit) {
        supervisor.exited += 1;
        match exit.outcome {
            NodeOutcome::Finished => {}
            NodeOutcome::Cancelled => supervisor.cancelled = true,
            NodeOutcome::Failed(e) => {
                if supervisor.error.is_none() {
                    tracing::debug!(run_id = %self.run_id, index = exit.index.get(), operator = %exit.name, "node failed; cancelling run");
                    self.cancel_upstream(run, exit.index);
                    supervisor.origin = Some((exit.index, exit.name));
                    supervisor.fail(e);
                }
            }
        }
    }

    /// Cancel the nodes feeding `failed`. Nodes below it are left to see
    /// their input close, so what was already pushed to them is consumed.
    fn cancel_upstream(&self, run: &ActiveRun, failed: OperatorIndex) {
        for node in run.nodes.iter().filter(|node| node.index < failed) {
            node.cancel();
        }
    }

    fn cancel_nodes(&self, run: &ActiveRun) {
        self.signals.cancel.send_replace(true);
        for node in &run.nodes {
            node.cancel();
        }
    }
}

impl Drop for PipelineExecutor {
    fn drop(&mut self) {
        if self.run.is_some() {
            self.signals.cancel.send_replace(true);
        }
    }
}

#[derive(Default)]
struct Supervisor {
    exited: usize,
    cancelled: bool,
    error: Option<Error>,
    origin: Option<(OperatorIndex, String)>,
}

impl Supervisor {
    fn fail(&mut self, error: Error) {
        self.error.get_or_insert(error);
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
