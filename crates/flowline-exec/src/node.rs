//! Execution node: one tokio task driving one operator instance.
//!
//! A node owns the operator's output generator, a buffer that feeds the
//! operator's input generator, its control mailbox, and the links to its
//! neighbors. Between two steps of the generator it drains its mailboxes,
//! tops up the credit it has granted upstream, and decides whether the
//! operator is runnable at all:
//! - sources and transformations only while downstream credit is positive;
//! - sinks while input is buffered or upstream has finished;
//! - nobody while the operator suspended itself or the node is paused.
//!
//! When a step makes no progress the node parks on the next event (input,
//! credit, control, wake-up, timer). Sources that stall without asking for a
//! wake-up are retried with exponential backoff.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use flowline_core::config::{DemandSettings, EngineConfig};
use flowline_core::element::{Chunk, Element, ElementType};
use flowline_core::error::{Error, OperatorError, SystemError};
use flowline_core::id::{OperatorIndex, RunId};
use flowline_core::location::Placement;
use flowline_core::metrics::{Measurement, OperatorMetric};
use flowline_core::types::EventBatch;
use flowline_operators::control::Ctrl;
use flowline_operators::generator::{ElementIo, Input, OperatorInput, Output};
use flowline_operators::registry::{OperatorSpec, Registry};
use flowline_operators::traits::Operator;

use crate::control::{NodeControl, Receivers};
use crate::link::{Flow, Inlet, Outlet};
use crate::metrics::{trace_lifecycle, trace_metric};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Created,
    Instantiated,
    Running,
    Suspended,
    Finished,
    Failed,
    Cancelled,
}

impl NodeState {
    pub fn is_terminal(self) -> bool {
        matches!(self, NodeState::Finished | NodeState::Failed | NodeState::Cancelled)
    }
}

#[derive(Debug)]
pub(crate) enum Control {
    Start,
    Pause(oneshot::Sender<()>),
    Resume(oneshot::Sender<()>),
    Cancel,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeOutcome {
    Finished,
    Failed(Error),
    Cancelled,
}

/// Sent to the executor exactly once per node, before its links close.
#[derive(Debug, Clone)]
pub struct NodeExit {
    pub index: OperatorIndex,
    pub name: String,
    pub placement: Placement,
    pub outcome: NodeOutcome,
}

/// How the operator reaches the host that runs it.
pub enum ShippedOperator {
    Instance(Box<dyn Operator>),
    /// Serialized form; rebuilt through the host's registry.
    Spec(OperatorSpec),
}

impl ShippedOperator {
    pub fn name(&self) -> String {
        match self {
            ShippedOperator::Instance(op) => op.name().to_string(),
            ShippedOperator::Spec(spec) => spec.name.clone(),
        }
    }
}

impl std::fmt::Debug for ShippedOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShippedOperator::Instance(op) => write!(f, "Instance({op:?})"),
            ShippedOperator::Spec(spec) => write!(f, "Spec({spec:?})"),
        }
    }
}

/// Everything a host needs to bring up one node.
pub struct SpawnRequest {
    pub run_id: RunId,
    pub index: OperatorIndex,
    pub operator: ShippedOperator,
    pub input: ElementType,
    pub output: ElementType,
    pub placement: Placement,
    pub inlet: Option<Inlet>,
    pub outlet: Option<Outlet>,
    pub config: EngineConfig,
    pub receivers: Receivers,
    pub cancel: watch::Receiver<bool>,
    pub exits: mpsc::UnboundedSender<NodeExit>,
}

/// Executor-side handle of a spawned node.
#[derive(Debug)]
pub struct NodeHandle {
    pub index: OperatorIndex,
    pub name: String,
    pub placement: Placement,
    control: mpsc::UnboundedSender<Control>,
    ctrl: Arc<NodeControl>,
    state: watch::Receiver<NodeState>,
    join: JoinHandle<()>,
}

impl NodeHandle {
    pub fn state(&self) -> NodeState {
        *self.state.borrow()
    }

    pub(crate) fn start(&self) -> Result<(), SystemError> {
        self.control
            .send(Control::Start)
            .map_err(|_| SystemError::MailboxClosed(self.name.clone()))
    }

    /// Ask the node to pause between two steps. The receiver resolves once it
    /// acknowledged; `None` when the node already exited.
    pub(crate) fn pause(&self) -> Option<oneshot::Receiver<()>> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.control.send(Control::Pause(ack_tx)).ok().map(|_| ack_rx)
    }

    pub(crate) fn resume(&self) -> Option<oneshot::Receiver<()>> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.control.send(Control::Resume(ack_tx)).ok().map(|_| ack_rx)
    }

    /// Sub-requests of the operator are released right away; the node
    /// itself stops at its next mailbox check.
    pub(crate) fn cancel(&self) {
        self.ctrl.cancel();
        let _ = self.control.send(Control::Cancel);
    }

    pub(crate) async fn join(self) {
        if let Err(e) = self.join.await {
            tracing::error!(index = self.index.get(), operator = %self.name, error = %e, "node task panicked");
        }
    }
}

/// Instantiate the operator and start its node task in `Instantiated`
/// state; it steps only after `Start`.
pub(crate) fn spawn_node(
    runtime: &tokio::runtime::Handle,
    registry: &Registry,
    request: SpawnRequest,
) -> Result<NodeHandle, SystemError> {
    match request.input {
        ElementType::Void => spawn_with_input::<()>(runtime, registry, request),
        ElementType::Bytes => spawn_with_input::<Chunk>(runtime, registry, request),
        ElementType::Events => spawn_with_input::<EventBatch>(runtime, registry, request),
    }
}

fn spawn_with_input<I: ElementIo>(
    runtime: &tokio::runtime::Handle,
    registry: &Registry,
    request: SpawnRequest,
) -> Result<NodeHandle, SystemError> {
    match request.output {
        ElementType::Void => spawn_typed::<I, ()>(runtime, registry, request),
        ElementType::Bytes => spawn_typed::<I, Chunk>(runtime, registry, request),
        ElementType::Events => spawn_typed::<I, EventBatch>(runtime, registry, request),
    }
}

fn spawn_typed<I: ElementIo, O: ElementIo>(
    runtime: &tokio::runtime::Handle,
    registry: &Registry,
    request: SpawnRequest,
) -> Result<NodeHandle, SystemError> {
    let SpawnRequest {
        run_id,
        index,
        operator,
        placement,
        inlet,
        outlet,
        config,
        receivers,
        cancel,
        exits,
        ..
    } = request;
    let spawn_error = |operator: &str, message: String| SystemError::Spawn {
        operator: operator.to_string(),
        message,
    };

    let op = match operator {
        ShippedOperator::Instance(op) => op,
        ShippedOperator::Spec(spec) => registry
            .make(&spec)
            .map_err(|e| spawn_error(&spec.name, e.to_string()))?,
    };
    let name = op.name();
    let location = op.location();
    if !location.admits(placement) {
        return Err(SystemError::Location {
            operator: name.to_string(),
            required: location,
            actual: placement,
        });
    }
    if (I::TYPE == ElementType::Void) != inlet.is_none() {
        return Err(spawn_error(name, format!("input link does not match {} input", I::TYPE)));
    }
    if (O::TYPE == ElementType::Void) != outlet.is_none() {
        return Err(spawn_error(name, format!("output link does not match {} output", O::TYPE)));
    }

    let (state_tx, state_rx) = watch::channel(NodeState::Created);
    let ctrl = Arc::new(NodeControl::new(
        run_id,
        index,
        name,
        runtime.clone(),
        config.strict,
        receivers,
    ));
    let settings = config.demand_for(I::TYPE).unwrap_or(DemandSettings::EVENTS);
    let inbound = inlet.map(|inlet| Inbound::<I>::new(inlet, settings));
    let input = match &inbound {
        Some(side) => I::wrap_input(side.reader()),
        None => OperatorInput::Void,
    };
    let shared: Ctrl = ctrl.clone();
    let output = op
        .instantiate(input, shared)
        .map_err(|e| spawn_error(name, e.to_string()))?;
    let actual = output.element_type();
    let gen = O::unwrap_output(output)
        .ok_or_else(|| spawn_error(name, format!("produced {actual}, planned {}", O::TYPE)))?;
    state_tx.send_replace(NodeState::Instantiated);
    trace_lifecycle(run_id, index, name, NodeState::Instantiated);

    let (control_tx, control_rx) = mpsc::unbounded_channel();
    let node = ExecNode::<I, O> {
        run_id,
        index,
        name,
        placement,
        metric: OperatorMetric::new(run_id, index, name, I::TYPE, O::TYPE, op.internal()),
        ctrl: Arc::clone(&ctrl),
        gen,
        inbound,
        outbound: outlet.map(Outbound::new),
        control_rx,
        cancel_rx: cancel,
        state_tx,
        exits,
        config,
        created: Instant::now(),
        kicked: false,
    };
    let join = runtime.spawn(node.run());
    Ok(NodeHandle {
        index,
        name: name.to_string(),
        placement,
        control: control_tx,
        ctrl,
        state: state_rx,
        join,
    })
}

struct InboundBuffer<I> {
    queue: VecDeque<I>,
    buffered: u64,
    done: bool,
    consumed: u64,
}

/// The operator's view of its input: an empty element while nothing is
/// buffered, `None` once upstream ended and the buffer is drained.
struct InputReader<I> {
    buffer: Arc<Mutex<InboundBuffer<I>>>,
}

impl<I: Element> Iterator for InputReader<I> {
    type Item = I;

    fn next(&mut self) -> Option<I> {
        let mut buffer = self.buffer.lock().ok()?;
        match buffer.queue.pop_front() {
            Some(item) => {
                buffer.buffered = buffer.buffered.saturating_sub(item.size());
                buffer.consumed += 1;
                Some(item)
            }
            None if buffer.done => None,
            None => Some(I::default()),
        }
    }
}

struct Inbound<I> {
    inlet: Inlet,
    buffer: Arc<Mutex<InboundBuffer<I>>>,
    settings: DemandSettings,
    outstanding: u64,
    ended: bool,
    closed: bool,
    /// Upstream went away without `End`. What it pushed before is still
    /// consumed; end of input is never signaled.
    lost: bool,
}

impl<I: Element> Inbound<I> {
    fn new(inlet: Inlet, settings: DemandSettings) -> Self {
        Self {
            inlet,
            buffer: Arc::new(Mutex::new(InboundBuffer {
                queue: VecDeque::new(),
                buffered: 0,
                done: false,
                consumed: 0,
            })),
            settings,
            outstanding: 0,
            ended: false,
            closed: false,
            lost: false,
        }
    }

    fn reader(&self) -> Input<I> {
        Box::new(InputReader {
            buffer: Arc::clone(&self.buffer),
        })
    }

    /// (buffered units, buffered batches, consumed batches)
    fn levels(&self) -> (u64, u64, u64) {
        self.buffer
            .lock()
            .map(|b| (b.buffered, b.queue.len() as u64, b.consumed))
            .unwrap_or((0, 0, 0))
    }

    fn has_input(&self) -> bool {
        self.levels().1 > 0
    }

    fn accept(&mut self, flow: Flow, measurement: &mut Measurement) -> Result<(), Error> {
        match flow {
            Flow::Push(payload) => {
                let actual = payload.element_type();
                let item = I::from_payload(payload).ok_or_else(|| {
                    OperatorError::Schema(format!("received {actual}, expected {}", I::TYPE))
                })?;
                let size = item.size();
                measurement.record(size, item.approx_bytes());
                self.outstanding = self.outstanding.saturating_sub(size);
                if let Ok(mut b) = self.buffer.lock() {
                    b.buffered += size;
                    b.queue.push_back(item);
                }
            }
            Flow::End => {
                self.ended = true;
                self.outstanding = 0;
                if let Ok(mut b) = self.buffer.lock() {
                    b.done = true;
                }
            }
        }
        Ok(())
    }

    /// Ask for more while the window has room for at least `min_elements`.
    fn top_up(&mut self) -> Option<u64> {
        if self.ended || self.lost {
            return None;
        }
        let (buffered, batches, _) = self.levels();
        let s = self.settings;
        let in_flight = buffered.saturating_add(self.outstanding);
        if in_flight.saturating_add(s.min_elements) > s.max_elements || batches >= s.max_batches {
            return None;
        }
        let n = s.max_elements - in_flight;
        if n == 0 || !self.inlet.demand(n) {
            return None;
        }
        self.outstanding += n;
        Some(n)
    }
}

struct Outbound<O> {
    outlet: Outlet,
    credit: u64,
    pending: Option<O>,
    gone: bool,
}

impl<O: Element> Outbound<O> {
    fn new(outlet: Outlet) -> Self {
        Self {
            outlet,
            credit: 0,
            pending: None,
            gone: false,
        }
    }

    /// Push at most `credit` units of `item`; the rest waits for more credit.
    fn push(&mut self, item: O, measurement: &mut Measurement) -> bool {
        let (now, later) = if item.size() <= self.credit {
            (item, None)
        } else {
            let (head, rest) = item.split_at(self.credit);
            (head, Some(rest))
        };
        self.pending = later.filter(|rest| rest.size() > 0);
        let size = now.size();
        if size == 0 {
            return false;
        }
        let bytes = now.approx_bytes();
        let Some(payload) = now.into_payload() else {
            return false;
        };
        if !self.outlet.push(Flow::Push(payload)) {
            self.gone = true;
            return false;
        }
        self.credit -= size;
        measurement.record(size, bytes);
        true
    }
}

enum Step {
    Progress,
    Stalled,
    Done,
    Failed(OperatorError),
}

enum Event {
    Cancel(bool),
    Control(Option<Control>),
    Flow(Option<Flow>),
    Demand(Option<u64>),
    Woken,
    Timer,
}

struct ExecNode<I, O> {
    run_id: RunId,
    index: OperatorIndex,
    name: &'static str,
    placement: Placement,
    ctrl: Arc<NodeControl>,
    gen: Output<O>,
    inbound: Option<Inbound<I>>,
    outbound: Option<Outbound<O>>,
    control_rx: mpsc::UnboundedReceiver<Control>,
    cancel_rx: watch::Receiver<bool>,
    state_tx: watch::Sender<NodeState>,
    exits: mpsc::UnboundedSender<NodeExit>,
    config: EngineConfig,
    metric: OperatorMetric,
    created: Instant,
    /// A wake-up or timer fired since the last step.
    kicked: bool,
}

impl<I: Element, O: Element> ExecNode<I, O> {
    async fn run(mut self) {
        let outcome = self.drive().await;
        self.finish(outcome);
    }

    async fn drive(&mut self) -> NodeOutcome {
        if let Some(outcome) = self.await_start().await {
            return outcome;
        }
        self.metric.time_starting = self.created.elapsed();
        self.set_state(NodeState::Running);
        let interval = self.config.metrics_interval();
        let mut next_metrics = Instant::now() + interval;
        let mut idle_runs = 0u32;
        loop {
            if let Some(outcome) = self.poll_mailboxes().await {
                return outcome;
            }
            if let Some(stop) = self.ctrl.take_stop() {
                return match stop {
                    None => NodeOutcome::Finished,
                    Some(e) => NodeOutcome::Failed(e.into()),
                };
            }
            if self.drained_after_loss() {
                return NodeOutcome::Cancelled;
            }
            if let Some(side) = &mut self.inbound {
                if let Some(n) = side.top_up() {
                    tracing::trace!(run_id = %self.run_id, index = self.index.get(), demand = n, "requested input");
                }
            }
            if Instant::now() >= next_metrics {
                self.emit_metric();
                next_metrics = Instant::now() + interval;
            }

            let mut stalled = false;
            if self.runnable() {
                self.set_state(NodeState::Running);
                match self.step() {
                    Step::Progress => {
                        idle_runs = 0;
                        tokio::task::yield_now().await;
                        continue;
                    }
                    Step::Done => return NodeOutcome::Finished,
                    Step::Failed(e) => return NodeOutcome::Failed(e.into()),
                    Step::Stalled => {
                        stalled = true;
                        idle_runs = idle_runs.saturating_add(1);
                    }
                }
            } else {
                self.set_state(NodeState::Suspended);
            }

            let wake = self.ctrl.wake_deadline();
            let backoff = (stalled && wake.is_none() && self.expects_no_event())
                .then(|| Instant::now() + self.config.backoff(idle_runs.saturating_sub(1)));
            let deadline = [wake, backoff, Some(next_metrics)].into_iter().flatten().min();
            if let Some(outcome) = self.wait(deadline).await {
                return outcome;
            }
        }
    }

    /// Upstream was lost and everything it delivered has been stepped
    /// through the operator and pushed on.
    fn drained_after_loss(&self) -> bool {
        let Some(side) = &self.inbound else {
            return false;
        };
        side.lost
            && !side.has_input()
            && self.outbound.as_ref().map_or(true, |out| out.pending.is_none())
    }

    /// True when nothing outside the operator will announce new work, so a
    /// stalled step has to be retried on a timer.
    fn expects_no_event(&self) -> bool {
        if self.ctrl.is_suspended() {
            return false;
        }
        match &self.inbound {
            None => true,
            Some(side) => side.has_input(),
        }
    }

    fn runnable(&self) -> bool {
        if self.ctrl.is_suspended() {
            return false;
        }
        match (&self.outbound, &self.inbound) {
            (Some(out), _) => out.credit > 0 && !out.gone,
            (None, Some(side)) => side.has_input() || side.ended || self.kicked,
            (None, None) => true,
        }
    }

    fn step(&mut self) -> Step {
        self.metric.num_runs += 1;
        self.kicked = false;
        if let Some(out) = &mut self.outbound {
            if let Some(pending) = out.pending.take() {
                let pushed = out.push(pending, &mut self.metric.outbound);
                self.ctrl.set_credit(out.credit);
                if !pushed {
                    return Step::Stalled;
                }
                self.metric.num_runs_processing += 1;
                self.metric.num_runs_processing_output += 1;
                return Step::Progress;
            }
        }

        let consumed_before = self.consumed();
        let started = Instant::now();
        let next = self.gen.next();
        self.metric.time_processing += started.elapsed();
        let item = match next {
            None => return Step::Done,
            Some(Err(e)) => return Step::Failed(e),
            Some(Ok(item)) => item,
        };
        let took_input = self.consumed() != consumed_before;
        let produced = item.size() > 0;
        if produced {
            if let Some(out) = &mut self.outbound {
                out.push(item, &mut self.metric.outbound);
                self.ctrl.set_credit(out.credit);
            }
            self.metric.num_runs_processing_output += 1;
        }
        if took_input {
            self.metric.num_runs_processing_input += 1;
        }
        if took_input || produced {
            self.metric.num_runs_processing += 1;
            Step::Progress
        } else {
            Step::Stalled
        }
    }

    fn consumed(&self) -> u64 {
        self.inbound.as_ref().map_or(0, |side| side.levels().2)
    }

    async fn await_start(&mut self) -> Option<NodeOutcome> {
        loop {
            if *self.cancel_rx.borrow() {
                return Some(NodeOutcome::Cancelled);
            }
            let event = tokio::select! {
                changed = self.cancel_rx.changed() => Event::Cancel(changed.is_err()),
                msg = self.control_rx.recv() => Event::Control(msg),
            };
            match event {
                Event::Cancel(true) => return Some(NodeOutcome::Cancelled),
                Event::Control(Some(Control::Start)) => return None,
                Event::Control(Some(Control::Pause(ack) | Control::Resume(ack))) => {
                    let _ = ack.send(());
                }
                Event::Control(Some(Control::Cancel) | None) => return Some(NodeOutcome::Cancelled),
                _ => {}
            }
        }
    }

    /// Handle everything already queued, without waiting.
    async fn poll_mailboxes(&mut self) -> Option<NodeOutcome> {
        if *self.cancel_rx.borrow() {
            return Some(NodeOutcome::Cancelled);
        }
        loop {
            match self.control_rx.try_recv() {
                Ok(msg) => {
                    if let Some(outcome) = self.on_control(msg).await {
                        return Some(outcome);
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => return Some(NodeOutcome::Cancelled),
            }
        }
        loop {
            let flow = match &mut self.inbound {
                Some(side) if !side.closed => match side.inlet.flow_rx.try_recv() {
                    Ok(flow) => Some(flow),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => None,
                },
                _ => break,
            };
            if let Some(outcome) = self.on_flow(flow) {
                return Some(outcome);
            }
        }
        loop {
            let demand = match &mut self.outbound {
                Some(out) => match out.outlet.demand_rx.try_recv() {
                    Ok(n) => Some(n),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => None,
                },
                None => break,
            };
            if let Some(outcome) = self.on_demand(demand) {
                return Some(outcome);
            }
        }
        None
    }

    async fn wait(&mut self, deadline: Option<Instant>) -> Option<NodeOutcome> {
        let event = tokio::select! {
            biased;
            changed = self.cancel_rx.changed() => Event::Cancel(changed.is_err()),
            msg = self.control_rx.recv() => Event::Control(msg),
            flow = next_flow(&mut self.inbound) => Event::Flow(flow),
            demand = next_demand(&mut self.outbound) => Event::Demand(demand),
            _ = self.ctrl.woken() => Event::Woken,
            _ = sleep_until(deadline) => Event::Timer,
        };
        match event {
            Event::Cancel(closed) => {
                if closed || *self.cancel_rx.borrow() {
                    return Some(NodeOutcome::Cancelled);
                }
                None
            }
            Event::Control(None) => Some(NodeOutcome::Cancelled),
            Event::Control(Some(msg)) => self.on_control(msg).await,
            Event::Flow(flow) => self.on_flow(flow),
            Event::Demand(demand) => self.on_demand(demand),
            Event::Woken | Event::Timer => {
                self.kicked = true;
                None
            }
        }
    }

    async fn on_control(&mut self, msg: Control) -> Option<NodeOutcome> {
        match msg {
            Control::Start => None,
            Control::Resume(ack) => {
                let _ = ack.send(());
                None
            }
            Control::Cancel => Some(NodeOutcome::Cancelled),
            Control::Pause(ack) => self.paused(ack).await,
        }
    }

    /// Stay paused until resumed; only control and cancellation are heard.
    async fn paused(&mut self, ack: oneshot::Sender<()>) -> Option<NodeOutcome> {
        self.set_state(NodeState::Suspended);
        let _ = ack.send(());
        let since = Instant::now();
        tracing::debug!(run_id = %self.run_id, index = self.index.get(), operator = self.name, "paused");
        let outcome = loop {
            if *self.cancel_rx.borrow() {
                break Some(NodeOutcome::Cancelled);
            }
            let event = tokio::select! {
                changed = self.cancel_rx.changed() => Event::Cancel(changed.is_err()),
                msg = self.control_rx.recv() => Event::Control(msg),
            };
            match event {
                Event::Cancel(true) => break Some(NodeOutcome::Cancelled),
                Event::Control(Some(Control::Resume(ack))) => {
                    let _ = ack.send(());
                    break None;
                }
                Event::Control(Some(Control::Pause(ack))) => {
                    let _ = ack.send(());
                }
                Event::Control(Some(Control::Cancel) | None) => break Some(NodeOutcome::Cancelled),
                _ => {}
            }
        };
        self.metric.time_paused += since.elapsed();
        if outcome.is_none() {
            tracing::debug!(run_id = %self.run_id, index = self.index.get(), operator = self.name, "resumed");
            self.set_state(NodeState::Running);
        }
        outcome
    }

    fn on_flow(&mut self, flow: Option<Flow>) -> Option<NodeOutcome> {
        let side = self.inbound.as_mut()?;
        match flow {
            Some(flow) => side
                .accept(flow, &mut self.metric.inbound)
                .err()
                .map(NodeOutcome::Failed),
            None => {
                side.closed = true;
                if !side.ended {
                    side.lost = true;
                    tracing::debug!(
                        run_id = %self.run_id,
                        index = self.index.get(),
                        operator = self.name,
                        "upstream closed without end; draining delivered input"
                    );
                }
                None
            }
        }
    }

    fn on_demand(&mut self, demand: Option<u64>) -> Option<NodeOutcome> {
        let out = self.outbound.as_mut()?;
        match demand {
            Some(n) => {
                out.credit = out.credit.saturating_add(n);
                self.ctrl.set_credit(out.credit);
                None
            }
            // Downstream no longer needs anything.
            None => {
                out.gone = true;
                Some(NodeOutcome::Finished)
            }
        }
    }

    fn set_state(&self, state: NodeState) {
        let changed = self.state_tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        });
        if changed {
            trace_lifecycle(self.run_id, self.index, self.name, state);
        }
    }

    fn snapshot(&self) -> OperatorMetric {
        let mut metric = self.metric.clone();
        metric.time_total = self.created.elapsed();
        metric.time_running = metric
            .time_total
            .saturating_sub(metric.time_starting)
            .saturating_sub(metric.time_paused);
        metric.time_scheduled = metric.time_processing;
        metric
    }

    fn emit_metric(&self) {
        let metric = self.snapshot();
        trace_metric(&metric);
        self.ctrl.metrics().operator(metric);
    }

    fn finish(self, outcome: NodeOutcome) {
        let state = match &outcome {
            NodeOutcome::Finished => NodeState::Finished,
            NodeOutcome::Failed(_) => NodeState::Failed,
            NodeOutcome::Cancelled => NodeState::Cancelled,
        };
        if outcome == NodeOutcome::Finished {
            if let Some(out) = &self.outbound {
                if !out.gone {
                    out.outlet.push(Flow::End);
                }
            }
        } else {
            self.ctrl.cancel();
        }
        match &outcome {
            NodeOutcome::Failed(e) => tracing::warn!(
                run_id = %self.run_id,
                index = self.index.get(),
                operator = self.name,
                error = %e,
                "node failed"
            ),
            _ => tracing::debug!(
                run_id = %self.run_id,
                index = self.index.get(),
                operator = self.name,
                ?state,
                "node exited"
            ),
        }
        self.emit_metric();
        self.set_state(state);
        let _ = self.exits.send(NodeExit {
            index: self.index,
            name: self.name.to_string(),
            placement: self.placement,
            outcome,
        });
        // Links close when `self` drops, after the exit is queued.
    }
}

async fn next_flow<I>(inbound: &mut Option<Inbound<I>>) -> Option<Flow> {
    match inbound {
        Some(side) if !side.closed => side.inlet.flow_rx.recv().await,
        _ => std::future::pending().await,
    }
}

async fn next_demand<O>(outbound: &mut Option<Outbound<O>>) -> Option<u64> {
    match outbound {
        Some(out) if !out.gone => out.outlet.demand_rx.recv().await,
        _ => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
