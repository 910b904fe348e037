//! Interruption Manager - the arbitration state machine
//!
//! A single actor task owns the `ConversationState`, the interruption queue and the
//! in-progress output context. Producers talk to it through a cloneable
//! [`InterruptionManager`] handle; classification and scoring run on the producer's
//! task, only `handle` is serialised.
//!
//! ```text
//!  NORMAL ──► PAUSING ─(renderer confirms / timeout)─► PAUSED ──► RESUMING ──► NORMAL
//!               └─ TRANSITIONING (soft fade)                                  │
//!                                                                              ▼
//!                                                                  next queued event
//! ```
//!
//! While a cycle is in flight every new event is queued, except a critical event
//! arriving during a non-critical cycle: that cancels the cycle and jumps straight
//! to `IMMEDIATE_STOP`.

use crate::classifier::EventClassifier;
use crate::config::CadenceConfig;
use crate::context::{ContextId, ContextSnapshot, ContextStore};
use crate::error::{CadenceError, CadenceResult};
use crate::event::{
    ConversationState, EventType, InterruptionEvent, InterruptionStrategy, Priority, RawSignal,
};
use crate::priority::PriorityAssessor;
use crate::queue::{EnqueueOutcome, InterruptionQueue};
use crate::recovery::{RecoveryPlan, RecoveryPlanner, SnapshotRecoveryPlanner};
use crate::renderer::{NullRenderer, RenderDirective, Renderer};
use crate::stats::{CadenceStats, CadenceStatsSnapshot};
use crate::transition::{DurationTransitionSelector, TransitionPlan, TransitionSelector};
use futures::FutureExt;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Decision table, evaluated top-down (first match wins).
pub fn decide_strategy(event: &InterruptionEvent) -> InterruptionStrategy {
    if event.priority == Priority::Critical {
        InterruptionStrategy::ImmediateStop
    } else if event.event_type == EventType::UserSpeech && event.urgency > 0.8 {
        InterruptionStrategy::GracefulPause
    } else if event.event_type == EventType::UserSpeech {
        InterruptionStrategy::SmoothTransition
    } else if event.priority == Priority::High {
        InterruptionStrategy::ContextualPause
    } else {
        InterruptionStrategy::QueueForLater
    }
}

/// A critical event cancels any cycle that is not itself serving a critical event.
fn preempts(incoming: &InterruptionEvent, current: &InterruptionEvent) -> bool {
    incoming.priority == Priority::Critical && current.priority != Priority::Critical
}

/// The output currently being delivered, as reported by the output collaborator.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputContext {
    pub topic: String,
    /// 0.0–1.0; complex topics are summarised rather than resumed verbatim.
    pub complexity: f32,
    pub progress: f32,
    /// Tail of the content delivered so far.
    pub delivered: String,
}

impl OutputContext {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            complexity: 0.0,
            progress: 0.0,
            delivered: String::new(),
        }
    }

    pub fn with_complexity(mut self, complexity: f32) -> Self {
        self.complexity = complexity.clamp(0.0, 1.0);
        self
    }
}

/// Outcome of a completed interruption cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HandledInterruption {
    pub event_id: Uuid,
    /// Strategy actually applied (after any fallback).
    pub strategy: InterruptionStrategy,
    pub transition: TransitionPlan,
    pub recovery: RecoveryPlan,
    /// False when the renderer missed its confirmation window or failed.
    pub confirmed: bool,
}

/// What the manager did with an event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum InterruptionResponse {
    Handled(HandledInterruption),
    /// Held in the queue for later arbitration.
    Queued { event_id: Uuid },
    /// Queue full and the event ranked no better than the worst queued one.
    Rejected { event_id: Uuid },
    /// Cycle cancelled by a critical event.
    Preempted { event_id: Uuid, by: Uuid },
}

impl InterruptionResponse {
    pub fn event_id(&self) -> Uuid {
        match self {
            InterruptionResponse::Handled(h) => h.event_id,
            InterruptionResponse::Queued { event_id }
            | InterruptionResponse::Rejected { event_id }
            | InterruptionResponse::Preempted { event_id, .. } => *event_id,
        }
    }

    pub fn strategy(&self) -> Option<InterruptionStrategy> {
        match self {
            InterruptionResponse::Handled(h) => Some(h.strategy),
            InterruptionResponse::Queued { .. } => Some(InterruptionStrategy::QueueForLater),
            _ => None,
        }
    }

    pub fn handled(&self) -> Option<&HandledInterruption> {
        match self {
            InterruptionResponse::Handled(h) => Some(h),
            _ => None,
        }
    }
}

/// Observable manager activity.
#[derive(Debug, Clone, PartialEq)]
pub enum ManagerEvent {
    StateChanged {
        from: ConversationState,
        to: ConversationState,
    },
    /// An event left the manager: either served by an interruption cycle or, for
    /// `QUEUE_FOR_LATER`, released from the queue once output was free.
    Dispatched {
        event: InterruptionEvent,
        strategy: InterruptionStrategy,
    },
    Preempted {
        preempted: Uuid,
        by: Uuid,
    },
    /// The actor recovered from a panic: state NORMAL, queue empty.
    Restarted,
}

enum Command {
    Handle {
        event: InterruptionEvent,
        reply: oneshot::Sender<InterruptionResponse>,
    },
    BeginOutput(OutputContext),
    ReportProgress {
        progress: f32,
        delivered: String,
    },
    EndOutput,
    EndSession,
    QueueLen(oneshot::Sender<usize>),
}

type Reply = Option<oneshot::Sender<InterruptionResponse>>;

fn respond(reply: Reply, response: InterruptionResponse) {
    if let Some(tx) = reply {
        let _ = tx.send(response);
    }
}

/// Builder for [`InterruptionManager`]; every collaborator has a default.
pub struct ManagerBuilder {
    config: CadenceConfig,
    renderer: Option<Arc<dyn Renderer>>,
    selector: Option<Arc<dyn TransitionSelector>>,
    planner: Option<Arc<dyn RecoveryPlanner>>,
    store: Option<Arc<ContextStore>>,
    sweeper: bool,
}

impl ManagerBuilder {
    pub fn new(config: CadenceConfig) -> Self {
        Self {
            config,
            renderer: None,
            selector: None,
            planner: None,
            store: None,
            sweeper: true,
        }
    }

    pub fn renderer(mut self, renderer: Arc<dyn Renderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn transition_selector(mut self, selector: Arc<dyn TransitionSelector>) -> Self {
        self.selector = Some(selector);
        self
    }

    pub fn recovery_planner(mut self, planner: Arc<dyn RecoveryPlanner>) -> Self {
        self.planner = Some(planner);
        self
    }

    /// Share a context store (e.g. with a persistence collaborator).
    pub fn context_store(mut self, store: Arc<ContextStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Disable the background snapshot sweeper (expiry then happens on read only).
    pub fn without_sweeper(mut self) -> Self {
        self.sweeper = false;
        self
    }

    /// Validate the configuration and start the actor. Must run inside a Tokio runtime.
    pub fn spawn(self) -> CadenceResult<InterruptionManager> {
        self.config.validate()?;
        let config = Arc::new(self.config);

        let store = self
            .store
            .unwrap_or_else(|| Arc::new(ContextStore::new(config.snapshot_ttl())));
        let planner = self.planner.unwrap_or_else(|| {
            Arc::new(SnapshotRecoveryPlanner::from_config(Arc::clone(&store), &config))
        });
        let selector = self
            .selector
            .unwrap_or_else(|| Arc::new(DurationTransitionSelector::from_config(&config)));
        let renderer = self.renderer.unwrap_or_else(|| Arc::new(NullRenderer));

        let stats = Arc::new(CadenceStats::default());
        let (cmd_tx, cmd_rx) = mpsc::channel(config.command_buffer);
        let (state_tx, state_rx) = watch::channel(ConversationState::Normal);
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let sweeper = if self.sweeper {
            Some(store.spawn_sweeper(config.sweep_interval()))
        } else {
            None
        };

        let actor = ManagerActor {
            config: Arc::clone(&config),
            state: ConversationState::Normal,
            queue: InterruptionQueue::from_config(&config).with_stats(Arc::clone(&stats)),
            output: None,
            renderer,
            selector,
            planner,
            store: Arc::clone(&store),
            stats: Arc::clone(&stats),
            state_tx,
            event_tx,
            inbox_open: true,
            sweeper,
        };
        tokio::spawn(actor.run(cmd_rx));

        info!(
            queue_capacity = config.queue_capacity,
            confirmation_timeout_ms = config.confirmation_timeout_ms,
            "🎼 Interruption manager started"
        );

        Ok(InterruptionManager {
            commands: cmd_tx,
            state_rx,
            events: Arc::new(Mutex::new(Some(event_rx))),
            classifier: Arc::new(EventClassifier::new(config.ambiguity_threshold)),
            assessor: Arc::new(PriorityAssessor::new(config.novelty_boost)),
            store,
            stats,
            config,
        })
    }
}

/// Cloneable handle to the manager actor. The actor stops when every handle is dropped.
#[derive(Clone)]
pub struct InterruptionManager {
    commands: mpsc::Sender<Command>,
    state_rx: watch::Receiver<ConversationState>,
    events: Arc<Mutex<Option<mpsc::UnboundedReceiver<ManagerEvent>>>>,
    classifier: Arc<EventClassifier>,
    assessor: Arc<PriorityAssessor>,
    store: Arc<ContextStore>,
    stats: Arc<CadenceStats>,
    config: Arc<CadenceConfig>,
}

impl InterruptionManager {
    pub fn builder(config: CadenceConfig) -> ManagerBuilder {
        ManagerBuilder::new(config)
    }

    /// Start a manager with default selector, planner and store.
    pub fn spawn(config: CadenceConfig, renderer: Arc<dyn Renderer>) -> CadenceResult<Self> {
        ManagerBuilder::new(config).renderer(renderer).spawn()
    }

    /// Take the manager event receiver (can only be called once across all clones).
    pub fn take_event_receiver(&self) -> Option<mpsc::UnboundedReceiver<ManagerEvent>> {
        self.events.lock().ok()?.take()
    }

    /// Arbitrate an already classified and scored event.
    pub async fn handle(&self, event: InterruptionEvent) -> CadenceResult<InterruptionResponse> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Handle { event, reply }).await?;
        rx.await.map_err(|_| {
            CadenceError::ManagerUnavailable("manager restarted before replying".to_string())
        })
    }

    /// Classify → score → handle for one producer signal. Invalid signals are
    /// dropped here and never reach the actor.
    pub async fn ingest(&self, signal: &RawSignal) -> CadenceResult<InterruptionResponse> {
        let event = match self.classifier.classify(signal) {
            Ok(event) => event,
            Err(e) => {
                self.stats.record_invalid_signal();
                warn!(source = %signal.source, error = %e, "Dropping invalid signal");
                return Err(e);
            }
        };
        let event = self.assessor.assess(event, self.state());
        self.handle(event).await
    }

    /// Parse the inbound JSON schema, then [`ingest`](Self::ingest).
    pub async fn ingest_json(&self, raw: &str) -> CadenceResult<InterruptionResponse> {
        match RawSignal::from_json(raw) {
            Ok(signal) => self.ingest(&signal).await,
            Err(e) => {
                self.stats.record_invalid_signal();
                warn!(error = %e, "Dropping unparseable signal");
                Err(e)
            }
        }
    }

    /// Announce a new output; pauses snapshot this context.
    pub async fn begin_output(&self, output: OutputContext) -> CadenceResult<()> {
        self.send(Command::BeginOutput(output)).await
    }

    pub async fn report_progress(&self, progress: f32, delivered: impl Into<String>) -> CadenceResult<()> {
        self.send(Command::ReportProgress {
            progress,
            delivered: delivered.into(),
        })
        .await
    }

    /// Output finished; releases events that were waiting for it.
    pub async fn end_output(&self) -> CadenceResult<()> {
        self.send(Command::EndOutput).await
    }

    /// Expire all snapshots and forget seen speakers/conditions.
    pub async fn end_session(&self) -> CadenceResult<()> {
        self.assessor.reset();
        self.send(Command::EndSession).await
    }

    pub async fn queue_len(&self) -> CadenceResult<usize> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::QueueLen(reply)).await?;
        rx.await
            .map_err(|_| CadenceError::ManagerUnavailable("queue query dropped".to_string()))
    }

    pub fn state(&self) -> ConversationState {
        *self.state_rx.borrow()
    }

    pub fn stats(&self) -> CadenceStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn context_store(&self) -> Arc<ContextStore> {
        Arc::clone(&self.store)
    }

    pub fn config(&self) -> &CadenceConfig {
        &self.config
    }

    async fn send(&self, cmd: Command) -> CadenceResult<()> {
        self.commands
            .send(cmd)
            .await
            .map_err(|_| CadenceError::ManagerUnavailable("manager task has stopped".to_string()))
    }
}

enum Wait {
    Done { confirmed: bool },
    Preempted {
        by: InterruptionEvent,
        reply: Reply,
    },
}

enum CycleOutcome {
    Completed(HandledInterruption),
    Preempted {
        by: InterruptionEvent,
        reply: Reply,
    },
}

struct ManagerActor {
    config: Arc<CadenceConfig>,
    state: ConversationState,
    queue: InterruptionQueue,
    output: Option<OutputContext>,
    renderer: Arc<dyn Renderer>,
    selector: Arc<dyn TransitionSelector>,
    planner: Arc<dyn RecoveryPlanner>,
    store: Arc<ContextStore>,
    stats: Arc<CadenceStats>,
    state_tx: watch::Sender<ConversationState>,
    event_tx: mpsc::UnboundedSender<ManagerEvent>,
    inbox_open: bool,
    sweeper: Option<JoinHandle<()>>,
}

impl ManagerActor {
    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        while let Some(cmd) = rx.recv().await {
            let outcome = AssertUnwindSafe(self.process(cmd, &mut rx))
                .catch_unwind()
                .await;
            if outcome.is_err() {
                error!("💥 Interruption manager panicked; restarting in NORMAL with an empty queue");
                self.restart();
            }
        }
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.abort();
        }
        info!("🛑 Interruption manager stopped");
    }

    async fn process(&mut self, cmd: Command, rx: &mut mpsc::Receiver<Command>) {
        match cmd {
            Command::Handle { event, reply } => {
                self.stats.record_handled();
                self.arbitrate(event, Some(reply), rx).await;
                self.drain_queue(rx).await;
            }
            Command::EndOutput => {
                self.output = None;
                self.drain_queue(rx).await;
            }
            other => {
                // Control commands never carry an event here.
                let _ = self.apply_control(other);
            }
        }
    }

    /// Apply a non-arbitration command; hands `Handle` commands back to the caller.
    fn apply_control(&mut self, cmd: Command) -> Option<(InterruptionEvent, Reply)> {
        match cmd {
            Command::Handle { event, reply } => return Some((event, Some(reply))),
            Command::BeginOutput(output) => {
                debug!(topic = %output.topic, "output started");
                self.output = Some(output);
            }
            Command::ReportProgress { progress, delivered } => {
                let limit = self.config.previous_content_tail_chars;
                if let Some(output) = self.output.as_mut() {
                    output.progress = progress.clamp(0.0, 1.0);
                    output.delivered = tail_chars(&delivered, limit);
                }
            }
            Command::EndOutput => {
                self.output = None;
            }
            Command::EndSession => {
                self.store.clear();
                info!("Session ended: context snapshots cleared");
            }
            Command::QueueLen(reply) => {
                let _ = reply.send(self.queue.len());
            }
        }
        None
    }

    async fn arbitrate(&mut self, event: InterruptionEvent, reply: Reply, rx: &mut mpsc::Receiver<Command>) {
        let mut current = Some((event, reply));
        while let Some((event, reply)) = current.take() {
            let strategy = decide_strategy(&event);
            if !strategy.interrupts() {
                let response = self.enqueue(event);
                respond(reply, response);
                return;
            }

            info!(
                event_id = %event.id,
                event_type = event.event_type.as_str(),
                strategy = ?strategy,
                "⚡ Interruption"
            );

            match self.run_cycle(&event, strategy, rx).await {
                CycleOutcome::Completed(handled) => {
                    self.stats.record_interrupted();
                    self.emit(ManagerEvent::Dispatched {
                        event,
                        strategy: handled.strategy,
                    });
                    respond(reply, InterruptionResponse::Handled(handled));
                }
                CycleOutcome::Preempted { by, reply: by_reply } => {
                    warn!(
                        preempted = %event.id,
                        by = %by.id,
                        "Critical event preempted in-flight transition"
                    );
                    self.stats.record_handled();
                    self.stats.record_preemption();
                    self.emit(ManagerEvent::Preempted {
                        preempted: event.id,
                        by: by.id,
                    });
                    respond(
                        reply,
                        InterruptionResponse::Preempted {
                            event_id: event.id,
                            by: by.id,
                        },
                    );
                    current = Some((by, by_reply));
                }
            }
        }
    }

    async fn run_cycle(
        &mut self,
        event: &InterruptionEvent,
        strategy: InterruptionStrategy,
        rx: &mut mpsc::Receiver<Command>,
    ) -> CycleOutcome {
        let estimate = self.config.pause_estimates.for_strategy(strategy);
        let topic = self.output.as_ref().map(|o| o.topic.clone());
        let (strategy, transition) =
            match self.selector.select_transition(event, estimate, topic.as_deref()) {
                Ok(plan) => (strategy, plan),
                Err(e) => {
                    warn!(event_id = %event.id, error = %e, "Transition selection failed, falling back to IMMEDIATE_STOP");
                    self.stats.record_transition_fallback();
                    (InterruptionStrategy::ImmediateStop, TransitionPlan::hard_stop())
                }
            };

        self.set_state(if strategy.fades() {
            ConversationState::Transitioning
        } else {
            ConversationState::Pausing
        });

        let context_id = ContextId::new();
        if let Some(snapshot) = self.capture_snapshot(event, &transition) {
            self.store.store(context_id, snapshot);
        }

        let directive = if strategy == InterruptionStrategy::ImmediateStop {
            RenderDirective::stop()
        } else {
            RenderDirective::pause(&transition)
        };
        let confirmed = match self.render_bounded(directive, event, rx).await {
            Wait::Done { confirmed } => confirmed,
            Wait::Preempted { by, reply } => return CycleOutcome::Preempted { by, reply },
        };
        self.set_state(ConversationState::Paused);

        self.set_state(ConversationState::Resuming);
        let recovery = match self.planner.plan(&context_id) {
            Ok(plan) => plan,
            Err(e) => {
                warn!(context_id = %context_id, error = %e, "Recovery planning failed, falling back to FRESH_START");
                self.stats.record_recovery_fallback();
                RecoveryPlan::fresh_start(context_id)
            }
        };
        if let Wait::Preempted { by, reply } =
            self.render_bounded(RenderDirective::resume(&recovery), event, rx).await
        {
            return CycleOutcome::Preempted { by, reply };
        }
        self.set_state(ConversationState::Normal);

        CycleOutcome::Completed(HandledInterruption {
            event_id: event.id,
            strategy,
            transition,
            recovery,
            confirmed,
        })
    }

    /// Send a directive and wait for it to take effect, bounded by the confirmation
    /// timeout. Commands arriving meanwhile are queued, or preempt the cycle.
    async fn render_bounded(
        &mut self,
        directive: RenderDirective,
        current: &InterruptionEvent,
        rx: &mut mpsc::Receiver<Command>,
    ) -> Wait {
        let action = directive.action;
        let limit = self.config.confirmation_timeout();
        let renderer = Arc::clone(&self.renderer);
        let render = tokio::time::timeout(limit, async move { renderer.render(directive).await });
        tokio::pin!(render);

        loop {
            tokio::select! {
                cmd = rx.recv(), if self.inbox_open => {
                    let Some(cmd) = cmd else {
                        self.inbox_open = false;
                        continue;
                    };
                    if let Some((incoming, reply)) = self.apply_control(cmd) {
                        if preempts(&incoming, current) {
                            return Wait::Preempted { by: incoming, reply };
                        }
                        self.stats.record_handled();
                        let response = self.enqueue(incoming);
                        respond(reply, response);
                    }
                }
                result = &mut render => {
                    return match result {
                        Ok(Ok(())) => Wait::Done { confirmed: true },
                        Ok(Err(e)) => {
                            warn!(action = ?action, error = %e, "Renderer failed; proceeding");
                            Wait::Done { confirmed: false }
                        }
                        Err(_) => {
                            let missed = CadenceError::RendererConfirmationTimeout(limit);
                            warn!(action = ?action, error = %missed, "Missed renderer confirmation; proceeding");
                            self.stats.record_confirmation_timeout();
                            Wait::Done { confirmed: false }
                        }
                    };
                }
            }
        }
    }

    /// Release queued events in priority order. Interrupting events re-enter the
    /// decision table. While output is active, `QUEUE_FOR_LATER` events keep their
    /// place and the best interrupting event behind them is served instead.
    async fn drain_queue(&mut self, rx: &mut mpsc::Receiver<Command>) {
        loop {
            let now = Instant::now();
            let next = if self.output.is_some() {
                self.queue
                    .dequeue_next_matching_at(now, |e| decide_strategy(e).interrupts())
            } else {
                self.queue.dequeue_next_at(now)
            };
            let Some(event) = next else {
                break;
            };
            let strategy = decide_strategy(&event);
            if strategy.interrupts() {
                self.arbitrate(event, None, rx).await;
            } else {
                debug!(event_id = %event.id, event_type = event.event_type.as_str(), "dispatching deferred event");
                self.stats.record_dispatched();
                self.emit(ManagerEvent::Dispatched { event, strategy });
            }
        }
    }

    fn enqueue(&mut self, event: InterruptionEvent) -> InterruptionResponse {
        let event_id = event.id;
        match self.queue.enqueue_at(event, Instant::now()) {
            EnqueueOutcome::Accepted | EnqueueOutcome::Evicted(_) => {
                self.stats.record_queued();
                debug!(event_id = %event_id, queued = self.queue.len(), "event queued");
                InterruptionResponse::Queued { event_id }
            }
            EnqueueOutcome::Rejected => InterruptionResponse::Rejected { event_id },
        }
    }

    fn capture_snapshot(&self, event: &InterruptionEvent, transition: &TransitionPlan) -> Option<ContextSnapshot> {
        let output = self.output.as_ref()?;
        let topic_shift = event.payload_flag("topic_shift")
            || event
                .payload_str("topic")
                .map(|t| !t.trim().eq_ignore_ascii_case(output.topic.trim()))
                .unwrap_or(false);
        Some(
            ContextSnapshot::new(
                output.topic.clone(),
                output.progress,
                tail_chars(&output.delivered, self.config.previous_content_tail_chars),
            )
            .with_complexity(output.complexity)
            .with_pause_estimate(Duration::from_millis(transition.pause_duration_ms))
            .interrupted_by(event.event_type, topic_shift),
        )
    }

    fn set_state(&mut self, next: ConversationState) {
        if self.state == next {
            return;
        }
        let from = std::mem::replace(&mut self.state, next);
        debug!(from = from.as_str(), to = next.as_str(), "state transition");
        self.state_tx.send_replace(next);
        self.emit(ManagerEvent::StateChanged { from, to: next });
    }

    fn emit(&self, event: ManagerEvent) {
        let _ = self.event_tx.send(event);
    }

    fn restart(&mut self) {
        self.queue.clear();
        self.output = None;
        self.set_state(ConversationState::Normal);
        self.stats.record_restart();
        self.emit(ManagerEvent::Restarted);
    }
}

fn tail_chars(text: &str, max: usize) -> String {
    let count = text.chars().count();
    if count <= max {
        return text.to_string();
    }
    text.chars().skip(count - max).collect()
}
