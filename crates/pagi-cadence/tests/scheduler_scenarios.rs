//! End-to-end arbitration scenarios against a live manager actor.

use async_trait::async_trait;
use pagi_cadence::{
    CadenceConfig, CadenceError, CadenceResult, ContextId, ConversationState, EventType,
    InterruptionEvent, InterruptionManager, InterruptionResponse, InterruptionStrategy,
    ManagerEvent, OutputContext, Priority, RawSignal, RecordingRenderer, RecoveryPlan,
    RecoveryPlanner, RecoveryStrategy, RenderAction, RenderDirective, Renderer, TransitionPlan,
    TransitionSelector,
};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn drain(rx: &mut UnboundedReceiver<ManagerEvent>) -> Vec<ManagerEvent> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        out.push(event);
    }
    out
}

fn transitions(events: &[ManagerEvent]) -> Vec<(ConversationState, ConversationState)> {
    events
        .iter()
        .filter_map(|e| match e {
            ManagerEvent::StateChanged { from, to } => Some((*from, *to)),
            _ => None,
        })
        .collect()
}

fn dispatched(events: &[ManagerEvent]) -> Vec<(EventType, InterruptionStrategy)> {
    events
        .iter()
        .filter_map(|e| match e {
            ManagerEvent::Dispatched { event, strategy } => Some((event.event_type, *strategy)),
            _ => None,
        })
        .collect()
}

async fn collect_until_dispatched(
    rx: &mut UnboundedReceiver<ManagerEvent>,
    count: usize,
) -> Vec<ManagerEvent> {
    let mut seen = Vec::new();
    while dispatched(&seen).len() < count {
        match rx.recv().await {
            Some(event) => seen.push(event),
            None => break,
        }
    }
    seen
}

fn urgent_speech() -> InterruptionEvent {
    InterruptionEvent::new(EventType::UserSpeech, "stt").with_urgency(0.9)
}

fn spawn_with(renderer: Arc<dyn Renderer>) -> (InterruptionManager, UnboundedReceiver<ManagerEvent>) {
    init_tracing();
    let manager = InterruptionManager::spawn(CadenceConfig::default(), renderer).unwrap();
    let events = manager.take_event_receiver().unwrap();
    (manager, events)
}

#[tokio::test]
async fn urgent_speech_pauses_gracefully_through_every_state() {
    let renderer = Arc::new(RecordingRenderer::new());
    let (manager, mut events) = spawn_with(renderer.clone());
    manager.begin_output(OutputContext::new("weather")).await.unwrap();

    let response = manager.handle(urgent_speech()).await.unwrap();

    assert_eq!(response.strategy(), Some(InterruptionStrategy::GracefulPause));
    let handled = response.handled().unwrap();
    assert!(handled.confirmed);
    assert_eq!(
        transitions(&drain(&mut events)),
        vec![
            (ConversationState::Normal, ConversationState::Pausing),
            (ConversationState::Pausing, ConversationState::Paused),
            (ConversationState::Paused, ConversationState::Resuming),
            (ConversationState::Resuming, ConversationState::Normal),
        ]
    );
    assert_eq!(
        renderer.actions(),
        vec![RenderAction::PauseWithTransition, RenderAction::Resume]
    );
    assert_eq!(manager.state(), ConversationState::Normal);
}

#[tokio::test]
async fn calm_speech_fades_through_transitioning() {
    let (manager, mut events) = spawn_with(Arc::new(RecordingRenderer::new()));
    manager.begin_output(OutputContext::new("recipe")).await.unwrap();

    let response = manager
        .handle(InterruptionEvent::new(EventType::UserSpeech, "stt"))
        .await
        .unwrap();

    assert_eq!(response.strategy(), Some(InterruptionStrategy::SmoothTransition));
    let first = transitions(&drain(&mut events))[0];
    assert_eq!(first, (ConversationState::Normal, ConversationState::Transitioning));
}

#[tokio::test]
async fn critical_sound_jumps_ahead_of_queued_visual_change() {
    let (manager, mut events) = spawn_with(Arc::new(RecordingRenderer::new()));
    manager.begin_output(OutputContext::new("story")).await.unwrap();

    let visual = manager
        .handle(InterruptionEvent::new(EventType::VisualChange, "camera").with_priority(Priority::Medium))
        .await
        .unwrap();
    assert!(matches!(visual, InterruptionResponse::Queued { .. }));

    tokio::time::sleep(Duration::from_millis(20)).await;
    let critical = manager
        .handle(InterruptionEvent::new(EventType::CriticalSound, "mic"))
        .await
        .unwrap();

    assert_eq!(critical.strategy(), Some(InterruptionStrategy::ImmediateStop));
    assert_eq!(
        dispatched(&drain(&mut events)),
        vec![(EventType::CriticalSound, InterruptionStrategy::ImmediateStop)]
    );
    assert_eq!(manager.queue_len().await.unwrap(), 1);
}

#[tokio::test]
async fn deferred_events_are_released_in_priority_order_when_output_ends() {
    let (manager, mut events) = spawn_with(Arc::new(RecordingRenderer::new()));
    manager.begin_output(OutputContext::new("news")).await.unwrap();

    manager
        .handle(InterruptionEvent::new(EventType::Timeout, "timer"))
        .await
        .unwrap();
    manager
        .handle(InterruptionEvent::new(EventType::CognitiveInsight, "reasoner"))
        .await
        .unwrap();
    assert_eq!(manager.queue_len().await.unwrap(), 2);
    assert!(dispatched(&drain(&mut events)).is_empty());

    manager.end_output().await.unwrap();
    assert_eq!(manager.queue_len().await.unwrap(), 0);
    assert_eq!(
        dispatched(&drain(&mut events)),
        vec![
            (EventType::CognitiveInsight, InterruptionStrategy::QueueForLater),
            (EventType::Timeout, InterruptionStrategy::QueueForLater),
        ]
    );
    assert_eq!(manager.stats().dispatched, 2);
}

#[tokio::test]
async fn short_pause_late_in_output_resumes_exactly() {
    let (manager, _events) = spawn_with(Arc::new(RecordingRenderer::new()));
    manager.begin_output(OutputContext::new("story")).await.unwrap();
    manager
        .report_progress(0.9, "and the knight rode home at last")
        .await
        .unwrap();

    let response = manager.handle(urgent_speech()).await.unwrap();
    let recovery = &response.handled().unwrap().recovery;

    assert_eq!(recovery.strategy, RecoveryStrategy::ResumeExact);
    assert_eq!(recovery.continuation_point, 0.9);
    assert_eq!(
        recovery.previous_content_tail.as_deref(),
        Some("and the knight rode home at last")
    );
    assert_eq!(manager.context_store().len(), 1);
}

#[tokio::test]
async fn topic_shift_bridges_back() {
    let (manager, _events) = spawn_with(Arc::new(RecordingRenderer::new()));
    manager.begin_output(OutputContext::new("gardening")).await.unwrap();
    manager.report_progress(0.6, "water twice a week").await.unwrap();

    let mut payload = serde_json::Map::new();
    payload.insert("topic".into(), json!("dinner plans"));
    let response = manager
        .handle(urgent_speech().with_payload(payload))
        .await
        .unwrap();

    assert_eq!(
        response.handled().unwrap().recovery.strategy,
        RecoveryStrategy::ContextualBridge
    );
}

#[tokio::test]
async fn no_output_means_fresh_start() {
    let (manager, _events) = spawn_with(Arc::new(RecordingRenderer::new()));

    let response = manager.handle(urgent_speech()).await.unwrap();

    assert_eq!(
        response.handled().unwrap().recovery.strategy,
        RecoveryStrategy::FreshStart
    );
    assert!(manager.context_store().is_empty());
}

#[tokio::test(start_paused = true)]
async fn critical_event_preempts_in_flight_transition() {
    let renderer = Arc::new(RecordingRenderer::new().with_pause_delay(Duration::from_millis(1_000)));
    let (manager, mut events) = spawn_with(renderer.clone());
    manager.begin_output(OutputContext::new("lecture")).await.unwrap();

    let speech = InterruptionEvent::new(EventType::UserSpeech, "stt");
    let speech_id = speech.id;
    let pending = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.handle(speech).await })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(manager.state(), ConversationState::Transitioning);

    let alarm = InterruptionEvent::new(EventType::CriticalSound, "smoke_detector");
    let alarm_id = alarm.id;
    let alarm_response = manager.handle(alarm).await.unwrap();
    let speech_response = pending.await.unwrap().unwrap();

    assert_eq!(alarm_response.strategy(), Some(InterruptionStrategy::ImmediateStop));
    assert_eq!(
        speech_response,
        InterruptionResponse::Preempted {
            event_id: speech_id,
            by: alarm_id
        }
    );
    assert!(drain(&mut events).contains(&ManagerEvent::Preempted {
        preempted: speech_id,
        by: alarm_id
    }));
    assert_eq!(
        renderer.actions(),
        vec![
            RenderAction::PauseWithTransition,
            RenderAction::Stop,
            RenderAction::Resume
        ]
    );
    assert_eq!(manager.stats().preemptions, 1);
}

#[tokio::test(start_paused = true)]
async fn non_critical_arrivals_during_a_cycle_are_queued_then_served() {
    let renderer = Arc::new(RecordingRenderer::new().with_pause_delay(Duration::from_millis(500)));
    let (manager, mut events) = spawn_with(renderer.clone());
    manager.begin_output(OutputContext::new("lecture")).await.unwrap();

    let pending = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.handle(urgent_speech()).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let second = manager
        .handle(InterruptionEvent::new(EventType::SystemError, "system"))
        .await
        .unwrap();
    assert!(matches!(second, InterruptionResponse::Queued { .. }));
    assert!(pending.await.unwrap().unwrap().handled().is_some());

    let seen = collect_until_dispatched(&mut events, 2).await;
    assert_eq!(
        dispatched(&seen),
        vec![
            (EventType::UserSpeech, InterruptionStrategy::GracefulPause),
            (EventType::SystemError, InterruptionStrategy::ContextualPause),
        ]
    );
    assert_eq!(renderer.actions().len(), 4);
}

#[tokio::test(start_paused = true)]
async fn quiet_speech_behind_a_deferred_event_still_gets_a_cycle() {
    let renderer = Arc::new(RecordingRenderer::new().with_pause_delay(Duration::from_millis(500)));
    let (manager, mut events) = spawn_with(renderer.clone());
    manager.begin_output(OutputContext::new("lecture")).await.unwrap();

    let pending = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.handle(urgent_speech()).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    manager
        .handle(InterruptionEvent::new(EventType::VisualChange, "camera").with_priority(Priority::Medium))
        .await
        .unwrap();
    let quiet = InterruptionEvent::new(EventType::UserSpeech, "stt")
        .with_priority(Priority::Low)
        .with_urgency(0.3);
    assert!(matches!(
        manager.handle(quiet).await.unwrap(),
        InterruptionResponse::Queued { .. }
    ));
    pending.await.unwrap().unwrap();

    let seen = collect_until_dispatched(&mut events, 2).await;
    assert_eq!(
        dispatched(&seen),
        vec![
            (EventType::UserSpeech, InterruptionStrategy::GracefulPause),
            (EventType::UserSpeech, InterruptionStrategy::SmoothTransition),
        ]
    );
    assert_eq!(
        renderer.actions(),
        vec![
            RenderAction::PauseWithTransition,
            RenderAction::Resume,
            RenderAction::PauseWithTransition,
            RenderAction::Resume,
        ]
    );
    // The visual change keeps waiting for the output to end.
    assert_eq!(manager.queue_len().await.unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn critical_event_preempts_while_resuming() {
    let renderer = Arc::new(RecordingRenderer::new().with_resume_delay(Duration::from_millis(1_000)));
    let (manager, _events) = spawn_with(renderer.clone());
    manager.begin_output(OutputContext::new("lecture")).await.unwrap();

    let speech = InterruptionEvent::new(EventType::UserSpeech, "stt");
    let speech_id = speech.id;
    let pending = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.handle(speech).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(manager.state(), ConversationState::Resuming);

    let alarm = InterruptionEvent::new(EventType::CriticalSound, "smoke_detector");
    let alarm_id = alarm.id;
    let alarm_response = manager.handle(alarm).await.unwrap();

    assert_eq!(alarm_response.strategy(), Some(InterruptionStrategy::ImmediateStop));
    assert_eq!(
        pending.await.unwrap().unwrap(),
        InterruptionResponse::Preempted {
            event_id: speech_id,
            by: alarm_id
        }
    );
    assert_eq!(
        renderer.actions(),
        vec![
            RenderAction::PauseWithTransition,
            RenderAction::Resume,
            RenderAction::Stop,
            RenderAction::Resume,
        ]
    );
    assert_eq!(manager.state(), ConversationState::Normal);
}

#[tokio::test(start_paused = true)]
async fn full_queue_rejects_a_worse_event() {
    init_tracing();
    let config = CadenceConfig {
        queue_capacity: 1,
        ..Default::default()
    };
    let renderer = Arc::new(RecordingRenderer::new().with_pause_delay(Duration::from_millis(500)));
    let manager = InterruptionManager::spawn(config, renderer).unwrap();
    manager.begin_output(OutputContext::new("lecture")).await.unwrap();

    let pending = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.handle(urgent_speech()).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let visual = manager
        .handle(InterruptionEvent::new(EventType::VisualChange, "camera"))
        .await
        .unwrap();
    assert!(matches!(visual, InterruptionResponse::Queued { .. }));

    let timer = InterruptionEvent::new(EventType::Timeout, "timer");
    let timer_id = timer.id;
    assert_eq!(
        manager.handle(timer).await.unwrap(),
        InterruptionResponse::Rejected { event_id: timer_id }
    );
    pending.await.unwrap().unwrap();
    assert_eq!(manager.stats().rejected, 1);
}

#[tokio::test(start_paused = true)]
async fn queued_events_go_stale_on_the_runtime_clock() {
    init_tracing();
    let config = CadenceConfig {
        staleness_ms: 1_000,
        confirmation_timeout_ms: 10_000,
        ..Default::default()
    };
    let renderer = Arc::new(RecordingRenderer::new().with_pause_delay(Duration::from_secs(5)));
    let manager = InterruptionManager::spawn(config, renderer).unwrap();
    manager.begin_output(OutputContext::new("lecture")).await.unwrap();

    let pending = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.handle(urgent_speech()).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    manager
        .handle(InterruptionEvent::new(EventType::VisualChange, "camera"))
        .await
        .unwrap();
    pending.await.unwrap().unwrap();

    assert_eq!(manager.queue_len().await.unwrap(), 0);
    assert_eq!(manager.stats().stale_dropped, 1);
}

#[tokio::test(start_paused = true)]
async fn unresponsive_renderer_does_not_hang_the_manager() {
    init_tracing();
    let config = CadenceConfig {
        confirmation_timeout_ms: 200,
        ..Default::default()
    };
    let renderer = Arc::new(RecordingRenderer::new().with_pause_delay(Duration::from_secs(30)));
    let manager = InterruptionManager::spawn(config, renderer).unwrap();

    let response = manager.handle(urgent_speech()).await.unwrap();

    assert!(!response.handled().unwrap().confirmed);
    assert_eq!(manager.stats().confirmation_timeouts, 1);
    assert_eq!(manager.state(), ConversationState::Normal);
}

#[tokio::test]
async fn concurrent_handles_never_overlap_cycles() {
    let renderer = Arc::new(
        RecordingRenderer::new()
            .with_pause_delay(Duration::from_millis(5))
            .with_resume_delay(Duration::from_millis(5)),
    );
    let (manager, mut events) = spawn_with(renderer.clone());
    manager.begin_output(OutputContext::new("podcast")).await.unwrap();

    let tasks: Vec<_> = (0..8)
        .map(|i| {
            let manager = manager.clone();
            tokio::spawn(async move {
                let speaker = format!("speaker-{i}");
                let mut payload = serde_json::Map::new();
                payload.insert("speaker".into(), json!(speaker));
                manager
                    .handle(urgent_speech().with_payload(payload))
                    .await
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }
    // Round-trip through the actor so every queued cycle has drained.
    manager.queue_len().await.unwrap();

    let events = drain(&mut events);
    let chain = transitions(&events);
    let mut current = ConversationState::Normal;
    for (from, to) in &chain {
        assert_eq!(*from, current, "state chain broken: {chain:?}");
        current = *to;
    }
    assert_eq!(current, ConversationState::Normal);
    assert_eq!(dispatched(&events).len(), 8);

    let actions = renderer.actions();
    for pair in actions.chunks(2) {
        assert_eq!(pair, [RenderAction::PauseWithTransition, RenderAction::Resume]);
    }
}

struct PanicOnceRenderer {
    armed: AtomicBool,
}

#[async_trait]
impl Renderer for PanicOnceRenderer {
    async fn render(&self, _directive: RenderDirective) -> CadenceResult<()> {
        if self.armed.swap(false, Ordering::SeqCst) {
            panic!("renderer crashed");
        }
        Ok(())
    }
}

#[tokio::test]
async fn panic_restarts_manager_with_empty_queue() {
    let (manager, mut events) = spawn_with(Arc::new(PanicOnceRenderer {
        armed: AtomicBool::new(true),
    }));
    manager.begin_output(OutputContext::new("music")).await.unwrap();
    manager
        .handle(InterruptionEvent::new(EventType::VisualChange, "camera"))
        .await
        .unwrap();

    let err = manager.handle(urgent_speech()).await.unwrap_err();
    assert!(matches!(err, CadenceError::ManagerUnavailable(_)));
    assert_eq!(manager.queue_len().await.unwrap(), 0);
    assert_eq!(manager.state(), ConversationState::Normal);
    assert!(drain(&mut events).contains(&ManagerEvent::Restarted));
    assert_eq!(manager.stats().restarts, 1);

    let response = manager.handle(urgent_speech()).await.unwrap();
    assert!(response.handled().is_some());
}

struct BrokenPlanner;

impl RecoveryPlanner for BrokenPlanner {
    fn plan(&self, _context_id: &ContextId) -> CadenceResult<RecoveryPlan> {
        Err(CadenceError::RecoveryPlanFailure("store offline".into()))
    }
}

struct BrokenSelector;

impl TransitionSelector for BrokenSelector {
    fn select_transition(
        &self,
        _event: &InterruptionEvent,
        _pause_estimate: Duration,
        _current_topic: Option<&str>,
    ) -> CadenceResult<TransitionPlan> {
        Err(CadenceError::Transition("no categories loaded".into()))
    }
}

#[tokio::test]
async fn planner_failure_falls_back_to_fresh_start() {
    init_tracing();
    let manager = InterruptionManager::builder(CadenceConfig::default())
        .recovery_planner(Arc::new(BrokenPlanner))
        .spawn()
        .unwrap();
    manager.begin_output(OutputContext::new("story")).await.unwrap();
    manager.report_progress(0.9, "almost done").await.unwrap();

    let response = manager.handle(urgent_speech()).await.unwrap();

    assert_eq!(
        response.handled().unwrap().recovery.strategy,
        RecoveryStrategy::FreshStart
    );
    assert_eq!(manager.stats().recovery_fallbacks, 1);
}

#[tokio::test]
async fn selector_failure_falls_back_to_hard_stop() {
    init_tracing();
    let renderer = Arc::new(RecordingRenderer::new());
    let manager = InterruptionManager::builder(CadenceConfig::default())
        .renderer(renderer.clone())
        .transition_selector(Arc::new(BrokenSelector))
        .spawn()
        .unwrap();

    let response = manager.handle(urgent_speech()).await.unwrap();

    assert_eq!(response.strategy(), Some(InterruptionStrategy::ImmediateStop));
    assert_eq!(renderer.actions()[0], RenderAction::Stop);
    assert_eq!(manager.stats().transition_fallbacks, 1);
}

#[tokio::test]
async fn invalid_signals_are_dropped_without_touching_the_queue() {
    let (manager, _events) = spawn_with(Arc::new(RecordingRenderer::new()));

    let malformed = manager.ingest_json("{not json").await.unwrap_err();
    assert!(matches!(malformed, CadenceError::InvalidEventPayload(_)));

    let nameless = RawSignal::new("  ", 0.9, json!({}));
    assert!(matches!(
        manager.ingest(&nameless).await.unwrap_err(),
        CadenceError::InvalidEventPayload(_)
    ));

    assert_eq!(manager.stats().invalid_signals, 2);
    assert_eq!(manager.queue_len().await.unwrap(), 0);
}

#[tokio::test]
async fn ingest_scores_repeat_speakers_without_novelty() {
    let (manager, _events) = spawn_with(Arc::new(RecordingRenderer::new()));
    manager.begin_output(OutputContext::new("quiz")).await.unwrap();

    let signal = RawSignal::new(
        "dialogue",
        1.0,
        json!({"transcript": "wait, what?", "speaker": "ana"}),
    );
    assert!(manager.ingest(&signal).await.unwrap().handled().is_some());

    let again = manager.ingest(&signal).await.unwrap();
    assert_eq!(again.strategy(), Some(InterruptionStrategy::SmoothTransition));
}

#[tokio::test]
async fn ambiguous_signal_becomes_low_priority_timeout() {
    let (manager, mut events) = spawn_with(Arc::new(RecordingRenderer::new()));

    let response = manager
        .ingest_json(r#"{"source": "mystery", "confidence": 0.1}"#)
        .await
        .unwrap();

    // No output is active, so the deferred event is released straight away.
    assert!(matches!(response, InterruptionResponse::Queued { .. }));
    manager.queue_len().await.unwrap();
    assert_eq!(
        dispatched(&drain(&mut events)),
        vec![(EventType::Timeout, InterruptionStrategy::QueueForLater)]
    );
}

#[tokio::test]
async fn end_session_expires_snapshots() {
    let (manager, _events) = spawn_with(Arc::new(RecordingRenderer::new()));
    manager.begin_output(OutputContext::new("story")).await.unwrap();
    manager.handle(urgent_speech()).await.unwrap();
    assert_eq!(manager.context_store().len(), 1);

    manager.end_session().await.unwrap();
    manager.queue_len().await.unwrap();
    assert!(manager.context_store().is_empty());
}

struct FailingRenderer;

#[async_trait]
impl Renderer for FailingRenderer {
    async fn render(&self, directive: RenderDirective) -> CadenceResult<()> {
        match directive.action {
            RenderAction::Resume => Ok(()),
            _ => Err(CadenceError::Render("audio device unplugged".into())),
        }
    }
}

#[tokio::test]
async fn renderer_error_is_treated_as_missed_confirmation() {
    let (manager, _events) = spawn_with(Arc::new(FailingRenderer));

    let response = manager.handle(urgent_speech()).await.unwrap();

    assert!(!response.handled().unwrap().confirmed);
    assert_eq!(manager.state(), ConversationState::Normal);
}

