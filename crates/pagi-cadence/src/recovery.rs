//! Recovery Planner: decides how to pick the interrupted output back up.
//!
//! Strategy selection over the stored snapshot, first match wins:
//!
//! | Condition | Strategy |
//! |-----------|----------|
//! | snapshot missing or expired | `FRESH_START` |
//! | interruption shifted the topic | `CONTEXTUAL_BRIDGE` |
//! | progress > 0.5 and short pause | `RESUME_EXACT` |
//! | long pause or complex topic | `RESUME_SUMMARY` |
//! | almost nothing delivered yet | `FRESH_START` |
//! | otherwise | `RESUME_EXACT` |

use crate::config::CadenceConfig;
use crate::context::{ContextId, ContextSnapshot, ContextStore};
use crate::error::CadenceResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecoveryStrategy {
    /// Continue from the literal tail.
    ResumeExact,
    /// Condense what was said, then continue.
    ResumeSummary,
    /// Acknowledge the interruption's resolution, then bridge back.
    ContextualBridge,
    /// Start over.
    FreshStart,
}

impl RecoveryStrategy {
    /// Scheduling expectation, not a guarantee.
    pub fn estimated_recovery_ms(&self) -> u64 {
        match self {
            RecoveryStrategy::ResumeExact => 50,
            RecoveryStrategy::ResumeSummary => 300,
            RecoveryStrategy::ContextualBridge => 400,
            RecoveryStrategy::FreshStart => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryPlan {
    pub context_id: ContextId,
    pub strategy: RecoveryStrategy,
    /// Copied from the snapshot's progress.
    pub continuation_point: f32,
    pub estimated_recovery_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_content_tail: Option<String>,
}

impl RecoveryPlan {
    pub fn fresh_start(context_id: ContextId) -> Self {
        Self {
            context_id,
            strategy: RecoveryStrategy::FreshStart,
            continuation_point: 0.0,
            estimated_recovery_time_ms: RecoveryStrategy::FreshStart.estimated_recovery_ms(),
            topic: None,
            previous_content_tail: None,
        }
    }

    fn from_snapshot(context_id: ContextId, strategy: RecoveryStrategy, snapshot: ContextSnapshot) -> Self {
        let fresh = strategy == RecoveryStrategy::FreshStart;
        Self {
            context_id,
            strategy,
            continuation_point: if fresh { 0.0 } else { snapshot.progress },
            estimated_recovery_time_ms: strategy.estimated_recovery_ms(),
            topic: Some(snapshot.topic),
            previous_content_tail: if fresh { None } else { Some(snapshot.previous_content) },
        }
    }
}

/// Seam for recovery planning. Implementations must be callable concurrently.
pub trait RecoveryPlanner: Send + Sync {
    fn plan(&self, context_id: &ContextId) -> CadenceResult<RecoveryPlan>;
}

/// Default planner reading snapshots from a shared [`ContextStore`].
#[derive(Debug, Clone)]
pub struct SnapshotRecoveryPlanner {
    store: Arc<ContextStore>,
    short_pause: Duration,
    complex_topic_threshold: f32,
    fresh_start_below: f32,
}

impl SnapshotRecoveryPlanner {
    pub fn new(store: Arc<ContextStore>) -> Self {
        Self::from_config(store, &CadenceConfig::default())
    }

    pub fn from_config(store: Arc<ContextStore>, config: &CadenceConfig) -> Self {
        Self {
            store,
            short_pause: config.short_pause(),
            complex_topic_threshold: config.complex_topic_threshold,
            fresh_start_below: config.fresh_start_below_progress,
        }
    }

    /// Plan as of `now`. Never fails: a missing snapshot means a fresh start.
    pub fn plan_at(&self, context_id: &ContextId, now: DateTime<Utc>) -> RecoveryPlan {
        let Some(snapshot) = self.store.retrieve(context_id) else {
            debug!(context_id = %context_id, "no snapshot, planning fresh start");
            return RecoveryPlan::fresh_start(*context_id);
        };
        let strategy = self.choose(&snapshot, now);
        debug!(context_id = %context_id, strategy = ?strategy, progress = snapshot.progress, "recovery planned");
        RecoveryPlan::from_snapshot(*context_id, strategy, snapshot)
    }

    fn choose(&self, snapshot: &ContextSnapshot, now: DateTime<Utc>) -> RecoveryStrategy {
        let elapsed = (now - snapshot.captured_at).to_std().unwrap_or_default();
        let pause = elapsed.max(snapshot.pause_estimate());
        let short = pause <= self.short_pause;
        let complex = snapshot.topic_complexity >= self.complex_topic_threshold;

        if snapshot.topic_shift {
            RecoveryStrategy::ContextualBridge
        } else if snapshot.progress > 0.5 && short {
            RecoveryStrategy::ResumeExact
        } else if !short || complex {
            RecoveryStrategy::ResumeSummary
        } else if snapshot.progress < self.fresh_start_below {
            RecoveryStrategy::FreshStart
        } else {
            RecoveryStrategy::ResumeExact
        }
    }
}

impl RecoveryPlanner for SnapshotRecoveryPlanner {
    fn plan(&self, context_id: &ContextId) -> CadenceResult<RecoveryPlan> {
        Ok(self.plan_at(context_id, Utc::now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventType;

    fn planner_with(snapshot: ContextSnapshot) -> (SnapshotRecoveryPlanner, ContextId) {
        let store = Arc::new(ContextStore::new(Duration::from_secs(300)));
        let id = ContextId::new();
        store.store(id, snapshot);
        (SnapshotRecoveryPlanner::new(store), id)
    }

    #[test]
    fn missing_snapshot_is_fresh_start() {
        let store = Arc::new(ContextStore::new(Duration::from_secs(300)));
        let planner = SnapshotRecoveryPlanner::new(store);
        let plan = planner.plan(&ContextId::new()).unwrap();
        assert_eq!(plan.strategy, RecoveryStrategy::FreshStart);
        assert_eq!(plan.estimated_recovery_time_ms, 0);
        assert_eq!(plan.continuation_point, 0.0);
    }

    #[test]
    fn high_progress_short_pause_resumes_exactly() {
        let captured = Utc::now();
        let (planner, id) = planner_with(
            ContextSnapshot::new("story", 0.9, "and then the dragon")
                .with_captured_at(captured)
                .with_pause_estimate(Duration::from_millis(500)),
        );
        let plan = planner.plan_at(&id, captured + chrono::Duration::milliseconds(800));
        assert_eq!(plan.strategy, RecoveryStrategy::ResumeExact);
        assert_eq!(plan.continuation_point, 0.9);
        assert_eq!(plan.estimated_recovery_time_ms, 50);
        assert_eq!(plan.previous_content_tail.as_deref(), Some("and then the dragon"));
    }

    #[test]
    fn long_pause_summarises() {
        let captured = Utc::now();
        let (planner, id) = planner_with(ContextSnapshot::new("story", 0.9, "...").with_captured_at(captured));
        let plan = planner.plan_at(&id, captured + chrono::Duration::seconds(20));
        assert_eq!(plan.strategy, RecoveryStrategy::ResumeSummary);
        assert_eq!(plan.estimated_recovery_time_ms, 300);
    }

    #[test]
    fn complex_topic_summarises() {
        let captured = Utc::now();
        let (planner, id) = planner_with(
            ContextSnapshot::new("tax law", 0.3, "...")
                .with_captured_at(captured)
                .with_complexity(0.9),
        );
        let plan = planner.plan_at(&id, captured);
        assert_eq!(plan.strategy, RecoveryStrategy::ResumeSummary);
    }

    #[test]
    fn topic_shift_bridges() {
        let captured = Utc::now();
        let (planner, id) = planner_with(
            ContextSnapshot::new("story", 0.9, "...")
                .with_captured_at(captured)
                .interrupted_by(EventType::UserSpeech, true),
        );
        let plan = planner.plan_at(&id, captured);
        assert_eq!(plan.strategy, RecoveryStrategy::ContextualBridge);
        assert_eq!(plan.estimated_recovery_time_ms, 400);
    }

    #[test]
    fn barely_started_output_restarts() {
        let captured = Utc::now();
        let (planner, id) = planner_with(ContextSnapshot::new("intro", 0.02, "Hel").with_captured_at(captured));
        let plan = planner.plan_at(&id, captured);
        assert_eq!(plan.strategy, RecoveryStrategy::FreshStart);
        assert!(plan.previous_content_tail.is_none());
        assert_eq!(plan.topic.as_deref(), Some("intro"));
    }

    #[test]
    fn pause_estimate_counts_as_pause_length() {
        let captured = Utc::now();
        let (planner, id) = planner_with(
            ContextSnapshot::new("story", 0.8, "...")
                .with_captured_at(captured)
                .with_pause_estimate(Duration::from_millis(3_500)),
        );
        assert_eq!(planner.plan_at(&id, captured).strategy, RecoveryStrategy::ResumeSummary);
    }
}
