//! Priority Assessor: static table → numeric adjustment → re-bucketing.
//!
//! Urgency starts at the type's priority anchor, is scaled by producer confidence,
//! and gains a one-off novelty boost for a never-seen speaker or a first-time
//! critical condition. The bucket is then re-derived from the adjusted urgency so
//! classification stays deterministic while queue ordering stays continuous.

use crate::event::{ConversationState, EventType, InterruptionEvent, Priority};
use dashmap::DashSet;
use tracing::debug;

/// Result of scoring one event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Assessment {
    pub priority: Priority,
    pub urgency: f32,
    /// Whether the novelty boost was applied.
    pub novel: bool,
}

/// Scores urgency. Remembers which speakers and critical conditions it has seen;
/// the set is concurrent so producers may score in parallel.
#[derive(Debug)]
pub struct PriorityAssessor {
    novelty_boost: f32,
    seen: DashSet<String>,
}

impl Default for PriorityAssessor {
    fn default() -> Self {
        Self::new(0.1)
    }
}

impl PriorityAssessor {
    pub fn new(novelty_boost: f32) -> Self {
        Self {
            novelty_boost: novelty_boost.max(0.0),
            seen: DashSet::new(),
        }
    }

    /// Score an event against the manager's current state.
    pub fn score(&self, event: &InterruptionEvent, state: ConversationState) -> Assessment {
        let base = event.event_type.default_priority().anchor();
        let mut urgency = base * event.confidence.clamp(0.0, 1.0);

        let novel = novelty_key(event)
            .map(|key| self.seen.insert(key))
            .unwrap_or(false);
        if novel {
            urgency += self.novelty_boost;
        }

        let urgency = urgency.clamp(0.0, 1.0);
        let priority = Priority::from_urgency(urgency);

        debug!(
            event_id = %event.id,
            event_type = event.event_type.as_str(),
            state = state.as_str(),
            urgency,
            priority = ?priority,
            novel,
            "scored event"
        );

        Assessment { priority, urgency, novel }
    }

    /// Score and fold the assessment into the event.
    pub fn assess(&self, event: InterruptionEvent, state: ConversationState) -> InterruptionEvent {
        let a = self.score(&event, state);
        event.with_assessment(a.priority, a.urgency)
    }

    /// Forget every remembered speaker and condition (session end).
    pub fn reset(&self) {
        self.seen.clear();
    }
}

fn novelty_key(event: &InterruptionEvent) -> Option<String> {
    match event.event_type {
        EventType::UserSpeech => {
            let speaker = event.payload_str("speaker").unwrap_or(&event.source);
            Some(format!("speaker:{}", speaker.to_lowercase()))
        }
        EventType::CriticalSound => {
            let condition = event
                .payload_str("sound_class")
                .or_else(|| event.payload_str("condition"))
                .unwrap_or(&event.source);
            Some(format!("condition:{}", condition.to_lowercase()))
        }
        _ => None,
    }
}
