//! Transition Selector: decides *how* the current output is left.
//!
//! Returns a category plus an optional topic reference. Wording is the renderer's
//! job, which keeps the scheduler locale-agnostic.

use crate::config::CadenceConfig;
use crate::error::CadenceResult;
use crate::event::InterruptionEvent;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Acknowledgement style, chosen by expected pause length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionCategory {
    /// Very short acknowledgement (< 1 s pause).
    Immediate,
    /// Polite hand-over (1–3 s pause).
    Polite,
    /// Acknowledgement referencing the current topic (> 3 s pause).
    Contextual,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionPlan {
    pub category: TransitionCategory,
    pub pause_duration_ms: u64,
    pub fade_out_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
}

impl TransitionPlan {
    /// Plan used when selection fails: stop dead, say nothing topical.
    pub fn hard_stop() -> Self {
        Self {
            category: TransitionCategory::Immediate,
            pause_duration_ms: 0,
            fade_out_ms: 0,
            topic: None,
        }
    }
}

/// Seam for transition selection. Implementations must be callable concurrently.
pub trait TransitionSelector: Send + Sync {
    fn select_transition(
        &self,
        event: &InterruptionEvent,
        pause_estimate: Duration,
        current_topic: Option<&str>,
    ) -> CadenceResult<TransitionPlan>;
}

/// Default selector: category from pause length, fade from category.
#[derive(Debug, Clone)]
pub struct DurationTransitionSelector {
    immediate_below: Duration,
    contextual_above: Duration,
    polite_fade: Duration,
    contextual_fade: Duration,
}

impl Default for DurationTransitionSelector {
    fn default() -> Self {
        Self {
            immediate_below: Duration::from_secs(1),
            contextual_above: Duration::from_secs(3),
            polite_fade: Duration::from_millis(150),
            contextual_fade: Duration::from_millis(300),
        }
    }
}

impl DurationTransitionSelector {
    pub fn from_config(config: &CadenceConfig) -> Self {
        Self {
            immediate_below: Duration::from_millis(config.immediate_transition_ms),
            contextual_above: Duration::from_millis(config.contextual_transition_ms),
            ..Self::default()
        }
    }

    pub fn category_for(&self, pause_estimate: Duration) -> TransitionCategory {
        if pause_estimate < self.immediate_below {
            TransitionCategory::Immediate
        } else if pause_estimate <= self.contextual_above {
            TransitionCategory::Polite
        } else {
            TransitionCategory::Contextual
        }
    }
}

impl TransitionSelector for DurationTransitionSelector {
    fn select_transition(
        &self,
        _event: &InterruptionEvent,
        pause_estimate: Duration,
        current_topic: Option<&str>,
    ) -> CadenceResult<TransitionPlan> {
        let category = self.category_for(pause_estimate);
        let (fade, topic) = match category {
            TransitionCategory::Immediate => (Duration::ZERO, None),
            TransitionCategory::Polite => (self.polite_fade, current_topic.map(str::to_string)),
            TransitionCategory::Contextual => {
                (self.contextual_fade, current_topic.map(str::to_string))
            }
        };
        Ok(TransitionPlan {
            category,
            pause_duration_ms: pause_estimate.as_millis() as u64,
            fade_out_ms: fade.as_millis() as u64,
            topic,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventType;

    fn select(ms: u64, topic: Option<&str>) -> TransitionPlan {
        let event = InterruptionEvent::new(EventType::UserSpeech, "stt");
        DurationTransitionSelector::default()
            .select_transition(&event, Duration::from_millis(ms), topic)
            .unwrap()
    }

    #[test]
    fn category_boundaries() {
        assert_eq!(select(999, None).category, TransitionCategory::Immediate);
        assert_eq!(select(1_000, None).category, TransitionCategory::Polite);
        assert_eq!(select(3_000, None).category, TransitionCategory::Polite);
        assert_eq!(select(3_001, None).category, TransitionCategory::Contextual);
    }

    #[test]
    fn immediate_has_no_fade_or_topic() {
        let plan = select(300, Some("gardening"));
        assert_eq!(plan.fade_out_ms, 0);
        assert!(plan.topic.is_none());
    }

    #[test]
    fn contextual_references_topic() {
        let plan = select(4_000, Some("gardening"));
        assert_eq!(plan.topic.as_deref(), Some("gardening"));
        assert_eq!(plan.pause_duration_ms, 4_000);
        assert!(plan.fade_out_ms > 0);
    }

    #[test]
    fn category_serializes_lowercase() {
        assert_eq!(
            serde_json::to_value(TransitionCategory::Contextual).unwrap(),
            serde_json::json!("contextual")
        );
    }
}
