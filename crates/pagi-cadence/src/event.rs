//! Core data model: typed interruption events, inbound signals, and the
//! conversation state owned by the manager.

use crate::error::{CadenceError, CadenceResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Urgency above which any event demands an immediate response.
pub const IMMEDIATE_RESPONSE_URGENCY: f32 = 0.8;

/// Fixed vocabulary of interruption sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    UserSpeech,
    CriticalSound,
    VisualChange,
    CognitiveInsight,
    SystemError,
    Timeout,
}

impl EventType {
    pub const ALL: [EventType; 6] = [
        EventType::UserSpeech,
        EventType::CriticalSound,
        EventType::VisualChange,
        EventType::CognitiveInsight,
        EventType::SystemError,
        EventType::Timeout,
    ];

    /// Static default priority (table, not computed).
    pub fn default_priority(&self) -> Priority {
        match self {
            EventType::UserSpeech => Priority::High,
            EventType::CriticalSound => Priority::Critical,
            EventType::VisualChange => Priority::Medium,
            EventType::CognitiveInsight => Priority::Medium,
            EventType::SystemError => Priority::High,
            EventType::Timeout => Priority::Low,
        }
    }

    /// Whether this type of event pauses the current output by default.
    pub fn requires_pause(&self) -> bool {
        matches!(
            self,
            EventType::UserSpeech | EventType::CriticalSound | EventType::SystemError
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::UserSpeech => "USER_SPEECH",
            EventType::CriticalSound => "CRITICAL_SOUND",
            EventType::VisualChange => "VISUAL_CHANGE",
            EventType::CognitiveInsight => "COGNITIVE_INSIGHT",
            EventType::SystemError => "SYSTEM_ERROR",
            EventType::Timeout => "TIMEOUT",
        }
    }
}

/// Coarse priority bucket. Ordered so that `Critical` compares greatest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    /// Numeric urgency anchor for the bucket.
    pub fn anchor(&self) -> f32 {
        match self {
            Priority::Critical => 1.0,
            Priority::High => 0.75,
            Priority::Medium => 0.5,
            Priority::Low => 0.25,
        }
    }

    /// Re-derive a bucket from a continuous urgency score.
    pub fn from_urgency(urgency: f32) -> Self {
        if urgency >= 0.85 {
            Priority::Critical
        } else if urgency >= 0.6 {
            Priority::High
        } else if urgency >= 0.35 {
            Priority::Medium
        } else {
            Priority::Low
        }
    }

    /// Base queue score (lower is dispatched first).
    pub fn queue_base(&self) -> f64 {
        match self {
            Priority::Critical => 1.0,
            Priority::High => 10.0,
            Priority::Medium => 50.0,
            Priority::Low => 100.0,
        }
    }
}

/// A classified interruption. Built once by the classifier and assessor, then
/// consumed exactly once by the manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterruptionEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub priority: Priority,
    pub urgency: f32,
    pub confidence: f32,
    #[serde(default)]
    pub payload: Map<String, Value>,
    pub requires_immediate_response: bool,
}

impl InterruptionEvent {
    /// New event with the type's table defaults: default priority, its urgency
    /// anchor, full confidence and an empty payload.
    pub fn new(event_type: EventType, source: impl Into<String>) -> Self {
        let priority = event_type.default_priority();
        let urgency = priority.anchor();
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            event_type,
            priority,
            urgency,
            confidence: 1.0,
            payload: Map::new(),
            requires_immediate_response: immediate_response_required(event_type, urgency),
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_urgency(mut self, urgency: f32) -> Self {
        self.urgency = urgency.clamp(0.0, 1.0);
        self.requires_immediate_response =
            immediate_response_required(self.event_type, self.urgency);
        self
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    pub fn with_payload(mut self, payload: Map<String, Value>) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Apply a priority assessment, re-deriving `requires_immediate_response`.
    pub fn with_assessment(self, priority: Priority, urgency: f32) -> Self {
        self.with_priority(priority).with_urgency(urgency)
    }

    /// String field from the payload, if present.
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }

    /// Boolean field from the payload; absent or non-bool reads as false.
    pub fn payload_flag(&self, key: &str) -> bool {
        self.payload.get(key).and_then(Value::as_bool).unwrap_or(false)
    }
}

fn immediate_response_required(event_type: EventType, urgency: f32) -> bool {
    matches!(
        event_type,
        EventType::UserSpeech | EventType::CriticalSound | EventType::SystemError
    ) || urgency > IMMEDIATE_RESPONSE_URGENCY
}

/// Conversation state, owned exclusively by the interruption manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConversationState {
    Normal,
    Pausing,
    /// Soft-fade sub-state of `Pausing`.
    Transitioning,
    Paused,
    Resuming,
}

impl ConversationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationState::Normal => "normal",
            ConversationState::Pausing => "pausing",
            ConversationState::Transitioning => "transitioning",
            ConversationState::Paused => "paused",
            ConversationState::Resuming => "resuming",
        }
    }
}

/// How the manager leaves the current output for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InterruptionStrategy {
    /// Hard stop, no transition phrase delay.
    ImmediateStop,
    /// Brief acknowledgement, then stop.
    GracefulPause,
    /// Topic-aware acknowledgement while fading out.
    SmoothTransition,
    /// Pause referencing the current topic.
    ContextualPause,
    /// No state change; hold the event in the queue.
    QueueForLater,
}

impl InterruptionStrategy {
    pub fn interrupts(&self) -> bool {
        !matches!(self, InterruptionStrategy::QueueForLater)
    }

    /// Soft fades run in the `Transitioning` sub-state.
    pub fn fades(&self) -> bool {
        matches!(self, InterruptionStrategy::SmoothTransition)
    }
}

fn default_payload() -> Value {
    Value::Object(Map::new())
}

/// Inbound signal as produced by external detectors (dialogue, vision, sound, reasoning).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSignal {
    pub source: String,
    pub confidence: f32,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default = "default_payload")]
    pub payload: Value,
}

impl RawSignal {
    pub fn new(source: impl Into<String>, confidence: f32, payload: Value) -> Self {
        Self {
            source: source.into(),
            confidence,
            timestamp: Utc::now(),
            payload,
        }
    }

    /// Parse the inbound JSON schema. Malformed input is an invalid payload.
    pub fn from_json(raw: &str) -> CadenceResult<Self> {
        serde_json::from_str(raw).map_err(|e| CadenceError::InvalidEventPayload(e.to_string()))
    }

    /// Structural checks shared by every producer.
    pub fn validate(&self) -> CadenceResult<()> {
        if self.source.trim().is_empty() {
            return Err(CadenceError::InvalidEventPayload(
                "signal source is empty".to_string(),
            ));
        }
        if !self.confidence.is_finite() || !(0.0..=1.0).contains(&self.confidence) {
            return Err(CadenceError::InvalidEventPayload(format!(
                "confidence {} outside [0, 1]",
                self.confidence
            )));
        }
        if !self.payload.is_object() {
            return Err(CadenceError::InvalidEventPayload(
                "payload must be a JSON object".to_string(),
            ));
        }
        Ok(())
    }

    pub fn payload_object(&self) -> Option<&Map<String, Value>> {
        self.payload.as_object()
    }
}
