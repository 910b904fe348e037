//! Event Classifier: turns a raw detector signal into a typed `InterruptionEvent`.
//!
//! Classification is a fixed mapping over `source` and payload shape. Nothing here
//! is learned or stateful, so any number of producers may classify concurrently.

use crate::error::{CadenceError, CadenceResult};
use crate::event::{EventType, InterruptionEvent, Priority, RawSignal};
use serde_json::{Map, Value};
use tracing::{debug, warn};

/// Confidence assigned to signals the classifier could not place.
pub const FALLBACK_CONFIDENCE: f32 = 0.5;

const SPEECH_SOURCES: &[&str] = &["speech", "dialogue", "stt", "asr", "transcri", "voice"];
const SOUND_SOURCES: &[&str] = &["sound", "audio_event", "acoustic", "alarm"];
const VISION_SOURCES: &[&str] = &["vision", "camera", "visual", "video"];
const INSIGHT_SOURCES: &[&str] = &["reason", "insight", "cognitive", "planner"];
const SYSTEM_SOURCES: &[&str] = &["system", "error", "health", "watchdog"];
const TIMER_SOURCES: &[&str] = &["timer", "timeout", "clock"];

/// Maps raw signals onto the fixed event vocabulary.
#[derive(Debug, Clone)]
pub struct EventClassifier {
    ambiguity_threshold: f32,
}

impl Default for EventClassifier {
    fn default() -> Self {
        Self::new(0.2)
    }
}

impl EventClassifier {
    pub fn new(ambiguity_threshold: f32) -> Self {
        Self {
            ambiguity_threshold: ambiguity_threshold.clamp(0.0, 1.0),
        }
    }

    /// Classify a signal. Structurally invalid signals are rejected; ambiguous or
    /// unrecognised ones become `TIMEOUT`/low with confidence 0.5.
    pub fn classify(&self, signal: &RawSignal) -> CadenceResult<InterruptionEvent> {
        signal.validate()?;
        let payload = signal.payload_object().cloned().unwrap_or_default();

        let event = match self.identify(signal, &payload) {
            Ok(event_type) => InterruptionEvent::new(event_type, signal.source.clone())
                .with_confidence(signal.confidence),
            Err(e) => {
                debug!(source = %signal.source, error = %e, "classifier fallback to TIMEOUT");
                fallback_event(&signal.source)
            }
        };

        Ok(event.with_timestamp(signal.timestamp).with_payload(payload))
    }

    /// Classify straight from the inbound JSON schema.
    pub fn classify_json(&self, raw: &str) -> CadenceResult<InterruptionEvent> {
        let signal = RawSignal::from_json(raw)?;
        self.classify(&signal)
    }

    fn identify(&self, signal: &RawSignal, payload: &Map<String, Value>) -> CadenceResult<EventType> {
        if signal.confidence < self.ambiguity_threshold {
            return Err(CadenceError::ClassificationAmbiguous {
                origin: signal.source.clone(),
                confidence: signal.confidence,
            });
        }

        let source = signal.source.to_lowercase();
        if let Some(t) = type_from_payload(payload) {
            return Ok(t);
        }
        if let Some(t) = type_from_source(&source) {
            return Ok(t);
        }

        warn!(source = %signal.source, "Unrecognised signal source, classifying as TIMEOUT");
        Err(CadenceError::ClassificationAmbiguous {
            origin: signal.source.clone(),
            confidence: signal.confidence,
        })
    }
}

fn fallback_event(source: &str) -> InterruptionEvent {
    InterruptionEvent::new(EventType::Timeout, source)
        .with_priority(Priority::Low)
        .with_urgency(Priority::Low.anchor())
        .with_confidence(FALLBACK_CONFIDENCE)
}

/// Payload shape wins over the source label: a dialogue bridge forwarding an
/// alarm still produces a CRITICAL_SOUND.
fn type_from_payload(payload: &Map<String, Value>) -> Option<EventType> {
    let has = |key: &str| payload.get(key).map(|v| !v.is_null()).unwrap_or(false);

    if has("error") {
        Some(EventType::SystemError)
    } else if has("sound_class") {
        Some(EventType::CriticalSound)
    } else if (has("transcript") || has("text")) && has("speaker") {
        Some(EventType::UserSpeech)
    } else if has("scene") || has("objects") {
        Some(EventType::VisualChange)
    } else if has("insight") {
        Some(EventType::CognitiveInsight)
    } else {
        None
    }
}

fn type_from_source(source: &str) -> Option<EventType> {
    let matches_any = |needles: &[&str]| needles.iter().any(|n| source.contains(n));

    // System labels first: "system_alarm" is a fault report, not a sound.
    if matches_any(SYSTEM_SOURCES) {
        Some(EventType::SystemError)
    } else if matches_any(SPEECH_SOURCES) {
        Some(EventType::UserSpeech)
    } else if matches_any(SOUND_SOURCES) {
        Some(EventType::CriticalSound)
    } else if matches_any(VISION_SOURCES) {
        Some(EventType::VisualChange)
    } else if matches_any(INSIGHT_SOURCES) {
        Some(EventType::CognitiveInsight)
    } else if matches_any(TIMER_SOURCES) {
        Some(EventType::Timeout)
    } else {
        None
    }
}
