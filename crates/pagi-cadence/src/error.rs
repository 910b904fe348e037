//! Error types for the PAGI Cadence scheduler

use std::time::Duration;
use thiserror::Error;

/// Result type alias for scheduler operations
pub type CadenceResult<T> = Result<T, CadenceError>;

/// Errors that can occur while arbitrating interruptions.
///
/// Most of these never reach a producer: the manager recovers ambiguity, overflow,
/// missed confirmations and planning failures locally and only logs them. Producers
/// see `InvalidEventPayload` (their own signal was bad) and `ManagerUnavailable`.
#[derive(Error, Debug)]
pub enum CadenceError {
    #[error("Ambiguous signal from '{origin}': confidence {confidence:.2}")]
    ClassificationAmbiguous { origin: String, confidence: f32 },

    #[error("Interruption queue full (capacity {capacity})")]
    QueueOverflow { capacity: usize },

    #[error("Renderer did not confirm within {0:?}")]
    RendererConfirmationTimeout(Duration),

    #[error("Recovery planning failed: {0}")]
    RecoveryPlanFailure(String),

    #[error("Invalid event payload: {0}")]
    InvalidEventPayload(String),

    #[error("Renderer error: {0}")]
    Render(String),

    #[error("Transition selection failed: {0}")]
    Transition(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Configuration load error: {0}")]
    ConfigLoad(#[from] config::ConfigError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Interruption manager unavailable: {0}")]
    ManagerUnavailable(String),
}

impl CadenceError {
    /// True for faults the scheduler absorbs without surfacing them to producers.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            CadenceError::InvalidEventPayload(_) | CadenceError::ManagerUnavailable(_)
        )
    }
}
