//! Manager → Renderer contract.
//!
//! The renderer owns audio/visual output. The manager sends it a directive and
//! treats the returned future as the confirmation that the directive has taken
//! effect; that wait is bounded by the configured confirmation timeout.

use crate::error::CadenceResult;
use crate::recovery::{RecoveryPlan, RecoveryStrategy};
use crate::transition::{TransitionCategory, TransitionPlan};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RenderAction {
    Stop,
    PauseWithTransition,
    Resume,
}

/// Directive wire format consumed by the output layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderDirective {
    pub action: RenderAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transition_category: Option<TransitionCategory>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery_strategy: Option<RecoveryStrategy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_content_tail: Option<String>,
}

impl RenderDirective {
    /// Hard stop, no transition phrase.
    pub fn stop() -> Self {
        Self {
            action: RenderAction::Stop,
            transition_category: None,
            recovery_strategy: None,
            topic: None,
            previous_content_tail: None,
        }
    }

    pub fn pause(plan: &TransitionPlan) -> Self {
        Self {
            action: RenderAction::PauseWithTransition,
            transition_category: Some(plan.category),
            recovery_strategy: None,
            topic: plan.topic.clone(),
            previous_content_tail: None,
        }
    }

    pub fn resume(plan: &RecoveryPlan) -> Self {
        Self {
            action: RenderAction::Resume,
            transition_category: None,
            recovery_strategy: Some(plan.strategy),
            topic: plan.topic.clone(),
            previous_content_tail: plan.previous_content_tail.clone(),
        }
    }

    pub fn to_json(&self) -> CadenceResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Output collaborator. `render` resolves once the directive has taken effect.
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, directive: RenderDirective) -> CadenceResult<()>;
}

/// Confirms everything instantly and does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRenderer;

#[async_trait]
impl Renderer for NullRenderer {
    async fn render(&self, _directive: RenderDirective) -> CadenceResult<()> {
        Ok(())
    }
}

/// Logs each directive as JSON and confirms instantly.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingRenderer;

#[async_trait]
impl Renderer for LoggingRenderer {
    async fn render(&self, directive: RenderDirective) -> CadenceResult<()> {
        info!("🔈 Renderer directive: {}", directive.to_json()?);
        Ok(())
    }
}

/// Keeps every directive it receives; optional delays simulate slow output devices.
#[derive(Debug, Default)]
pub struct RecordingRenderer {
    directives: Mutex<Vec<RenderDirective>>,
    pause_delay: Option<Duration>,
    resume_delay: Option<Duration>,
}

impl RecordingRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay before confirming STOP / PAUSE_WITH_TRANSITION.
    pub fn with_pause_delay(mut self, delay: Duration) -> Self {
        self.pause_delay = Some(delay);
        self
    }

    /// Delay before confirming RESUME.
    pub fn with_resume_delay(mut self, delay: Duration) -> Self {
        self.resume_delay = Some(delay);
        self
    }

    pub fn directives(&self) -> Vec<RenderDirective> {
        self.directives
            .lock()
            .map(|d| d.clone())
            .unwrap_or_default()
    }

    pub fn actions(&self) -> Vec<RenderAction> {
        self.directives().iter().map(|d| d.action).collect()
    }
}

#[async_trait]
impl Renderer for RecordingRenderer {
    async fn render(&self, directive: RenderDirective) -> CadenceResult<()> {
        let delay = match directive.action {
            RenderAction::Resume => self.resume_delay,
            RenderAction::Stop | RenderAction::PauseWithTransition => self.pause_delay,
        };
        if let Ok(mut d) = self.directives.lock() {
            d.push(directive);
        }
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }
}
