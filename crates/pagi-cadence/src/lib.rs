//! # PAGI Cadence - Interruption & Turn-Taking Scheduler
//!
//! Arbitrates asynchronous interruptions (user speech, alarms, visual changes,
//! system errors, insights, timeouts) against an in-progress output, so the agent
//! yields the floor gracefully and picks its output back up coherently.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        Interruption Manager                       │
//! │  ┌────────────┐  ┌────────────┐  ┌─────────────────────────────┐ │
//! │  │ Classifier │→ │  Priority  │→ │ Actor (state + queue)       │ │
//! │  │ (RawSignal)│  │  Assessor  │  │ NORMAL→PAUSING→PAUSED→...   │ │
//! │  └────────────┘  └────────────┘  └─────────────────────────────┘ │
//! │                                     ↓            ↓          ↑    │
//! │  ┌────────────┐  ┌────────────┐  ┌────────────┐  ┌────────────┐  │
//! │  │ Transition │  │  Context   │→ │  Recovery  │  │  Renderer  │  │
//! │  │  Selector  │  │   Store    │  │  Planner   │  │ (confirms) │  │
//! │  └────────────┘  └────────────┘  └────────────┘  └────────────┘  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Producers call [`InterruptionManager::ingest`] (or `handle` for pre-scored
//! events) from any task; only arbitration is serialised through the actor.

pub mod classifier;
pub mod config;
pub mod context;
pub mod error;
pub mod event;
pub mod manager;
pub mod priority;
pub mod queue;
pub mod recovery;
pub mod renderer;
pub mod stats;
pub mod transition;

pub use classifier::EventClassifier;
pub use config::{CadenceConfig, PauseEstimates};
pub use context::{ContextId, ContextSnapshot, ContextStore};
pub use error::{CadenceError, CadenceResult};
pub use event::{
    ConversationState, EventType, InterruptionEvent, InterruptionStrategy, Priority, RawSignal,
};
pub use manager::{
    decide_strategy, HandledInterruption, InterruptionManager, InterruptionResponse,
    ManagerBuilder, ManagerEvent, OutputContext,
};
pub use priority::{Assessment, PriorityAssessor};
pub use queue::{AgingPolicy, EnqueueOutcome, InterruptionQueue, QueueItem};
pub use recovery::{RecoveryPlan, RecoveryPlanner, RecoveryStrategy, SnapshotRecoveryPlanner};
pub use renderer::{
    LoggingRenderer, NullRenderer, RecordingRenderer, RenderAction, RenderDirective, Renderer,
};
pub use stats::{CadenceStats, CadenceStatsSnapshot};
pub use transition::{
    DurationTransitionSelector, TransitionCategory, TransitionPlan, TransitionSelector,
};
