//! Static scheduler configuration.
//!
//! Injected once at manager construction and never mutated afterwards. Values can
//! come from code (`CadenceConfig::default()` plus struct update syntax), or from a
//! TOML file plus environment overrides via [`CadenceConfig::load`].
//!
//! | Key | Default | Description |
//! |-----|---------|-------------|
//! | queue_capacity | 50 | Maximum events held for later arbitration. |
//! | staleness_ms | 10000 | Age after which a queued event is dropped at dequeue time. |
//! | confirmation_timeout_ms | 2000 | Bounded wait for the renderer to confirm a pause. |
//! | snapshot_ttl_secs | 300 | Lifetime of a context snapshot. |

use crate::error::{CadenceError, CadenceResult};
use crate::event::{EventType, InterruptionStrategy};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Expected pause length per interruption strategy, fed to the transition selector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PauseEstimates {
    pub immediate_stop_ms: u64,
    pub graceful_pause_ms: u64,
    pub smooth_transition_ms: u64,
    pub contextual_pause_ms: u64,
}

impl Default for PauseEstimates {
    fn default() -> Self {
        Self {
            immediate_stop_ms: 300,
            graceful_pause_ms: 1_200,
            smooth_transition_ms: 2_500,
            contextual_pause_ms: 3_500,
        }
    }
}

impl PauseEstimates {
    pub fn for_strategy(&self, strategy: InterruptionStrategy) -> Duration {
        let ms = match strategy {
            InterruptionStrategy::ImmediateStop => self.immediate_stop_ms,
            InterruptionStrategy::GracefulPause => self.graceful_pause_ms,
            InterruptionStrategy::SmoothTransition => self.smooth_transition_ms,
            InterruptionStrategy::ContextualPause => self.contextual_pause_ms,
            InterruptionStrategy::QueueForLater => 0,
        };
        Duration::from_millis(ms)
    }
}

/// Scheduler configuration (see module table for the headline values).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CadenceConfig {
    /// Queue capacity; a full queue only admits events better than its worst.
    pub queue_capacity: usize,
    /// Default relevance window for queued events.
    pub staleness_ms: u64,
    /// Per-type relevance windows, keyed by type name (e.g. "VISUAL_CHANGE").
    pub staleness_overrides_ms: HashMap<String, u64>,
    /// Seconds of waiting that earn one point of age boost.
    pub age_boost_divisor_secs: f64,
    /// Maximum age boost in score points.
    pub age_boost_cap: f64,
    /// Wait bound for renderer confirmations.
    pub confirmation_timeout_ms: u64,
    /// Context snapshot lifetime.
    pub snapshot_ttl_secs: u64,
    /// Background sweeper cadence for expired snapshots.
    pub sweep_interval_secs: u64,
    /// Signals below this confidence are ambiguous and classify as TIMEOUT/low.
    pub ambiguity_threshold: f32,
    /// Urgency boost for a never-seen speaker or first-time critical condition.
    pub novelty_boost: f32,
    /// Pauses shorter than this use the `immediate` transition category.
    pub immediate_transition_ms: u64,
    /// Pauses longer than this use the `contextual` transition category.
    pub contextual_transition_ms: u64,
    pub pause_estimates: PauseEstimates,
    /// Pauses up to this long count as short for recovery planning.
    pub short_pause_ms: u64,
    /// Topic complexity at or above which recovery summarises.
    pub complex_topic_threshold: f32,
    /// Below this progress there is nothing worth resuming.
    pub fresh_start_below_progress: f32,
    /// Characters of delivered content kept in a snapshot.
    pub previous_content_tail_chars: usize,
    /// Capacity of the manager's command channel.
    pub command_buffer: usize,
}

impl Default for CadenceConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 50,
            staleness_ms: 10_000,
            staleness_overrides_ms: HashMap::new(),
            age_boost_divisor_secs: 10.0,
            age_boost_cap: 20.0,
            confirmation_timeout_ms: 2_000,
            snapshot_ttl_secs: 300,
            sweep_interval_secs: 30,
            ambiguity_threshold: 0.2,
            novelty_boost: 0.1,
            immediate_transition_ms: 1_000,
            contextual_transition_ms: 3_000,
            pause_estimates: PauseEstimates::default(),
            short_pause_ms: 3_000,
            complex_topic_threshold: 0.7,
            fresh_start_below_progress: 0.1,
            previous_content_tail_chars: 280,
            command_buffer: 256,
        }
    }
}

impl CadenceConfig {
    /// Load from file and environment. Precedence: env `PAGI_CADENCE_CONFIG` path >
    /// `config/cadence` > defaults; then `PAGI_CADENCE__*` variables override.
    pub fn load() -> CadenceResult<Self> {
        let path = std::env::var("PAGI_CADENCE_CONFIG")
            .unwrap_or_else(|_| "config/cadence".to_string());
        Self::load_from(path)
    }

    /// Load with an explicit file path (missing file means defaults + env).
    pub fn load_from<P: AsRef<Path>>(path: P) -> CadenceResult<Self> {
        let defaults = config::Config::try_from(&CadenceConfig::default())?;
        let builder = config::Config::builder().add_source(defaults);

        let path = path.as_ref();
        let builder = if path.exists() || path.with_extension("toml").exists() {
            builder.add_source(config::File::from(path))
        } else {
            builder
        };

        let built = builder
            .add_source(
                config::Environment::with_prefix("PAGI_CADENCE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let cfg: CadenceConfig = built.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject values the scheduler cannot run with.
    pub fn validate(&self) -> CadenceResult<()> {
        if self.queue_capacity == 0 {
            return Err(CadenceError::Config("queue_capacity must be > 0".to_string()));
        }
        if self.confirmation_timeout_ms == 0 {
            return Err(CadenceError::Config(
                "confirmation_timeout_ms must be > 0".to_string(),
            ));
        }
        if self.age_boost_divisor_secs <= 0.0 || !self.age_boost_divisor_secs.is_finite() {
            return Err(CadenceError::Config(
                "age_boost_divisor_secs must be a positive number".to_string(),
            ));
        }
        if self.age_boost_cap < 0.0 {
            return Err(CadenceError::Config("age_boost_cap must be >= 0".to_string()));
        }
        if self.immediate_transition_ms > self.contextual_transition_ms {
            return Err(CadenceError::Config(format!(
                "immediate_transition_ms ({}) must not exceed contextual_transition_ms ({})",
                self.immediate_transition_ms, self.contextual_transition_ms
            )));
        }
        if !(0.0..=1.0).contains(&self.ambiguity_threshold) {
            return Err(CadenceError::Config(
                "ambiguity_threshold must be within [0, 1]".to_string(),
            ));
        }
        if self.command_buffer == 0 {
            return Err(CadenceError::Config("command_buffer must be > 0".to_string()));
        }
        Ok(())
    }

    /// Relevance window for a queued event of the given type.
    pub fn staleness_for(&self, event_type: EventType) -> Duration {
        let ms = self
            .staleness_overrides_ms
            .iter()
            .find(|(k, _)| k.trim().eq_ignore_ascii_case(event_type.as_str()))
            .map(|(_, v)| *v)
            .unwrap_or(self.staleness_ms);
        Duration::from_millis(ms)
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_millis(self.confirmation_timeout_ms)
    }

    pub fn snapshot_ttl(&self) -> Duration {
        Duration::from_secs(self.snapshot_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn short_pause(&self) -> Duration {
        Duration::from_millis(self.short_pause_ms)
    }
}
