//! Context Store: snapshots of "what was being said" at the moment of an
//! interruption, keyed by an opaque id and expired after a TTL.
//!
//! Backed by a `DashMap` so the manager (writer) and any persistence collaborator
//! (reader) never contend on a single lock. Expiry is checked lazily on read and by
//! a best-effort background sweeper that sits off the manager's critical path.

use crate::event::EventType;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

/// Opaque snapshot key, unique per pause event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextId(Uuid);

impl ContextId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// What was being communicated when output was interrupted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextSnapshot {
    /// Free-text label of the interrupted output.
    pub topic: String,
    /// Share of the planned output already delivered (0.0–1.0).
    pub progress: f32,
    /// Literal tail of what was already delivered.
    pub previous_content: String,
    pub captured_at: DateTime<Utc>,
    /// Producer-supplied complexity of the topic (0.0–1.0).
    #[serde(default)]
    pub topic_complexity: f32,
    /// Expected pause length chosen at transition time.
    #[serde(default)]
    pub pause_estimate_ms: u64,
    #[serde(default)]
    pub interrupted_by: Option<EventType>,
    /// The interrupting event changed the subject and needs acknowledging.
    #[serde(default)]
    pub topic_shift: bool,
}

impl ContextSnapshot {
    pub fn new(topic: impl Into<String>, progress: f32, previous_content: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            progress: progress.clamp(0.0, 1.0),
            previous_content: previous_content.into(),
            captured_at: Utc::now(),
            topic_complexity: 0.0,
            pause_estimate_ms: 0,
            interrupted_by: None,
            topic_shift: false,
        }
    }

    pub fn with_captured_at(mut self, captured_at: DateTime<Utc>) -> Self {
        self.captured_at = captured_at;
        self
    }

    pub fn with_complexity(mut self, complexity: f32) -> Self {
        self.topic_complexity = complexity.clamp(0.0, 1.0);
        self
    }

    pub fn with_pause_estimate(mut self, estimate: Duration) -> Self {
        self.pause_estimate_ms = estimate.as_millis() as u64;
        self
    }

    pub fn interrupted_by(mut self, event_type: EventType, topic_shift: bool) -> Self {
        self.interrupted_by = Some(event_type);
        self.topic_shift = topic_shift;
        self
    }

    pub fn pause_estimate(&self) -> Duration {
        Duration::from_millis(self.pause_estimate_ms)
    }
}

#[derive(Debug, Clone)]
struct StoredSnapshot {
    snapshot: ContextSnapshot,
    expires_at: Instant,
}

/// Keyed snapshot store with TTL eviction.
#[derive(Debug)]
pub struct ContextStore {
    entries: DashMap<ContextId, StoredSnapshot>,
    ttl: Duration,
}

impl ContextStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn store(&self, id: ContextId, snapshot: ContextSnapshot) {
        self.store_at(id, snapshot, Instant::now());
    }

    pub fn store_at(&self, id: ContextId, snapshot: ContextSnapshot, now: Instant) {
        debug!(context_id = %id, topic = %snapshot.topic, progress = snapshot.progress, "snapshot stored");
        self.entries.insert(
            id,
            StoredSnapshot {
                snapshot,
                expires_at: now + self.ttl,
            },
        );
    }

    /// Snapshot for `id`, or `None` if missing or expired.
    pub fn retrieve(&self, id: &ContextId) -> Option<ContextSnapshot> {
        self.retrieve_at(id, Instant::now())
    }

    pub fn retrieve_at(&self, id: &ContextId, now: Instant) -> Option<ContextSnapshot> {
        let expired = match self.entries.get(id) {
            Some(entry) if entry.expires_at > now => return Some(entry.snapshot.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove(id);
            debug!(context_id = %id, "snapshot expired on read");
        }
        None
    }

    pub fn expire(&self, id: &ContextId) {
        self.entries.remove(id);
    }

    /// Remove every expired snapshot; returns how many were dropped.
    pub fn sweep_expired(&self) -> usize {
        self.sweep_expired_at(Instant::now())
    }

    pub fn sweep_expired_at(&self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, stored| stored.expires_at > now);
        before.saturating_sub(self.entries.len())
    }

    /// Drop every snapshot (explicit session end).
    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Periodically sweep expired snapshots. The task ends once the store is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let weak: Weak<ContextStore> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(store) = weak.upgrade() else {
                    break;
                };
                let dropped = store.sweep_expired();
                if dropped > 0 {
                    info!("🧹 Context sweeper expired {} snapshot(s)", dropped);
                }
            }
        })
    }
}
