//! Queue Manager: a bounded, priority-ordered holding area for events awaiting
//! arbitration.
//!
//! Score (lower is dispatched first):
//!
//! ```text
//! base(priority) - confidence * urgency * 10 - min(age_secs / divisor, cap)
//! base = { critical: 1, high: 10, medium: 50, low: 100 }
//! ```
//!
//! Scores are evaluated at dequeue time, so waiting events age into better scores.
//! Ties go to the earlier enqueue. Stale events are dropped lazily on dequeue.

use crate::config::CadenceConfig;
use crate::error::CadenceError;
use crate::event::{EventType, InterruptionEvent};
use crate::stats::CadenceStats;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Age-boost parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AgingPolicy {
    pub divisor_secs: f64,
    pub cap: f64,
}

impl Default for AgingPolicy {
    fn default() -> Self {
        Self {
            divisor_secs: 10.0,
            cap: 20.0,
        }
    }
}

impl AgingPolicy {
    pub fn boost(&self, age: Duration) -> f64 {
        (age.as_secs_f64() / self.divisor_secs).min(self.cap)
    }
}

/// A queued event with its enqueue time and arrival order.
#[derive(Debug, Clone)]
pub struct QueueItem {
    pub event: InterruptionEvent,
    pub queued_at: Instant,
    seq: u64,
}

impl QueueItem {
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.queued_at)
    }

    /// Priority score at `now` (lower = more urgent).
    pub fn priority_score(&self, now: Instant, aging: &AgingPolicy) -> f64 {
        let adjustment = f64::from(self.event.confidence) * f64::from(self.event.urgency) * 10.0;
        self.event.priority.queue_base() - adjustment - aging.boost(self.age(now))
    }

    fn rank(&self, other: &QueueItem, now: Instant, aging: &AgingPolicy) -> Ordering {
        self.priority_score(now, aging)
            .total_cmp(&other.priority_score(now, aging))
            .then(self.seq.cmp(&other.seq))
    }
}

/// Result of an enqueue attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum EnqueueOutcome {
    Accepted,
    /// Accepted by evicting the worst queued event.
    Evicted(InterruptionEvent),
    /// Queue full and the new event was no better than the worst.
    Rejected,
}

impl EnqueueOutcome {
    pub fn accepted(&self) -> bool {
        !matches!(self, EnqueueOutcome::Rejected)
    }
}

/// Bounded priority queue of interruption events.
#[derive(Debug)]
pub struct InterruptionQueue {
    items: Vec<QueueItem>,
    capacity: usize,
    aging: AgingPolicy,
    default_staleness: Duration,
    staleness: HashMap<EventType, Duration>,
    next_seq: u64,
    stats: Option<Arc<CadenceStats>>,
}

impl InterruptionQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
            capacity,
            aging: AgingPolicy::default(),
            default_staleness: Duration::from_secs(10),
            staleness: HashMap::new(),
            next_seq: 0,
            stats: None,
        }
    }

    pub fn from_config(config: &CadenceConfig) -> Self {
        let staleness = EventType::ALL
            .iter()
            .map(|t| (*t, config.staleness_for(*t)))
            .collect();
        Self {
            items: Vec::with_capacity(config.queue_capacity),
            capacity: config.queue_capacity,
            aging: AgingPolicy {
                divisor_secs: config.age_boost_divisor_secs,
                cap: config.age_boost_cap,
            },
            default_staleness: Duration::from_millis(config.staleness_ms),
            staleness,
            next_seq: 0,
            stats: None,
        }
    }

    pub fn with_aging(mut self, aging: AgingPolicy) -> Self {
        self.aging = aging;
        self
    }

    pub fn with_staleness(mut self, event_type: EventType, window: Duration) -> Self {
        self.staleness.insert(event_type, window);
        self
    }

    pub fn with_stats(mut self, stats: Arc<CadenceStats>) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn aging(&self) -> &AgingPolicy {
        &self.aging
    }

    /// Enqueue now. Returns false when the queue was full and the event lost.
    pub fn enqueue(&mut self, event: InterruptionEvent) -> bool {
        self.enqueue_at(event, Instant::now()).accepted()
    }

    /// Enqueue at `now`. Stale items are pruned first so a full queue never turns
    /// away a live event in favour of dead ones.
    pub fn enqueue_at(&mut self, event: InterruptionEvent, now: Instant) -> EnqueueOutcome {
        self.prune_stale(now);
        let item = QueueItem {
            event,
            queued_at: now,
            seq: self.next_seq,
        };
        self.next_seq += 1;

        if self.items.len() < self.capacity {
            debug!(event_id = %item.event.id, queued = self.items.len() + 1, "enqueued");
            self.items.push(item);
            return EnqueueOutcome::Accepted;
        }

        let overflow = CadenceError::QueueOverflow {
            capacity: self.capacity,
        };
        let aging = self.aging;
        let worst = self
            .items
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.rank(b, now, &aging))
            .map(|(i, _)| i);

        match worst {
            Some(idx) if item.priority_score(now, &aging) < self.items[idx].priority_score(now, &aging) => {
                let evicted = self.items.swap_remove(idx);
                warn!(
                    error = %overflow,
                    evicted = %evicted.event.id,
                    admitted = %item.event.id,
                    "Queue overflow: evicted lowest-priority event"
                );
                self.bump(|s| s.record_evicted());
                self.items.push(item);
                EnqueueOutcome::Evicted(evicted.event)
            }
            _ => {
                warn!(
                    error = %overflow,
                    rejected = %item.event.id,
                    "Queue overflow: rejected event no better than queued worst"
                );
                self.bump(|s| s.record_rejected());
                EnqueueOutcome::Rejected
            }
        }
    }

    /// Remove and return the most urgent live event.
    pub fn dequeue_next(&mut self) -> Option<InterruptionEvent> {
        self.dequeue_next_at(Instant::now())
    }

    pub fn dequeue_next_at(&mut self, now: Instant) -> Option<InterruptionEvent> {
        self.prune_stale(now);
        let idx = self.best_index(now)?;
        Some(self.items.remove(idx).event)
    }

    /// The most urgent live event, without removing it.
    pub fn peek_next_at(&mut self, now: Instant) -> Option<&QueueItem> {
        self.prune_stale(now);
        let idx = self.best_index(now)?;
        self.items.get(idx)
    }

    /// Remove and return the most urgent live event satisfying `accept`. Items
    /// that do not match keep their place.
    pub fn dequeue_next_matching_at<F>(&mut self, now: Instant, accept: F) -> Option<InterruptionEvent>
    where
        F: Fn(&InterruptionEvent) -> bool,
    {
        self.prune_stale(now);
        let aging = self.aging;
        let idx = self
            .items
            .iter()
            .enumerate()
            .filter(|(_, item)| accept(&item.event))
            .min_by(|(_, a), (_, b)| a.rank(b, now, &aging))
            .map(|(i, _)| i)?;
        Some(self.items.remove(idx).event)
    }

    /// Drop every event older than its type's relevance window.
    pub fn prune_stale(&mut self, now: Instant) -> usize {
        let before = self.items.len();
        let default = self.default_staleness;
        let staleness = &self.staleness;
        let mut dropped = Vec::new();
        self.items.retain(|item| {
            let window = staleness.get(&item.event.event_type).copied().unwrap_or(default);
            let live = item.age(now) <= window;
            if !live {
                dropped.push((item.event.id, item.event.event_type));
            }
            live
        });
        for (id, event_type) in &dropped {
            debug!(event_id = %id, event_type = event_type.as_str(), "dropped stale event");
        }
        let count = before - self.items.len();
        if count > 0 {
            self.bump(|s| s.record_stale(count as u64));
        }
        count
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    fn best_index(&self, now: Instant) -> Option<usize> {
        self.items
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| a.rank(b, now, &self.aging))
            .map(|(i, _)| i)
    }

    fn bump(&self, f: impl FnOnce(&CadenceStats)) {
        if let Some(ref stats) = self.stats {
            f(stats);
        }
    }
}
