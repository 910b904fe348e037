//! Arbitration counters. Lock-free so producers can read them while the manager works.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct CadenceStats {
    handled: AtomicU64,
    interrupted: AtomicU64,
    queued: AtomicU64,
    dispatched: AtomicU64,
    rejected: AtomicU64,
    evicted: AtomicU64,
    stale_dropped: AtomicU64,
    preemptions: AtomicU64,
    confirmation_timeouts: AtomicU64,
    transition_fallbacks: AtomicU64,
    recovery_fallbacks: AtomicU64,
    invalid_signals: AtomicU64,
    restarts: AtomicU64,
}

/// Point-in-time copy of [`CadenceStats`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CadenceStatsSnapshot {
    pub handled: u64,
    pub interrupted: u64,
    pub queued: u64,
    pub dispatched: u64,
    pub rejected: u64,
    pub evicted: u64,
    pub stale_dropped: u64,
    pub preemptions: u64,
    pub confirmation_timeouts: u64,
    pub transition_fallbacks: u64,
    pub recovery_fallbacks: u64,
    pub invalid_signals: u64,
    pub restarts: u64,
}

fn bump(counter: &AtomicU64, n: u64) {
    counter.fetch_add(n, Ordering::Relaxed);
}

impl CadenceStats {
    pub fn record_handled(&self) {
        bump(&self.handled, 1);
    }

    pub fn record_interrupted(&self) {
        bump(&self.interrupted, 1);
    }

    pub fn record_queued(&self) {
        bump(&self.queued, 1);
    }

    pub fn record_dispatched(&self) {
        bump(&self.dispatched, 1);
    }

    pub fn record_rejected(&self) {
        bump(&self.rejected, 1);
    }

    pub fn record_evicted(&self) {
        bump(&self.evicted, 1);
    }

    pub fn record_stale(&self, n: u64) {
        bump(&self.stale_dropped, n);
    }

    pub fn record_preemption(&self) {
        bump(&self.preemptions, 1);
    }

    pub fn record_confirmation_timeout(&self) {
        bump(&self.confirmation_timeouts, 1);
    }

    pub fn record_transition_fallback(&self) {
        bump(&self.transition_fallbacks, 1);
    }

    pub fn record_recovery_fallback(&self) {
        bump(&self.recovery_fallbacks, 1);
    }

    pub fn record_invalid_signal(&self) {
        bump(&self.invalid_signals, 1);
    }

    pub fn record_restart(&self) {
        bump(&self.restarts, 1);
    }

    pub fn snapshot(&self) -> CadenceStatsSnapshot {
        let read = |c: &AtomicU64| c.load(Ordering::Relaxed);
        CadenceStatsSnapshot {
            handled: read(&self.handled),
            interrupted: read(&self.interrupted),
            queued: read(&self.queued),
            dispatched: read(&self.dispatched),
            rejected: read(&self.rejected),
            evicted: read(&self.evicted),
            stale_dropped: read(&self.stale_dropped),
            preemptions: read(&self.preemptions),
            confirmation_timeouts: read(&self.confirmation_timeouts),
            transition_fallbacks: read(&self.transition_fallbacks),
            recovery_fallbacks: read(&self.recovery_fallbacks),
            invalid_signals: read(&self.invalid_signals),
            restarts: read(&self.restarts),
        }
    }
}
