//! Consumer runtime statistics.
//!
//! Process-wide counters shared between the consume loop and the
//! embedding application. Everything is an atomic; readers never block
//! the loop.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters and gauges for one consumer.
#[derive(Debug, Default)]
pub struct ConsumerStats {
    /// Completed fetch cycles.
    cycles: AtomicU64,
    /// Cycles that produced no messages.
    idle_cycles: AtomicU64,
    /// Duration of the most recent cycle, in microseconds.
    last_cycle_us: AtomicU64,
    /// Messages emitted on the output channel.
    messages_emitted: AtomicU64,
    /// Fetch faults observed (timeouts, transport, per-partition).
    fetch_faults: AtomicU64,
    /// Wholesale reconnects performed.
    reconnects: AtomicU64,
    /// Rebalance passes performed.
    rebalances: AtomicU64,
    /// Partition locks currently held (gauge).
    locks_held: AtomicU64,
}

impl ConsumerStats {
    /// Creates zeroed stats.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a completed cycle.
    pub fn record_cycle(&self, duration_us: u64, messages: u64) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
        self.last_cycle_us.store(duration_us, Ordering::Relaxed);
        if messages == 0 {
            self.idle_cycles.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Records messages emitted on the output channel.
    pub fn record_messages(&self, count: u64) {
        self.messages_emitted.fetch_add(count, Ordering::Relaxed);
    }

    /// Records observed fetch faults.
    pub fn record_faults(&self, count: u64) {
        self.fetch_faults.fetch_add(count, Ordering::Relaxed);
    }

    /// Records a wholesale reconnect.
    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a rebalance pass.
    pub fn record_rebalance(&self) {
        self.rebalances.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a lock acquisition.
    pub fn lock_acquired(&self) {
        self.locks_held.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a lock release.
    pub fn lock_released(&self) {
        // Reconnects reset in-memory lock flags without releasing; the
        // gauge saturates at zero rather than underflowing.
        let _ = self
            .locks_held
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |held| {
                held.checked_sub(1)
            });
    }

    /// Resets the held-locks gauge (used when ownership is rediscovered).
    pub fn reset_locks_held(&self, held: u64) {
        self.locks_held.store(held, Ordering::Relaxed);
    }

    /// Completed fetch cycles.
    #[must_use]
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    /// Cycles that produced no messages.
    #[must_use]
    pub fn idle_cycles(&self) -> u64 {
        self.idle_cycles.load(Ordering::Relaxed)
    }

    /// Duration of the most recent cycle, in microseconds.
    #[must_use]
    pub fn last_cycle_us(&self) -> u64 {
        self.last_cycle_us.load(Ordering::Relaxed)
    }

    /// Messages emitted on the output channel.
    #[must_use]
    pub fn messages_emitted(&self) -> u64 {
        self.messages_emitted.load(Ordering::Relaxed)
    }

    /// Fetch faults observed.
    #[must_use]
    pub fn fetch_faults(&self) -> u64 {
        self.fetch_faults.load(Ordering::Relaxed)
    }

    /// Wholesale reconnects performed.
    #[must_use]
    pub fn reconnects(&self) -> u64 {
        self.reconnects.load(Ordering::Relaxed)
    }

    /// Rebalance passes performed.
    #[must_use]
    pub fn rebalances(&self) -> u64 {
        self.rebalances.load(Ordering::Relaxed)
    }

    /// Partition locks currently held.
    #[must_use]
    pub fn locks_held(&self) -> u64 {
        self.locks_held.load(Ordering::Relaxed)
    }
}
