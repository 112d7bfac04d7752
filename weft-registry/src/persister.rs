//! Debounced offset persister.
//!
//! The persister decouples fetch-loop latency from registry write
//! latency: fetchers hand it per-message offset updates without
//! blocking, and a single worker coalesces them into one batched `set`
//! per debounce interval (or one final batch on close).
//!
//! ```text
//! Fetcher ──send()──┐
//!                   │    ┌───────────────┐
//! Fetcher ──send()──┼───►│ persister task │──set(batch)──► GroupRegistry
//!                   │    └───────────────┘
//! Fetcher ──send()──┘      (debounce tick)
//! ```
//!
//! Updates are keyed by `"<topic>/<partition>"`; within a window the
//! last write wins. A failed batch write is logged and dropped - the
//! consumer delivers at-least-once, so the next window's checkpoint
//! covers the gap.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};
use weft_core::{Offset, TopicPartition};

use crate::registry::GroupRegistry;

/// One partition-offset checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetUpdate {
    /// The partition being checkpointed.
    pub tp: TopicPartition,
    /// The next-to-consume offset to persist.
    pub offset: Offset,
}

impl OffsetUpdate {
    /// Creates an update.
    #[must_use]
    pub const fn new(tp: TopicPartition, offset: Offset) -> Self {
        Self { tp, offset }
    }
}

/// Handle to a running persister.
///
/// `send` never blocks; `close` flushes whatever is pending and stops
/// the worker. Dropping the handle without `close` still flushes (the
/// worker drains on channel close) but does not wait for it.
#[derive(Debug)]
pub struct PersisterHandle {
    tx: mpsc::Sender<OffsetUpdate>,
    task: JoinHandle<()>,
}

impl PersisterHandle {
    /// Queues an offset update, best-effort.
    ///
    /// A full queue drops the update: coalescing means a later update
    /// for the same partition supersedes it anyway.
    pub fn send(&self, update: OffsetUpdate) {
        if let Err(err) = self.tx.try_send(update) {
            debug!(error = %err, "persister queue rejected update");
        }
    }

    /// Flushes pending updates and stops the worker.
    pub async fn close(self) {
        drop(self.tx);
        if let Err(err) = self.task.await {
            warn!(error = %err, "persister task panicked");
        }
    }
}

/// Spawns a persister worker writing through `registry`.
///
/// The worker flushes its accumulator every `commit_freq` and once more
/// when the handle is closed. `queue_depth` bounds the update queue.
///
/// # Panics
///
/// Panics if `queue_depth` is zero.
#[must_use]
pub fn spawn_persister(
    registry: Arc<dyn GroupRegistry>,
    commit_freq: Duration,
    queue_depth: usize,
) -> PersisterHandle {
    assert!(queue_depth > 0, "queue_depth must be positive");

    let (tx, rx) = mpsc::channel(queue_depth);
    let task = tokio::spawn(persister_task(rx, registry, commit_freq));
    PersisterHandle { tx, task }
}

/// Worker: fold updates into the accumulator, flush on tick or close.
async fn persister_task(
    mut rx: mpsc::Receiver<OffsetUpdate>,
    registry: Arc<dyn GroupRegistry>,
    commit_freq: Duration,
) {
    let mut pending: BTreeMap<String, Offset> = BTreeMap::new();
    // First tick lands one full interval out, not immediately.
    let mut ticker = tokio::time::interval_at(Instant::now() + commit_freq, commit_freq);

    debug!(commit_freq_ms = commit_freq.as_millis() as u64, "persister started");

    loop {
        tokio::select! {
            update = rx.recv() => {
                match update {
                    Some(update) => {
                        // Last write wins within a window.
                        pending.insert(update.tp.registry_key(), update.offset);
                    }
                    None => {
                        flush(registry.as_ref(), &mut pending).await;
                        break;
                    }
                }
            }
            _ = ticker.tick() => {
                flush(registry.as_ref(), &mut pending).await;
            }
        }
    }

    debug!("persister stopped");
}

/// Writes the accumulator as one batch and resets it.
///
/// Failures are logged and the accumulator still resets: at-least-once
/// delivery makes dropping a checkpoint safe.
async fn flush(registry: &dyn GroupRegistry, pending: &mut BTreeMap<String, Offset>) {
    if pending.is_empty() {
        return;
    }

    let pairs: Vec<(String, String)> = pending
        .iter()
        .map(|(key, offset)| (key.clone(), offset.get().to_string()))
        .collect();

    match registry.set(&pairs).await {
        Ok(()) => debug!(count = pairs.len(), "persisted offset batch"),
        Err(err) => warn!(error = %err, count = pairs.len(), "offset batch write failed"),
    }

    pending.clear();
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------
