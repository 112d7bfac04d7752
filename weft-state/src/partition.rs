//! The canonical per-partition record.

use weft_core::{Broker, Offset, PartitionId, TopicPartition};

/// Per-partition consumption state.
///
/// `offset` is the next offset to fetch, one past the last consumed
/// record. `locked` is whether this member currently owns the partition;
/// only lock-holders fetch. `error_code` 0 means healthy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionState {
    /// The (topic, partition) pair.
    pub tp: TopicPartition,
    /// Current partition leader.
    pub broker: Broker,
    /// Next offset to fetch.
    pub offset: Offset,
    /// Whether this member owns the partition.
    pub locked: bool,
    /// Last broker-reported error code; 0 is healthy.
    pub error_code: i16,
}

impl PartitionState {
    /// Creates a healthy, unlocked partition state.
    #[must_use]
    pub const fn new(tp: TopicPartition, broker: Broker, offset: Offset) -> Self {
        Self {
            tp,
            broker,
            offset,
            locked: false,
            error_code: 0,
        }
    }

    /// Returns the partition number.
    #[must_use]
    pub const fn partition(&self) -> PartitionId {
        self.tp.partition
    }

    /// Returns the topic name.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.tp.topic
    }

    /// Renders the registry key, `"<topic>/<partition>"`.
    #[must_use]
    pub fn registry_key(&self) -> String {
        self.tp.registry_key()
    }
}
