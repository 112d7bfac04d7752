//! System limits and configuration bounds.
//!
//! Following TigerStyle: put limits on everything. Every queue, buffer,
//! and per-cycle collection has an explicit maximum size so the consumer
//! stays predictable under load.

/// System-wide limits for a Weft consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Depth of the decoded-message output channel.
    pub message_channel_depth: u32,
    /// Depth of the offset-persister update queue.
    pub persister_queue_depth: u32,
    /// Maximum brokers a single consumer tracks.
    pub max_brokers: u32,
    /// Maximum topics a single consumer subscribes to.
    pub max_topics: u32,
    /// Maximum partitions per topic.
    pub max_partitions_per_topic: u32,
    /// Maximum records decoded from one fetch frame.
    pub max_records_per_frame: u32,
    /// Maximum record key size in bytes.
    pub max_key_bytes: u32,
    /// Maximum record value size in bytes.
    pub max_value_bytes: u32,
}

impl Limits {
    /// Creates limits with safe defaults.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            // Output and persister queues: bounded at 100 each; the output
            // channel is the only backpressure path.
            message_channel_depth: 100,
            persister_queue_depth: 100,

            // Topology: 64 brokers, 256 topics, 1024 partitions each.
            max_brokers: 64,
            max_topics: 256,
            max_partitions_per_topic: 1024,

            // Frames: 10k records, 64KB keys, 1MB values.
            max_records_per_frame: 10_000,
            max_key_bytes: 64 * 1024,
            max_value_bytes: 1024 * 1024,
        }
    }

    /// Validates that all limits are internally consistent.
    ///
    /// # Errors
    /// Returns an error if any limit is zero or inconsistent.
    pub fn validate(&self) -> crate::Result<()> {
        if self.message_channel_depth == 0 {
            return Err(crate::Error::InvalidArgument {
                name: "message_channel_depth",
                reason: "must be positive",
            });
        }
        if self.persister_queue_depth == 0 {
            return Err(crate::Error::InvalidArgument {
                name: "persister_queue_depth",
                reason: "must be positive",
            });
        }
        if self.max_brokers == 0 {
            return Err(crate::Error::InvalidArgument {
                name: "max_brokers",
                reason: "must be positive",
            });
        }
        if self.max_partitions_per_topic == 0 {
            return Err(crate::Error::InvalidArgument {
                name: "max_partitions_per_topic",
                reason: "must be positive",
            });
        }
        if self.max_value_bytes < self.max_key_bytes {
            return Err(crate::Error::InvalidArgument {
                name: "max_value_bytes",
                reason: "must be >= max_key_bytes",
            });
        }
        Ok(())
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self::new()
    }
}
