//! Cluster metadata lookup and the initial offset probe.
//!
//! Metadata maps each topic to its partition leaders (index = partition
//! number). From that topology the consumer derives its initial
//! [`OffsetState`] by probing every broker for the earliest/latest offset
//! of each partition it leads. The same derivation runs again after any
//! cycle error, when producers are rebuilt from scratch.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::{debug, warn};
use weft_core::{Broker, Offset, PartitionId, TopicPartition};
use weft_state::{OffsetState, PartitionState};

use crate::config::ConsumerConfig;
use crate::error::{ConsumerError, ConsumerResult};
use crate::producer::ProducerFactory;

/// Topic → partition-leader list; index is the partition number.
pub type TopicMetadata = BTreeMap<String, Vec<Broker>>;

/// Cluster metadata lookup.
#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// Fetches the topic → partition-leader mapping from the cluster.
    ///
    /// An empty mapping makes the consumer fail with `NoMetadata`.
    async fn get_metadata(&self, bootstrap: &[Broker]) -> ConsumerResult<TopicMetadata>;
}

/// Restricts metadata to the subscribed topics.
///
/// Subscribed topics missing from the metadata are logged and skipped;
/// they may appear on a later reconnect.
#[must_use]
pub fn filter_subscribed(metadata: TopicMetadata, topics: &[String]) -> TopicMetadata {
    let mut filtered = TopicMetadata::new();
    for topic in topics {
        match metadata.get(topic) {
            Some(leaders) => {
                filtered.insert(topic.clone(), leaders.clone());
            }
            None => warn!(topic = %topic, "subscribed topic missing from metadata"),
        }
    }
    filtered
}

/// Builds the initial offset state by probing every leader broker.
///
/// For each broker, one offset producer is created, asked for the offset
/// range of every partition the broker leads, and shut down again. The
/// probed endpoint is selected by `use_earliest`. Partitions whose probe
/// errors fall back to offset 0 with a warning.
///
/// # Errors
///
/// Returns the producer error when a probe request itself fails.
pub async fn derive_offset_state(
    factory: &dyn ProducerFactory,
    metadata: &TopicMetadata,
    config: &ConsumerConfig,
) -> ConsumerResult<OffsetState> {
    // Regroup topic → leaders into broker → topic → partitions.
    let mut per_broker: BTreeMap<Broker, BTreeMap<String, Vec<PartitionId>>> = BTreeMap::new();
    for (topic, leaders) in metadata {
        for (index, broker) in leaders.iter().enumerate() {
            #[allow(clippy::cast_possible_truncation)] // Partition counts bounded by limits.
            let partition = PartitionId::new(index as u32);
            per_broker
                .entry(broker.clone())
                .or_default()
                .entry(topic.clone())
                .or_default()
                .push(partition);
        }
    }

    let mut state = OffsetState::new();
    for (broker, topics) in &per_broker {
        let request: Vec<(String, Vec<PartitionId>)> = topics
            .iter()
            .map(|(topic, partitions)| (topic.clone(), partitions.clone()))
            .collect();

        let mut producer = factory.offset_producer(broker);
        let response = producer.send_offset_request(&request).await;
        producer.shutdown().await;
        let response = response?;

        for topic_offsets in response {
            for probed in topic_offsets.partitions {
                let tp = TopicPartition::new(topic_offsets.topic.clone(), probed.partition);
                let offset = if probed.error_code == 0 {
                    probed.select(config.use_earliest).unwrap_or_else(|| {
                        warn!(tp = %tp, "offset probe returned no offsets");
                        Offset::new(0)
                    })
                } else {
                    warn!(
                        tp = %tp,
                        error_code = probed.error_code,
                        "offset probe failed for partition"
                    );
                    Offset::new(0)
                };

                debug!(tp = %tp, broker = %broker, offset = %offset, "probed initial offset");
                state.insert(PartitionState::new(tp, broker.clone(), offset));
            }
        }
    }

    Ok(state)
}

// -----------------------------------------------------------------------------
// Simulated Metadata
// -----------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Inner {
    metadata: TopicMetadata,
    calls: u64,
}

/// Scriptable in-memory metadata source for tests.
///
/// Clones share state, so a test can change the topology between
/// reconnects.
#[derive(Debug, Clone, Default)]
pub struct SimulatedMetadata {
    inner: Arc<Mutex<Inner>>,
}

impl SimulatedMetadata {
    /// Creates an empty metadata source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a source answering with the given topology.
    #[must_use]
    pub fn with_topology(metadata: TopicMetadata) -> Self {
        let source = Self::new();
        source.set_metadata(metadata);
        source
    }

    /// Replaces the topology returned by subsequent calls.
    ///
    /// # Panics
    ///
    /// Panics if the mutex is poisoned.
    pub fn set_metadata(&self, metadata: TopicMetadata) {
        let mut inner = self.inner.lock().expect("metadata lock poisoned");
        inner.metadata = metadata;
    }

    /// Returns how many times metadata has been fetched.
    ///
    /// # Panics
    ///
    /// Panics if the mutex is poisoned.
    #[must_use]
    pub fn calls(&self) -> u64 {
        let inner = self.inner.lock().expect("metadata lock poisoned");
        inner.calls
    }
}

#[async_trait]
impl MetadataSource for SimulatedMetadata {
    async fn get_metadata(&self, _bootstrap: &[Broker]) -> ConsumerResult<TopicMetadata> {
        let mut inner = self.inner.lock().expect("metadata lock poisoned");
        inner.calls += 1;
        Ok(inner.metadata.clone())
    }
}

/// Fails the startup path when the filtered metadata is empty.
///
/// # Errors
///
/// Returns `NoMetadata` for an empty mapping.
pub fn require_metadata(metadata: TopicMetadata) -> ConsumerResult<TopicMetadata> {
    if metadata.is_empty() {
        return Err(ConsumerError::NoMetadata);
    }
    Ok(metadata)
}
