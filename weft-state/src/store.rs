//! The offset state store: a nested broker → topic → partitions map.
//!
//! `OffsetState` is the consume loop's canonical view of every partition
//! it tracks. It is single-writer: only the consume loop mutates it, and
//! fetchers receive cloned snapshots of their broker's slice. All
//! transforms here are pure map manipulation; nothing blocks.

use std::collections::BTreeMap;

use weft_core::{Broker, Message, TopicPartition};

use crate::partition::PartitionState;

/// Nested mapping `Broker → Topic → partitions`, ordered for
/// deterministic traversal within a cycle.
///
/// # Invariants
///
/// - At most one entry per (topic, partition) across all brokers.
/// - Offsets never decrease for any (topic, partition).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OffsetState {
    brokers: BTreeMap<Broker, BTreeMap<String, Vec<PartitionState>>>,
}

impl OffsetState {
    /// Creates an empty state.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            brokers: BTreeMap::new(),
        }
    }

    /// Inserts or replaces the state for a partition.
    ///
    /// Any prior entry for the same (topic, partition) is removed first,
    /// wherever it lives; a partition whose leader moved is re-homed
    /// rather than duplicated.
    pub fn insert(&mut self, state: PartitionState) {
        self.remove(&state.tp);

        let partitions = self
            .brokers
            .entry(state.broker.clone())
            .or_default()
            .entry(state.tp.topic.clone())
            .or_default();
        partitions.push(state);
        partitions.sort_by_key(|p| p.tp.partition);

        debug_assert!(self.assert_single_entry());
    }

    /// Removes the state for a partition, returning it if present.
    pub fn remove(&mut self, tp: &TopicPartition) -> Option<PartitionState> {
        let mut removed = None;
        for topics in self.brokers.values_mut() {
            if let Some(partitions) = topics.get_mut(&tp.topic) {
                if let Some(index) = partitions.iter().position(|p| p.tp == *tp) {
                    removed = Some(partitions.remove(index));
                    break;
                }
            }
        }
        // Drop now-empty inner maps so broker iteration stays meaningful.
        for topics in self.brokers.values_mut() {
            topics.retain(|_, partitions| !partitions.is_empty());
        }
        self.brokers.retain(|_, topics| !topics.is_empty());
        removed
    }

    /// Looks up a partition on a specific broker.
    #[must_use]
    pub fn get_partition(
        &self,
        broker: &Broker,
        topic: &str,
        partition: weft_core::PartitionId,
    ) -> Option<&PartitionState> {
        self.brokers
            .get(broker)?
            .get(topic)?
            .iter()
            .find(|p| p.tp.partition == partition)
    }

    /// Looks up a partition anywhere in the state.
    #[must_use]
    pub fn find(&self, tp: &TopicPartition) -> Option<&PartitionState> {
        self.iter().find(|p| p.tp == *tp)
    }

    /// Returns the broker/topic list with the named partition removed.
    #[must_use]
    pub fn get_rest(
        &self,
        broker: &Broker,
        topic: &str,
        partition: weft_core::PartitionId,
    ) -> Vec<PartitionState> {
        self.brokers
            .get(broker)
            .and_then(|topics| topics.get(topic))
            .map(|partitions| {
                partitions
                    .iter()
                    .filter(|p| p.tp.partition != partition)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Iterates every partition across brokers and topics, in
    /// deterministic (broker, topic, partition) order.
    pub fn iter(&self) -> impl Iterator<Item = &PartitionState> {
        self.brokers
            .values()
            .flat_map(BTreeMap::values)
            .flatten()
    }

    /// Enumerates all partitions as an owned list.
    #[must_use]
    pub fn flatten(&self) -> Vec<PartitionState> {
        self.iter().cloned().collect()
    }

    /// Returns the brokers currently tracked.
    #[must_use]
    pub fn brokers(&self) -> Vec<Broker> {
        self.brokers.keys().cloned().collect()
    }

    /// Returns cloned state for every partition of one topic, in
    /// deterministic order.
    #[must_use]
    pub fn partitions_for_topic(&self, topic: &str) -> Vec<PartitionState> {
        self.iter()
            .filter(|p| p.tp.topic == topic)
            .cloned()
            .collect()
    }

    /// Returns a cloned snapshot of the partitions this member owns on
    /// one broker. This is the slice a fetcher receives.
    #[must_use]
    pub fn owned_for_broker(&self, broker: &Broker) -> Vec<PartitionState> {
        self.brokers
            .get(broker)
            .map(|topics| {
                topics
                    .values()
                    .flatten()
                    .filter(|p| p.locked)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Total number of tracked partitions.
    #[must_use]
    pub fn partition_count(&self) -> usize {
        self.iter().count()
    }

    /// Returns true when no partitions are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.brokers.is_empty()
    }

    /// Sets the `locked` flag for a partition. Returns false when the
    /// partition is unknown.
    pub fn set_locked(&mut self, tp: &TopicPartition, locked: bool) -> bool {
        self.partition_mut(tp).is_some_and(|p| {
            p.locked = locked;
            true
        })
    }

    /// Sets a partition's position outright.
    ///
    /// This is the restore path: on lock acquisition the rebalancer
    /// overwrites the probed position with the persisted one, which may
    /// sit behind a latest-endpoint probe. Steady-state advancement goes
    /// through [`Self::merge_fetch_results`], which enforces
    /// monotonicity.
    ///
    /// Returns false when the partition is unknown.
    pub fn set_offset(&mut self, tp: &TopicPartition, offset: weft_core::Offset) -> bool {
        self.partition_mut(tp).is_some_and(|p| {
            p.offset = offset;
            true
        })
    }

    /// Folds a cycle's fetch results back into the state.
    ///
    /// `results` carries, per broker, the latest fetched message for each
    /// partition that advanced this cycle. Each match replaces the
    /// partition's state with `offset = fetched + 1`, preserves `locked`,
    /// and clears `error_code`. Messages for partitions no longer tracked
    /// on that broker are skipped; errored partitions never reach here,
    /// so their state is untouched.
    ///
    /// # Panics
    ///
    /// Panics if an advance would move an offset backwards.
    pub fn merge_fetch_results(&mut self, results: &[(Broker, Vec<Message>)]) {
        for (broker, messages) in results {
            for message in messages {
                let Some(topics) = self.brokers.get_mut(broker) else {
                    continue;
                };
                let Some(partitions) = topics.get_mut(&message.topic) else {
                    continue;
                };
                let Some(state) = partitions
                    .iter_mut()
                    .find(|p| p.tp.partition == message.partition)
                else {
                    continue;
                };

                let advanced = message.offset.next();
                assert!(
                    advanced >= state.offset,
                    "offset for {} would regress: {} < {}",
                    state.tp,
                    advanced,
                    state.offset
                );
                state.offset = advanced;
                state.error_code = 0;
            }
        }
    }

    fn partition_mut(&mut self, tp: &TopicPartition) -> Option<&mut PartitionState> {
        self.brokers
            .values_mut()
            .filter_map(|topics| topics.get_mut(&tp.topic))
            .flat_map(|partitions| partitions.iter_mut())
            .find(|p| p.tp == *tp)
    }

    /// Checks the single-entry invariant; debug builds only.
    fn assert_single_entry(&self) -> bool {
        let mut seen = std::collections::BTreeSet::new();
        for p in self.iter() {
            assert!(
                seen.insert(p.tp.clone()),
                "duplicate entry for {} across brokers",
                p.tp
            );
        }
        true
    }
}
