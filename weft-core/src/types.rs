//! Strongly-typed identifiers for Weft entities.
//!
//! Explicit types prevent bugs from mixing up a partition number with an
//! offset or a raw port. All wrappers are zero-cost.

use std::fmt;

/// Position of a record within a partition log.
///
/// Weft stores offsets as "next-to-consume": the offset one past the last
/// record this member has emitted for the partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct Offset(u64);

impl Offset {
    /// Creates an offset from a raw value.
    #[inline]
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw offset value.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Returns the next offset.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Returns the last consumed offset for a "next-to-consume" position.
    ///
    /// `None` when nothing has been consumed yet (position 0).
    #[must_use]
    pub const fn last_consumed(self) -> Option<Self> {
        if self.0 == 0 {
            None
        } else {
            Some(Self(self.0 - 1))
        }
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Offset {
    fn from(value: u64) -> Self {
        Self::new(value)
    }
}

/// Identifier of a partition within a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct PartitionId(u32);

impl PartitionId {
    /// Creates a partition id from a raw value.
    #[inline]
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Returns the raw partition number.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for PartitionId {
    fn from(value: u32) -> Self {
        Self::new(value)
    }
}

/// Identity of a group member.
///
/// Either configured by the embedding application or generated at join
/// time. Compared by value; the registry keys locks by it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MemberId(String);

impl MemberId {
    /// Creates a member identity from a name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the identity as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A broker address.
///
/// Equality is by value; brokers are usable as map keys so that per-broker
/// state can be grouped deterministically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Broker {
    /// Host name or address.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl Broker {
    /// Creates a broker address.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Broker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A (topic, partition) pair; the unit of ownership and checkpointing.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TopicPartition {
    /// Topic name.
    pub topic: String,
    /// Partition within the topic.
    pub partition: PartitionId,
}

impl TopicPartition {
    /// Creates a topic-partition pair.
    #[must_use]
    pub fn new(topic: impl Into<String>, partition: PartitionId) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }

    /// Renders the registry key, `"<topic>/<partition>"`.
    ///
    /// The same key addresses both the distributed lock and the persisted
    /// offset for this partition.
    #[must_use]
    pub fn registry_key(&self) -> String {
        format!("{}/{}", self.topic, self.partition)
    }

    /// Parses a registry key back into a topic-partition pair.
    ///
    /// Returns `None` when the key is not of the form
    /// `"<topic>/<partition>"`. Topic names may themselves contain `/`;
    /// the partition is everything after the last separator.
    #[must_use]
    pub fn parse_registry_key(key: &str) -> Option<Self> {
        let (topic, partition) = key.rsplit_once('/')?;
        if topic.is_empty() {
            return None;
        }
        let partition: u32 = partition.parse().ok()?;
        Some(Self::new(topic, PartitionId::new(partition)))
    }
}

impl fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.topic, self.partition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_next() {
        let offset = Offset::new(41);
        assert_eq!(offset.next().get(), 42);
        assert_eq!(Offset::new(u64::MAX).next().get(), u64::MAX);
    }

    #[test]
    fn test_offset_last_consumed() {
        assert_eq!(Offset::new(0).last_consumed(), None);
        assert_eq!(Offset::new(6).last_consumed(), Some(Offset::new(5)));
    }

    #[test]
    fn test_broker_equality_by_value() {
        let a = Broker::new("node-1", 9092);
        let b = Broker::new("node-1", 9092);
        let c = Broker::new("node-1", 9093);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(format!("{a}"), "node-1:9092");
    }

    #[test]
    fn test_registry_key_roundtrip() {
        let tp = TopicPartition::new("events", PartitionId::new(3));
        assert_eq!(tp.registry_key(), "events/3");
        assert_eq!(TopicPartition::parse_registry_key("events/3"), Some(tp));
    }

    #[test]
    fn test_registry_key_with_separator_in_topic() {
        let tp = TopicPartition::new("tenant/events", PartitionId::new(0));
        assert_eq!(
            TopicPartition::parse_registry_key(&tp.registry_key()),
            Some(tp)
        );
    }

    #[test]
    fn test_registry_key_rejects_garbage() {
        assert_eq!(TopicPartition::parse_registry_key("no-separator"), None);
        assert_eq!(TopicPartition::parse_registry_key("/0"), None);
        assert_eq!(TopicPartition::parse_registry_key("events/x"), None);
    }
}
