//! Producer collaborator traits.
//!
//! A "producer" here is the wire-protocol endpoint for one broker: the
//! fetch producer issues fetch requests and surfaces response frames and
//! transport faults on a pair of channels; the offset producer answers
//! earliest/latest probes. Weft never speaks the wire protocol itself -
//! it drives these traits, and discards producers wholesale whenever a
//! cycle errors.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;
use weft_core::{Broker, Offset, PartitionId};

/// Result type for producer operations.
pub type ProducerResult<T> = Result<T, ProducerError>;

/// Errors from a producer endpoint.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProducerError {
    /// The producer has been shut down.
    #[error("producer closed")]
    Closed,

    /// A transport-level failure.
    #[error("producer I/O error: {message}")]
    Io {
        /// Error description.
        message: String,
    },
}

/// One topic's partition positions within a fetch request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// Topic to fetch from.
    pub topic: String,
    /// (partition, next offset to fetch) pairs.
    pub partitions: Vec<(PartitionId, Offset)>,
}

/// The response/fault channel pair of a fetch producer.
///
/// `frames` carries raw decoded-frame buffers; `faults` carries
/// transport-level failure descriptions. The fetcher races both against
/// its deadline.
#[derive(Debug)]
pub struct FetchChannels {
    /// Raw fetch-response frames.
    pub frames: mpsc::Receiver<Bytes>,
    /// Transport fault descriptions.
    pub faults: mpsc::Receiver<String>,
}

/// Fetch endpoint for one broker.
#[async_trait]
pub trait FetchProducer: Send {
    /// Issues a fetch request for the given topics and positions.
    async fn send_fetch(&mut self, requests: &[FetchRequest]) -> ProducerResult<()>;

    /// Returns the response/fault channels for this producer.
    fn channels(&mut self) -> &mut FetchChannels;

    /// Tears down the connection. Further calls fail with `Closed`.
    async fn shutdown(&mut self);
}

/// Offsets reported for one partition by an offset probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionOffsets {
    /// The partition probed.
    pub partition: PartitionId,
    /// Broker-reported error code; 0 is healthy.
    pub error_code: i16,
    /// Available log endpoints, newest first.
    pub offsets: Vec<Offset>,
}

impl PartitionOffsets {
    /// Selects the bootstrap offset per policy.
    ///
    /// Offsets arrive newest first, so `use_earliest` takes the last
    /// entry and latest takes the first.
    #[must_use]
    pub fn select(&self, use_earliest: bool) -> Option<Offset> {
        if use_earliest {
            self.offsets.last().copied()
        } else {
            self.offsets.first().copied()
        }
    }
}

/// Offsets reported for one topic by an offset probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicOffsets {
    /// The topic probed.
    pub topic: String,
    /// Per-partition results.
    pub partitions: Vec<PartitionOffsets>,
}

/// Offset-probe endpoint for one broker.
#[async_trait]
pub trait OffsetProducer: Send {
    /// Asks the broker for the available offset range of each partition.
    async fn send_offset_request(
        &mut self,
        topics: &[(String, Vec<PartitionId>)],
    ) -> ProducerResult<Vec<TopicOffsets>>;

    /// Tears down the connection.
    async fn shutdown(&mut self);
}

/// Creates producers for brokers.
///
/// The consume loop builds producers lazily through this and rebuilds
/// them all after any cycle error; implementations must hand out a fresh
/// connection per call.
pub trait ProducerFactory: Send + Sync {
    /// Creates a fetch producer connected to `broker`.
    fn fetch_producer(&self, broker: &Broker) -> Box<dyn FetchProducer>;

    /// Creates an offset producer connected to `broker`.
    fn offset_producer(&self, broker: &Broker) -> Box<dyn OffsetProducer>;
}
