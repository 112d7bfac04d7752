//! Weft Consumer - partition rebalancing and fetch orchestration.
//!
//! The coordination engine of a distributed log consumer: given a
//! cluster of brokers partitioned across topics, it continuously fetches
//! committed records for the partitions this process owns, persists
//! consumed offsets durably, and coordinates with peer consumers so that
//! every partition is owned by exactly one live member at a time.
//!
//! # Architecture
//!
//! - [`Consumer`] - the public handle: a bounded message channel plus
//!   shutdown.
//! - The consume loop - one background task per consumer: rebalance,
//!   parallel per-broker fetch, offset merge, error-driven reconnect.
//! - [`rebalance_topic`] - even-share lock arithmetic over live group
//!   membership, through the registry's reentrant locks.
//! - [`fetch_broker`] - one fetch cycle against one broker: a three-way
//!   race of response, fault, and deadline.
//! - Collaborator traits ([`FetchProducer`], [`OffsetProducer`],
//!   [`ProducerFactory`], [`MetadataSource`]) with scriptable simulated
//!   implementations for deterministic tests.
//!
//! Wire codecs, the lock service, and metadata lookup live behind those
//! traits; this crate owns only the coordination.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod config;
mod consume;
mod error;
mod fetcher;
mod metadata;
mod producer;
mod rebalance;
mod simulated;
mod stats;

pub use config::ConsumerConfig;
pub use consume::Consumer;
pub use error::{ConsumerError, ConsumerResult};
pub use fetcher::{fetch_broker, FetchFault, FetchOutcome};
pub use metadata::{
    derive_offset_state, filter_subscribed, require_metadata, MetadataSource, SimulatedMetadata,
    TopicMetadata,
};
pub use producer::{
    FetchChannels, FetchProducer, FetchRequest, OffsetProducer, PartitionOffsets, ProducerError,
    ProducerFactory, ProducerResult, TopicOffsets,
};
pub use rebalance::{lock_quota, rebalance_topic, LockQuota};
pub use simulated::{FetchBehavior, SimulatedProducerFactory};
pub use stats::ConsumerStats;
