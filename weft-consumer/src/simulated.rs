//! Scriptable in-memory producers for deterministic testing.
//!
//! The simulated factory hands out fetch/offset producers whose behavior
//! is scripted per broker: each `send_fetch` consumes the next scripted
//! behavior (respond, fault, or stay silent) and an unscripted call
//! answers with an empty frame, which reads as an idle cycle. All
//! handles share state via `Arc`, so tests can script, then assert on
//! recorded requests and lifecycle counters.

#![allow(clippy::significant_drop_tightening)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use weft_core::{write_fetch, Broker, FetchRecord, Offset, PartitionId, TopicPartition};

use crate::producer::{
    FetchChannels, FetchProducer, FetchRequest, OffsetProducer, PartitionOffsets, ProducerError,
    ProducerFactory, ProducerResult, TopicOffsets,
};

/// Per-call scripted behavior of a simulated fetch producer.
#[derive(Debug, Clone)]
pub enum FetchBehavior {
    /// Answer with these records as one frame.
    Respond(Vec<FetchRecord>),
    /// Answer with a raw frame (for corrupt-frame tests).
    RespondRaw(Bytes),
    /// Report a transport fault on the fault channel.
    Fault(String),
    /// Never answer; the fetcher runs into its deadline.
    Silent,
}

#[derive(Debug, Default)]
struct Inner {
    fetch_scripts: HashMap<Broker, VecDeque<FetchBehavior>>,
    /// Probe answers: available offsets per partition, newest first.
    offsets: HashMap<TopicPartition, Vec<Offset>>,
    /// Probe error codes per partition; absent means healthy.
    offset_error_codes: HashMap<TopicPartition, i16>,
    /// Every fetch request ever issued, in call order.
    fetch_requests: Vec<(Broker, Vec<FetchRequest>)>,
    /// Every offset probe ever issued, in call order.
    offset_requests: Vec<(Broker, Vec<(String, Vec<PartitionId>)>)>,
    fetch_producers_created: u64,
    fetch_producers_shutdown: u64,
    offset_producers_created: u64,
}

/// Factory for scriptable simulated producers.
///
/// Clones share state.
#[derive(Debug, Clone, Default)]
pub struct SimulatedProducerFactory {
    inner: Arc<Mutex<Inner>>,
}

impl SimulatedProducerFactory {
    /// Creates a factory with no scripted behavior.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a scripted behavior for the next fetch on `broker`.
    ///
    /// # Panics
    ///
    /// Panics if the mutex is poisoned.
    pub fn script_fetch(&self, broker: &Broker, behavior: FetchBehavior) {
        let mut inner = self.inner.lock().expect("producer state lock poisoned");
        inner
            .fetch_scripts
            .entry(broker.clone())
            .or_default()
            .push_back(behavior);
    }

    /// Sets the probe answer for a partition, newest offset first.
    ///
    /// # Panics
    ///
    /// Panics if the mutex is poisoned.
    pub fn set_offsets(&self, tp: TopicPartition, offsets: Vec<Offset>) {
        let mut inner = self.inner.lock().expect("producer state lock poisoned");
        inner.offsets.insert(tp, offsets);
    }

    /// Sets a probe error code for a partition.
    ///
    /// # Panics
    ///
    /// Panics if the mutex is poisoned.
    pub fn set_offset_error(&self, tp: TopicPartition, error_code: i16) {
        let mut inner = self.inner.lock().expect("producer state lock poisoned");
        inner.offset_error_codes.insert(tp, error_code);
    }

    /// Returns every fetch request issued so far, in call order.
    ///
    /// # Panics
    ///
    /// Panics if the mutex is poisoned.
    #[must_use]
    pub fn fetch_requests(&self) -> Vec<(Broker, Vec<FetchRequest>)> {
        let inner = self.inner.lock().expect("producer state lock poisoned");
        inner.fetch_requests.clone()
    }

    /// Returns every offset probe issued so far, in call order.
    ///
    /// # Panics
    ///
    /// Panics if the mutex is poisoned.
    #[must_use]
    pub fn offset_requests(&self) -> Vec<(Broker, Vec<(String, Vec<PartitionId>)>)> {
        let inner = self.inner.lock().expect("producer state lock poisoned");
        inner.offset_requests.clone()
    }

    /// Number of fetch producers handed out.
    ///
    /// # Panics
    ///
    /// Panics if the mutex is poisoned.
    #[must_use]
    pub fn fetch_producers_created(&self) -> u64 {
        let inner = self.inner.lock().expect("producer state lock poisoned");
        inner.fetch_producers_created
    }

    /// Number of fetch producers shut down.
    ///
    /// # Panics
    ///
    /// Panics if the mutex is poisoned.
    #[must_use]
    pub fn fetch_producers_shutdown(&self) -> u64 {
        let inner = self.inner.lock().expect("producer state lock poisoned");
        inner.fetch_producers_shutdown
    }

    /// Number of offset producers handed out.
    ///
    /// # Panics
    ///
    /// Panics if the mutex is poisoned.
    #[must_use]
    pub fn offset_producers_created(&self) -> u64 {
        let inner = self.inner.lock().expect("producer state lock poisoned");
        inner.offset_producers_created
    }
}

impl ProducerFactory for SimulatedProducerFactory {
    fn fetch_producer(&self, broker: &Broker) -> Box<dyn FetchProducer> {
        let (frames_tx, frames) = mpsc::channel(16);
        let (faults_tx, faults) = mpsc::channel(16);

        let mut inner = self.inner.lock().expect("producer state lock poisoned");
        inner.fetch_producers_created += 1;

        Box::new(SimulatedFetchProducer {
            broker: broker.clone(),
            inner: Arc::clone(&self.inner),
            frames_tx,
            faults_tx,
            channels: FetchChannels { frames, faults },
            closed: false,
        })
    }

    fn offset_producer(&self, broker: &Broker) -> Box<dyn OffsetProducer> {
        let mut inner = self.inner.lock().expect("producer state lock poisoned");
        inner.offset_producers_created += 1;

        Box::new(SimulatedOffsetProducer {
            broker: broker.clone(),
            inner: Arc::clone(&self.inner),
            closed: false,
        })
    }
}

// -----------------------------------------------------------------------------
// Simulated Fetch Producer
// -----------------------------------------------------------------------------

struct SimulatedFetchProducer {
    broker: Broker,
    inner: Arc<Mutex<Inner>>,
    frames_tx: mpsc::Sender<Bytes>,
    faults_tx: mpsc::Sender<String>,
    channels: FetchChannels,
    closed: bool,
}

#[async_trait]
impl FetchProducer for SimulatedFetchProducer {
    async fn send_fetch(&mut self, requests: &[FetchRequest]) -> ProducerResult<()> {
        if self.closed {
            return Err(ProducerError::Closed);
        }

        let behavior = {
            let mut inner = self.inner.lock().expect("producer state lock poisoned");
            inner
                .fetch_requests
                .push((self.broker.clone(), requests.to_vec()));
            inner
                .fetch_scripts
                .get_mut(&self.broker)
                .and_then(VecDeque::pop_front)
        };

        match behavior {
            // Unscripted fetches answer with an empty frame: an idle cycle.
            None => {
                let _ = self.frames_tx.try_send(write_fetch(&[]));
            }
            Some(FetchBehavior::Respond(records)) => {
                let _ = self.frames_tx.try_send(write_fetch(&records));
            }
            Some(FetchBehavior::RespondRaw(frame)) => {
                let _ = self.frames_tx.try_send(frame);
            }
            Some(FetchBehavior::Fault(message)) => {
                let _ = self.faults_tx.try_send(message);
            }
            Some(FetchBehavior::Silent) => {}
        }

        Ok(())
    }

    fn channels(&mut self) -> &mut FetchChannels {
        &mut self.channels
    }

    async fn shutdown(&mut self) {
        if !self.closed {
            self.closed = true;
            let mut inner = self.inner.lock().expect("producer state lock poisoned");
            inner.fetch_producers_shutdown += 1;
        }
    }
}

// -----------------------------------------------------------------------------
// Simulated Offset Producer
// -----------------------------------------------------------------------------

struct SimulatedOffsetProducer {
    broker: Broker,
    inner: Arc<Mutex<Inner>>,
    closed: bool,
}

#[async_trait]
impl OffsetProducer for SimulatedOffsetProducer {
    async fn send_offset_request(
        &mut self,
        topics: &[(String, Vec<PartitionId>)],
    ) -> ProducerResult<Vec<TopicOffsets>> {
        if self.closed {
            return Err(ProducerError::Closed);
        }

        let mut inner = self.inner.lock().expect("producer state lock poisoned");
        inner
            .offset_requests
            .push((self.broker.clone(), topics.to_vec()));

        let mut response = Vec::with_capacity(topics.len());
        for (topic, partitions) in topics {
            let mut probed = Vec::with_capacity(partitions.len());
            for partition in partitions {
                let tp = TopicPartition::new(topic.clone(), *partition);
                probed.push(PartitionOffsets {
                    partition: *partition,
                    error_code: inner.offset_error_codes.get(&tp).copied().unwrap_or(0),
                    offsets: inner.offsets.get(&tp).cloned().unwrap_or_default(),
                });
            }
            response.push(TopicOffsets {
                topic: topic.clone(),
                partitions: probed,
            });
        }

        Ok(response)
    }

    async fn shutdown(&mut self) {
        self.closed = true;
    }
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------
