//! The consume loop and the public consumer handle.
//!
//! One long-lived background task drives the whole engine:
//!
//! ```text
//! rebalance ─► parallel broker fetch ─► collect
//!     ▲                                   │
//!     │               errors? ── yes ─► checkpoint + wholesale reconnect
//!     │                 │
//!     │                 no
//!     │                 ▼
//!     └──── merge results (sleep first when the cycle was idle)
//! ```
//!
//! Producers are created lazily, one per broker, and discarded wholesale
//! on any cycle error: metadata is refetched, offsets are re-probed, and
//! partition ownership is rediscovered on the next rebalance (registry
//! locks are reentrant, so nothing is actually lost). The offset state is
//! single-writer - this task owns it, and each fetcher gets an immutable
//! snapshot of its broker's slice.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use weft_core::{Broker, MemberId, Message};
use weft_registry::{spawn_persister, GroupRegistry, OffsetUpdate};
use weft_state::OffsetState;

use crate::config::ConsumerConfig;
use crate::error::ConsumerResult;
use crate::fetcher::{fetch_broker, FetchFault, FetchOutcome};
use crate::metadata::{derive_offset_state, filter_subscribed, require_metadata, MetadataSource};
use crate::producer::{FetchProducer, ProducerFactory};
use crate::rebalance::rebalance_topic;
use crate::stats::ConsumerStats;

/// A running consumer.
///
/// The embedding application reads decoded messages from the bounded
/// output channel via [`read_msg`](Self::read_msg) and stops everything
/// with [`shutdown`](Self::shutdown).
pub struct Consumer {
    messages: mpsc::Receiver<Message>,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
    registry: Arc<dyn GroupRegistry>,
    stats: Arc<ConsumerStats>,
    member: MemberId,
}

impl Consumer {
    /// Starts a consumer: joins the group, probes metadata and initial
    /// offsets, and spawns the background consume loop.
    ///
    /// # Errors
    ///
    /// Returns an error when the configuration is invalid, the group
    /// cannot be joined, the cluster has no metadata for the subscribed
    /// topics, or the initial offset probe fails.
    pub async fn start(
        config: ConsumerConfig,
        registry: Arc<dyn GroupRegistry>,
        factory: Arc<dyn ProducerFactory>,
        metadata: Arc<dyn MetadataSource>,
    ) -> ConsumerResult<Self> {
        config.validate()?;

        let member = config.member_id();
        registry.join(&member).await?;

        let topology = metadata.get_metadata(&config.brokers).await?;
        let topology = require_metadata(filter_subscribed(topology, &config.topics))?;
        let offset_state = derive_offset_state(factory.as_ref(), &topology, &config).await?;

        let (output, messages) = mpsc::channel(config.limits.message_channel_depth as usize);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stats = Arc::new(ConsumerStats::new());

        let ctx = LoopContext {
            config,
            member: member.clone(),
            registry: Arc::clone(&registry),
            factory,
            metadata,
            output,
            stats: Arc::clone(&stats),
            shutdown: shutdown_rx,
        };
        let task = tokio::spawn(consume_loop(ctx, offset_state));

        info!(member = %member, "consumer started");
        Ok(Self {
            messages,
            shutdown_tx,
            task,
            registry,
            stats,
            member,
        })
    }

    /// Reads the next decoded message, waiting up to `timeout` when one
    /// is given.
    ///
    /// Returns `None` on timeout, or once the consumer has stopped and
    /// the channel drained.
    pub async fn read_msg(&mut self, timeout: Option<Duration>) -> Option<Message> {
        match timeout {
            Some(limit) => tokio::time::timeout(limit, self.messages.recv())
                .await
                .ok()
                .flatten(),
            None => self.messages.recv().await,
        }
    }

    /// Returns this consumer's runtime statistics.
    #[must_use]
    pub fn stats(&self) -> Arc<ConsumerStats> {
        Arc::clone(&self.stats)
    }

    /// Returns this member's group identity.
    #[must_use]
    pub const fn member(&self) -> &MemberId {
        &self.member
    }

    /// Stops the background task, closes all producers, and closes the
    /// group connection.
    ///
    /// The loop surrenders at its next suspension point; an in-flight
    /// fetch may be abandoned, but messages already on the output
    /// channel stay delivered.
    ///
    /// # Errors
    ///
    /// Returns the registry error when closing the group connection
    /// fails.
    pub async fn shutdown(self) -> ConsumerResult<()> {
        let _ = self.shutdown_tx.send(true);
        if let Err(err) = self.task.await {
            warn!(error = %err, "consume task panicked");
        }
        self.registry.close().await?;
        info!(member = %self.member, "consumer shut down");
        Ok(())
    }
}

impl std::fmt::Debug for Consumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consumer")
            .field("member", &self.member)
            .finish_non_exhaustive()
    }
}

/// Everything the background task owns.
struct LoopContext {
    config: ConsumerConfig,
    member: MemberId,
    registry: Arc<dyn GroupRegistry>,
    factory: Arc<dyn ProducerFactory>,
    metadata: Arc<dyn MetadataSource>,
    output: mpsc::Sender<Message>,
    stats: Arc<ConsumerStats>,
    shutdown: watch::Receiver<bool>,
}

/// The long-lived orchestrator task.
#[allow(clippy::too_many_lines)]
async fn consume_loop(mut ctx: LoopContext, mut offset_state: OffsetState) {
    let mut producers: BTreeMap<Broker, Box<dyn FetchProducer>> = BTreeMap::new();
    info!(member = %ctx.member, "consume loop started");

    loop {
        if *ctx.shutdown.borrow() {
            break;
        }

        // Rebalance every subscribed topic against live membership.
        for topic in &ctx.config.topics {
            rebalance_topic(
                &mut offset_state,
                topic,
                &ctx.member,
                ctx.registry.as_ref(),
                &ctx.stats,
            )
            .await;
        }

        let cycle_start = Instant::now();

        sync_producers(&mut producers, &offset_state, ctx.factory.as_ref()).await;

        // One concurrent fetch task per broker, joined at cycle end.
        let mut handles = Vec::new();
        let mut cycle_brokers = Vec::new();
        for (broker, mut producer) in std::mem::take(&mut producers) {
            cycle_brokers.push(broker.clone());
            let owned = offset_state.owned_for_broker(&broker);
            let output = ctx.output.clone();
            let persister = spawn_persister(
                Arc::clone(&ctx.registry),
                ctx.config.offset_commit_freq,
                ctx.config.limits.persister_queue_depth as usize,
            );
            let fetch_timeout = ctx.config.fetch_timeout;
            let max_records = ctx.config.limits.max_records_per_frame;

            let handle = tokio::spawn(async move {
                let outcome = fetch_broker(
                    &broker,
                    producer.as_mut(),
                    &owned,
                    &output,
                    persister,
                    fetch_timeout,
                    max_records,
                )
                .await;
                (broker, producer, outcome)
            });
            handles.push(handle);
        }

        // Join at cycle end. Every fetch races its own deadline, so this
        // wait is bounded by fetch_timeout; a shutdown arriving mid-join
        // is honored right after, before the next rebalance.
        let results = futures::future::join_all(handles).await;

        // Collect the cycle.
        let mut broker_messages: Vec<(Broker, Vec<Message>)> = Vec::new();
        let mut faulted: Vec<(Broker, Vec<FetchFault>)> = Vec::new();
        let mut emitted = 0u64;
        for (cycle_broker, result) in cycle_brokers.into_iter().zip(results) {
            match result {
                Ok((broker, producer, outcome)) => {
                    producers.insert(broker.clone(), producer);
                    collect_outcome(broker, outcome, &mut broker_messages, &mut faulted, &mut emitted);
                }
                Err(err) => {
                    // The producer died with its task; force a rebuild.
                    error!(broker = %cycle_broker, error = %err, "fetch task failed");
                    faulted.push((
                        cycle_broker,
                        vec![FetchFault::Transport("fetch task failed".to_string())],
                    ));
                }
            }
        }

        if faulted.is_empty() {
            ctx.stats.record_messages(emitted);

            if emitted == 0 {
                // Idle cycle: back off before polling again.
                tokio::select! {
                    () = tokio::time::sleep(ctx.config.fetch_poll) => {}
                    _ = ctx.shutdown.changed() => break,
                }
            }

            #[allow(clippy::cast_possible_truncation)]
            ctx.stats
                .record_cycle(cycle_start.elapsed().as_micros() as u64, emitted);
            offset_state.merge_fetch_results(&broker_messages);
        } else {
            let fault_count: u64 = faulted.iter().map(|(_, faults)| faults.len() as u64).sum();
            ctx.stats.record_faults(fault_count);
            for (broker, faults) in &faulted {
                for fault in faults {
                    warn!(broker = %broker, fault = %fault, "fetch cycle fault");
                }
            }

            // Wholesale reconnect: discard every producer, checkpoint the
            // last-known-good position of each errored partition, then
            // rebuild from fresh metadata.
            for (_, mut producer) in std::mem::take(&mut producers) {
                producer.shutdown().await;
            }
            checkpoint_faults(&ctx, &offset_state, &faulted).await;

            match rebuild_state(&ctx).await {
                Ok(rebuilt) => {
                    offset_state = rebuilt;
                    // Lock flags reset with the state; ownership is
                    // rediscovered on the next rebalance.
                    ctx.stats.reset_locks_held(0);
                    ctx.stats.record_reconnect();
                }
                Err(err) => {
                    error!(error = %err, "reconnect failed; stopping consumer");
                    break;
                }
            }

            #[allow(clippy::cast_possible_truncation)]
            ctx.stats
                .record_cycle(cycle_start.elapsed().as_micros() as u64, 0);
        }
    }

    for (_, mut producer) in producers {
        producer.shutdown().await;
    }
    info!(member = %ctx.member, "consume loop stopped");
}

/// Files one broker's outcome into the cycle collections.
fn collect_outcome(
    broker: Broker,
    outcome: FetchOutcome,
    broker_messages: &mut Vec<(Broker, Vec<Message>)>,
    faulted: &mut Vec<(Broker, Vec<FetchFault>)>,
    emitted: &mut u64,
) {
    *emitted += outcome.emitted;
    if !outcome.faults.is_empty() {
        faulted.push((broker.clone(), outcome.faults));
    }
    if !outcome.messages.is_empty() {
        broker_messages.push((broker, outcome.messages));
    }
}

/// Creates producers for new brokers and discards producers for brokers
/// that left the topology.
async fn sync_producers(
    producers: &mut BTreeMap<Broker, Box<dyn FetchProducer>>,
    offset_state: &OffsetState,
    factory: &dyn ProducerFactory,
) {
    let brokers = offset_state.brokers();

    let stale: Vec<Broker> = producers
        .keys()
        .filter(|broker| !brokers.contains(broker))
        .cloned()
        .collect();
    for broker in stale {
        if let Some(mut producer) = producers.remove(&broker) {
            debug!(broker = %broker, "discarding producer for departed broker");
            producer.shutdown().await;
        }
    }

    for broker in brokers {
        if !producers.contains_key(&broker) {
            debug!(broker = %broker, "creating producer");
            producers.insert(broker.clone(), factory.fetch_producer(&broker));
        }
    }
}

/// Durably checkpoints the last-known-good position of every partition
/// touched by a fault, through a short-lived persister.
async fn checkpoint_faults(
    ctx: &LoopContext,
    offset_state: &OffsetState,
    faulted: &[(Broker, Vec<FetchFault>)],
) {
    let persister = spawn_persister(
        Arc::clone(&ctx.registry),
        ctx.config.offset_commit_freq,
        ctx.config.limits.persister_queue_depth as usize,
    );

    for (broker, faults) in faulted {
        for fault in faults {
            match fault {
                FetchFault::Partition(err) => {
                    let tp = err.topic_partition();
                    if let Some(state) = offset_state.find(&tp) {
                        // Persist the last consumed record, if any.
                        if let Some(last) = state.offset.last_consumed() {
                            persister.send(OffsetUpdate::new(tp, last));
                        }
                    }
                }
                FetchFault::Timeout | FetchFault::Transport(_) => {
                    // Broker-level fault: checkpoint everything owned there.
                    for state in offset_state.owned_for_broker(broker) {
                        if let Some(last) = state.offset.last_consumed() {
                            persister.send(OffsetUpdate::new(state.tp.clone(), last));
                        }
                    }
                }
            }
        }
    }

    persister.close().await;
}

/// Refetches metadata and re-derives the offset state from fresh probes.
async fn rebuild_state(ctx: &LoopContext) -> ConsumerResult<OffsetState> {
    let topology = ctx.metadata.get_metadata(&ctx.config.brokers).await?;
    let topology = require_metadata(filter_subscribed(topology, &ctx.config.topics))?;
    derive_offset_state(ctx.factory.as_ref(), &topology, &ctx.config).await
}
