//! Per-broker fetch cycle.
//!
//! One fetcher activation covers one (broker, cycle) pair: issue a fetch
//! request for every owned partition on the broker, race the producer's
//! frame and fault channels against the fetch deadline, decode the
//! response, emit new messages on the output channel, and hand offset
//! updates to the per-fetch persister. The persister is closed before
//! returning, flushing whatever the fetch produced.
//!
//! Duplicate suppression: the broker may replay records at or below the
//! requested position. A message is new iff its offset is beyond the
//! latest seen for its partition - taken from the response so far when
//! present, else from the owned position - or offset 0 on a virgin
//! partition (bootstrap).

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use weft_core::{read_fetch, Broker, FetchError, FetchRecord, Message, Offset, TopicPartition};
use weft_registry::{OffsetUpdate, PersisterHandle};
use weft_state::PartitionState;

use crate::producer::{FetchProducer, FetchRequest};

/// One fault observed during a broker fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchFault {
    /// No response arrived within the fetch deadline.
    Timeout,
    /// The producer reported a transport failure.
    Transport(String),
    /// The broker reported a per-partition error inside the response.
    Partition(FetchError),
}

impl fmt::Display for FetchFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "fetch timed out"),
            Self::Transport(message) => write!(f, "transport: {message}"),
            Self::Partition(err) => {
                write!(f, "partition {}/{}: code {}", err.topic, err.partition, err.error_code)
            }
        }
    }
}

/// Result of one broker fetch.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FetchOutcome {
    /// Latest message per partition that advanced this fetch, in
    /// deterministic (topic, partition) order.
    pub messages: Vec<Message>,
    /// Faults observed; any entry triggers the reconnect path.
    pub faults: Vec<FetchFault>,
    /// Messages emitted on the output channel by this fetch.
    pub emitted: u64,
}

impl FetchOutcome {
    fn fault(fault: FetchFault) -> Self {
        Self {
            messages: Vec::new(),
            faults: vec![fault],
            emitted: 0,
        }
    }
}

/// What the three-way race produced.
enum Raced {
    Frame(Bytes),
    Fault(String),
    Timeout,
}

/// Runs one fetch cycle against a broker.
///
/// `owned` is an immutable snapshot of the partitions this member owns
/// on the broker. New messages are emitted on `output` in frame order
/// (the blocking send is the consumer's only backpressure path) and
/// checkpointed through `persister`, which is closed before returning
/// regardless of outcome.
pub async fn fetch_broker(
    broker: &Broker,
    producer: &mut dyn FetchProducer,
    owned: &[PartitionState],
    output: &mpsc::Sender<Message>,
    persister: PersisterHandle,
    fetch_timeout: Duration,
    max_records_per_frame: u32,
) -> FetchOutcome {
    if owned.is_empty() {
        persister.close().await;
        return FetchOutcome::default();
    }

    let requests = build_requests(owned);
    debug!(broker = %broker, topics = requests.len(), "issuing fetch");

    if let Err(err) = producer.send_fetch(&requests).await {
        warn!(broker = %broker, error = %err, "fetch request failed");
        persister.close().await;
        return FetchOutcome::fault(FetchFault::Transport(err.to_string()));
    }

    // Race response, fault, and deadline.
    let raced = {
        let channels = producer.channels();
        tokio::select! {
            frame = channels.frames.recv() => frame.map_or_else(
                || Raced::Fault("frame channel closed".to_string()),
                Raced::Frame,
            ),
            fault = channels.faults.recv() => Raced::Fault(
                fault.unwrap_or_else(|| "fault channel closed".to_string()),
            ),
            () = tokio::time::sleep(fetch_timeout) => Raced::Timeout,
        }
    };

    let decoded = match raced {
        Raced::Frame(frame) => decode_frame(broker, &frame, owned, max_records_per_frame),
        Raced::Fault(message) => {
            warn!(broker = %broker, fault = %message, "fetch transport fault");
            persister.close().await;
            return FetchOutcome::fault(FetchFault::Transport(message));
        }
        Raced::Timeout => {
            warn!(broker = %broker, timeout_ms = fetch_timeout.as_millis() as u64, "fetch timed out");
            persister.close().await;
            return FetchOutcome::fault(FetchFault::Timeout);
        }
    };

    // Emit every new message in frame order, then checkpoint it. The
    // persisted value is the message offset (last consumed); restore
    // adds one to resume at the next record.
    let mut faults = decoded.faults;
    let mut emitted = 0u64;
    for message in &decoded.emitted {
        if output.send(message.clone()).await.is_err() {
            warn!(broker = %broker, "output channel closed; abandoning fetch");
            faults.push(FetchFault::Transport("output channel closed".to_string()));
            break;
        }
        emitted += 1;
        persister.send(OffsetUpdate::new(message.topic_partition(), message.offset));
    }

    persister.close().await;

    FetchOutcome {
        messages: decoded.latest.into_values().collect(),
        faults,
        emitted,
    }
}

/// Groups owned partitions into per-topic fetch requests.
fn build_requests(owned: &[PartitionState]) -> Vec<FetchRequest> {
    let mut by_topic: BTreeMap<String, Vec<(weft_core::PartitionId, Offset)>> = BTreeMap::new();
    for state in owned {
        by_topic
            .entry(state.tp.topic.clone())
            .or_default()
            .push((state.tp.partition, state.offset));
    }
    by_topic
        .into_iter()
        .map(|(topic, partitions)| FetchRequest { topic, partitions })
        .collect()
}

/// Accumulated result of decoding one frame.
#[derive(Default)]
struct Decoded {
    /// New messages in frame order, for emission.
    emitted: Vec<Message>,
    /// Latest message per partition (the response-so-far index).
    latest: BTreeMap<TopicPartition, Message>,
    /// Per-partition faults reported inside the frame.
    faults: Vec<FetchFault>,
    /// Total records decoded, for the frame bound.
    total: u32,
}

/// Decodes one fetch frame against the owned snapshot.
///
/// A frame that fails to decode, or that exceeds the record bound, is
/// abandoned whole: the fetch yields nothing and the next cycle refetches
/// from the unchanged positions.
fn decode_frame(
    broker: &Broker,
    frame: &Bytes,
    owned: &[PartitionState],
    max_records_per_frame: u32,
) -> Decoded {
    let owned_index: HashMap<TopicPartition, Offset> = owned
        .iter()
        .map(|state| (state.tp.clone(), state.offset))
        .collect();

    let folded = read_fetch(frame, Decoded::default(), |mut acc, record| {
        acc.total += 1;
        match record {
            FetchRecord::Message(message) => {
                fold_message(&owned_index, &mut acc, message);
                acc
            }
            FetchRecord::Error(err) => {
                if err.error_code != 0 {
                    acc.faults.push(FetchFault::Partition(err));
                }
                acc
            }
        }
    });

    match folded {
        Ok(decoded) if decoded.total > max_records_per_frame => {
            warn!(
                broker = %broker,
                records = decoded.total,
                max = max_records_per_frame,
                "fetch frame exceeds record bound; abandoning"
            );
            Decoded::default()
        }
        Ok(decoded) => decoded,
        Err(err) => {
            warn!(broker = %broker, error = %err, "abandoning undecodable fetch frame");
            Decoded::default()
        }
    }
}

/// Applies the is-new rule to one decoded message.
fn fold_message(
    owned_index: &HashMap<TopicPartition, Offset>,
    acc: &mut Decoded,
    message: Message,
) {
    let tp = message.topic_partition();

    // The latest seen position: response-so-far first, owned fallback.
    let latest_seen = if let Some(prev) = acc.latest.get(&tp) {
        Some(prev.offset)
    } else if let Some(next_to_fetch) = owned_index.get(&tp) {
        next_to_fetch.last_consumed()
    } else {
        // No known position for this partition at all: fatal to this
        // message only.
        warn!(tp = %tp, offset = %message.offset, "message for partition with no known offset");
        return;
    };

    let is_new =
        message.offset.get() == 0 || latest_seen.map_or(true, |seen| message.offset > seen);

    if is_new {
        acc.emitted.push(message.clone());
        acc.latest.insert(tp, message);
    }
    // Not new: a no-op on the accumulator.
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------
