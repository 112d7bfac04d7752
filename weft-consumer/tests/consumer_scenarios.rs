//! End-to-end consumer scenarios against simulated collaborators.
//!
//! Each test wires a full consumer (or two) to the simulated registry,
//! producers, and metadata source, then drives the documented scenarios:
//! single-member bootstrap, two-member partition split, timeout
//! reconnect, per-partition error recovery, and mid-stream member joins.

use std::sync::Arc;
use std::time::Duration;

use weft_consumer::{
    Consumer, ConsumerConfig, ConsumerError, FetchBehavior, SimulatedMetadata,
    SimulatedProducerFactory, TopicMetadata,
};
use weft_core::{Broker, FetchError, FetchRecord, MemberId, Message, Offset, PartitionId,
    TopicPartition};
use weft_registry::{GroupRegistry, SimulatedRegistry};

fn broker() -> Broker {
    Broker::new("node-1", 9092)
}

fn tp(topic: &str, partition: u32) -> TopicPartition {
    TopicPartition::new(topic, PartitionId::new(partition))
}

fn message(topic: &str, partition: u32, offset: u64) -> FetchRecord {
    FetchRecord::Message(Message::new(
        topic,
        PartitionId::new(partition),
        Offset::new(offset),
        "payload",
    ))
}

/// One topic on one broker with `partitions` partitions.
fn single_broker_topology(topic: &str, partitions: usize) -> TopicMetadata {
    let mut topology = TopicMetadata::new();
    topology.insert(topic.to_string(), vec![broker(); partitions]);
    topology
}

struct Cluster {
    registry: SimulatedRegistry,
    factory: SimulatedProducerFactory,
    metadata: SimulatedMetadata,
}

impl Cluster {
    fn new(topology: TopicMetadata) -> Self {
        Self {
            registry: SimulatedRegistry::new(42),
            factory: SimulatedProducerFactory::new(),
            metadata: SimulatedMetadata::with_topology(topology),
        }
    }

    async fn start(&self, name: &str, topics: &[&str]) -> Consumer {
        let config = ConsumerConfig::for_testing(
            topics.iter().map(ToString::to_string).collect(),
            vec![broker()],
        )
        .with_host_name(name);

        Consumer::start(
            config,
            Arc::new(self.registry.clone()),
            Arc::new(self.factory.clone()),
            Arc::new(self.metadata.clone()),
        )
        .await
        .expect("consumer start")
    }
}

/// Polls `condition` until it holds or two seconds elapse.
async fn wait_until<F: FnMut() -> bool>(what: &str, mut condition: F) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test]
async fn test_single_member_consumes_and_checkpoints() {
    let cluster = Cluster::new(single_broker_topology("x", 1));
    // Probe answers newest first; earliest policy picks 5.
    cluster
        .factory
        .set_offsets(tp("x", 0), vec![Offset::new(20), Offset::new(5)]);
    cluster.factory.script_fetch(
        &broker(),
        FetchBehavior::Respond(vec![
            message("x", 0, 5),
            message("x", 0, 6),
            message("x", 0, 7),
        ]),
    );

    let mut consumer = cluster.start("member-a", &["x"]).await;

    // All three records reach the output channel in order.
    for expected in [5u64, 6, 7] {
        let msg = consumer
            .read_msg(Some(Duration::from_secs(2)))
            .await
            .expect("message");
        assert_eq!(msg.offset, Offset::new(expected));
        assert_eq!(msg.partition, PartitionId::new(0));
    }

    // The member owns the partition and the checkpoint lands durably.
    assert_eq!(
        cluster.registry.lock_holder("x/0"),
        Some(MemberId::new("member-a"))
    );
    let registry = cluster.registry.clone();
    wait_until("checkpoint x/0 = 7", || {
        registry.kv_snapshot().get("x/0") == Some(&"7".to_string())
    })
    .await;

    // Consumption resumes one past the last consumed record.
    let factory = cluster.factory.clone();
    wait_until("fetch resumes at offset 8", || {
        factory.fetch_requests().iter().any(|(_, requests)| {
            requests
                .iter()
                .any(|r| r.partitions.contains(&(PartitionId::new(0), Offset::new(8))))
        })
    })
    .await;

    consumer.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn test_two_members_split_two_partitions() {
    let cluster = Cluster::new(single_broker_topology("x", 2));
    cluster.factory.set_offsets(tp("x", 0), vec![Offset::new(0)]);
    cluster.factory.set_offsets(tp("x", 1), vec![Offset::new(0)]);

    let consumer_a = cluster.start("member-a", &["x"]).await;
    let consumer_b = cluster.start("member-b", &["x"]).await;

    // Ownership settles to exactly one partition per member.
    let registry = cluster.registry.clone();
    wait_until("partitions split across members", || {
        let holder_0 = registry.lock_holder("x/0");
        let holder_1 = registry.lock_holder("x/1");
        matches!((holder_0, holder_1), (Some(a), Some(b)) if a != b)
    })
    .await;

    consumer_a.shutdown().await.expect("shutdown a");
    consumer_b.shutdown().await.expect("shutdown b");
}

#[tokio::test]
async fn test_fetch_timeout_triggers_wholesale_reconnect() {
    let cluster = Cluster::new(single_broker_topology("x", 1));
    cluster.factory.set_offsets(tp("x", 0), vec![Offset::new(5)]);
    // First fetch never answers; the fetcher runs into its deadline.
    cluster
        .factory
        .script_fetch(&broker(), FetchBehavior::Silent);

    let consumer = cluster.start("member-a", &["x"]).await;
    let stats = consumer.stats();

    wait_until("reconnect recorded", || stats.reconnects() >= 1).await;

    // The old producer was discarded, metadata refetched, and a fresh
    // producer created.
    let factory = cluster.factory.clone();
    let metadata = cluster.metadata.clone();
    wait_until("producer rebuilt", || {
        factory.fetch_producers_shutdown() >= 1 && factory.fetch_producers_created() >= 2
    })
    .await;
    assert!(metadata.calls() >= 2);

    // No offsets advanced: the cycle after reconnect still asks for 5.
    wait_until("refetch at unchanged offset", || {
        factory
            .fetch_requests()
            .iter()
            .skip(1)
            .any(|(_, requests)| {
                requests
                    .iter()
                    .any(|r| r.partitions.contains(&(PartitionId::new(0), Offset::new(5))))
            })
    })
    .await;

    consumer.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn test_partition_error_checkpoints_without_advancing() {
    let cluster = Cluster::new(single_broker_topology("x", 2));
    cluster.factory.set_offsets(tp("x", 0), vec![Offset::new(4)]);
    cluster.factory.set_offsets(tp("x", 1), vec![Offset::new(9)]);
    // Partition 0 errors with code 3; partition 1 delivers offset 9.
    cluster.factory.script_fetch(
        &broker(),
        FetchBehavior::Respond(vec![
            FetchRecord::Error(FetchError::new("x", PartitionId::new(0), 3)),
            message("x", 1, 9),
        ]),
    );

    let mut consumer = cluster.start("member-a", &["x"]).await;

    // The healthy partition's record is still delivered.
    let msg = consumer
        .read_msg(Some(Duration::from_secs(2)))
        .await
        .expect("message");
    assert_eq!(msg.partition, PartitionId::new(1));
    assert_eq!(msg.offset, Offset::new(9));

    // Both partitions are durably checkpointed: the errored one at its
    // unchanged position, the healthy one at its consumed record.
    let registry = cluster.registry.clone();
    wait_until("checkpoints written", || {
        let kv = registry.kv_snapshot();
        kv.get("x/0") == Some(&"3".to_string()) && kv.get("x/1") == Some(&"9".to_string())
    })
    .await;

    // After the reconnect, fetching resumes at 4 (unchanged) and 10
    // (one past the consumed record).
    let factory = cluster.factory.clone();
    wait_until("post-reconnect positions", || {
        factory.fetch_requests().iter().any(|(_, requests)| {
            requests.iter().any(|r| {
                r.partitions.contains(&(PartitionId::new(0), Offset::new(4)))
                    && r.partitions.contains(&(PartitionId::new(1), Offset::new(10)))
            })
        })
    })
    .await;

    consumer.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn test_member_join_sheds_a_partition() {
    let cluster = Cluster::new(single_broker_topology("x", 2));
    cluster.factory.set_offsets(tp("x", 0), vec![Offset::new(0)]);
    cluster.factory.set_offsets(tp("x", 1), vec![Offset::new(0)]);

    let consumer = cluster.start("member-a", &["x"]).await;

    // Alone, the member owns both partitions.
    let registry = cluster.registry.clone();
    wait_until("both partitions owned", || {
        registry.lock_holder("x/0") == Some(MemberId::new("member-a"))
            && registry.lock_holder("x/1") == Some(MemberId::new("member-a"))
    })
    .await;

    // A second member joins the group (without consuming).
    cluster
        .registry
        .join(&MemberId::new("member-b"))
        .await
        .expect("join");

    // The next rebalance releases exactly one lock, and the released
    // partition stops being fetched.
    let registry = cluster.registry.clone();
    wait_until("one partition released", || {
        let held = ["x/0", "x/1"]
            .iter()
            .filter(|key| registry.lock_holder(key) == Some(MemberId::new("member-a")))
            .count();
        held == 1
    })
    .await;

    let factory = cluster.factory.clone();
    wait_until("fetches shrink to one partition", || {
        factory
            .fetch_requests()
            .last()
            .is_some_and(|(_, requests)| {
                requests.iter().map(|r| r.partitions.len()).sum::<usize>() == 1
            })
    })
    .await;

    consumer.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn test_empty_metadata_fails_startup() {
    let cluster = Cluster::new(TopicMetadata::new());

    let config = ConsumerConfig::for_testing(vec!["x".to_string()], vec![broker()])
        .with_host_name("member-a");
    let result = Consumer::start(
        config,
        Arc::new(cluster.registry.clone()),
        Arc::new(cluster.factory.clone()),
        Arc::new(cluster.metadata.clone()),
    )
    .await;

    assert!(matches!(result, Err(ConsumerError::NoMetadata)));
}

#[tokio::test]
async fn test_shutdown_closes_producers_and_registry() {
    let cluster = Cluster::new(single_broker_topology("x", 1));
    cluster.factory.set_offsets(tp("x", 0), vec![Offset::new(0)]);

    let consumer = cluster.start("member-a", &["x"]).await;
    let factory = cluster.factory.clone();
    wait_until("a fetch happened", || !factory.fetch_requests().is_empty()).await;

    consumer.shutdown().await.expect("shutdown");

    // Every fetch producer handed out has been shut down, and the group
    // connection is closed.
    assert_eq!(
        cluster.factory.fetch_producers_created(),
        cluster.factory.fetch_producers_shutdown()
    );
    assert!(cluster
        .registry
        .members()
        .await
        .is_err());
}

#[tokio::test]
async fn test_latest_policy_starts_at_log_end() {
    let cluster = Cluster::new(single_broker_topology("x", 1));
    cluster
        .factory
        .set_offsets(tp("x", 0), vec![Offset::new(20), Offset::new(5)]);

    let config = ConsumerConfig::for_testing(vec!["x".to_string()], vec![broker()])
        .with_host_name("member-a")
        .with_use_earliest(false);
    let consumer = Consumer::start(
        config,
        Arc::new(cluster.registry.clone()),
        Arc::new(cluster.factory.clone()),
        Arc::new(cluster.metadata.clone()),
    )
    .await
    .expect("consumer start");

    // Latest policy takes the first (newest) probed offset.
    let factory = cluster.factory.clone();
    wait_until("fetch starts at 20", || {
        factory.fetch_requests().iter().any(|(_, requests)| {
            requests
                .iter()
                .any(|r| r.partitions.contains(&(PartitionId::new(0), Offset::new(20))))
        })
    })
    .await;

    consumer.shutdown().await.expect("shutdown");
}
