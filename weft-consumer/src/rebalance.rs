//! Partition rebalancing against live group membership.
//!
//! For a topic with `P` partitions and `M` live members, every member is
//! entitled to an even share `P / M`, and the `P mod M` spare partitions
//! go to whoever claims them first. Each rebalance pass walks the
//! topic's partition list once, in deterministic order, trying to
//! acquire or release distributed locks until this member's holdings fit
//! its quota.
//!
//! A failed acquisition is not an error: the key is held elsewhere and
//! is simply retried next cycle. Locks are reentrant per member, so
//! ownership survives a wholesale reconnect - the in-memory flags reset,
//! and the next pass re-acquires the keys this member never let go of.
//!
//! On acquisition the partition's position is restored from durable
//! storage: a persisted offset `k` means "last consumed `k`", so the
//! in-memory position becomes `k + 1`.

use tracing::{debug, warn};
use weft_core::{MemberId, Offset};
use weft_registry::GroupRegistry;
use weft_state::OffsetState;

use crate::stats::ConsumerStats;

/// Lock quotas for one (topic, member) pair in one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockQuota {
    /// Acquisitions needed to reach the even share.
    pub acquire: u32,
    /// Spare partitions this member may additionally claim, first come
    /// first served across members.
    pub spare: u32,
    /// Releases needed to fall back within the allowed share.
    pub release: u32,
}

impl LockQuota {
    /// Total acquisitions this member may attempt.
    #[must_use]
    pub const fn acquire_budget(self) -> u32 {
        self.acquire + self.spare
    }
}

/// Computes the lock quota for one member of one topic.
///
/// `release` only triggers once holdings exceed the even share plus all
/// spares; a member keeps a spare it already claimed rather than
/// thrashing it back and forth between cycles.
///
/// # Panics
///
/// Panics if `member_count` is zero; a member computing its quota is
/// itself alive.
#[must_use]
pub fn lock_quota(partition_count: u32, member_count: u32, locked_count: u32) -> LockQuota {
    assert!(member_count > 0, "member_count must be positive");

    let even = partition_count / member_count;
    let spares = partition_count % member_count;

    let acquire = even.saturating_sub(locked_count);
    let budget = (even + spares).saturating_sub(locked_count);

    LockQuota {
        acquire,
        spare: budget - acquire,
        release: locked_count.saturating_sub(even + spares),
    }
}

/// Runs one rebalance pass for one topic.
///
/// Adjusts the `locked` flags in `state` to fit this member's quota,
/// acquiring and releasing registry locks as needed. Registry failures
/// are logged and leave the affected partition for the next cycle; a
/// membership lookup failure skips the whole pass.
#[allow(clippy::cast_possible_truncation)] // Partition and member counts bounded by limits.
pub async fn rebalance_topic(
    state: &mut OffsetState,
    topic: &str,
    member: &MemberId,
    registry: &dyn GroupRegistry,
    stats: &ConsumerStats,
) {
    let members = match registry.members().await {
        Ok(members) => members,
        Err(err) => {
            warn!(topic = %topic, error = %err, "membership lookup failed; skipping rebalance");
            return;
        }
    };

    let partitions = state.partitions_for_topic(topic);
    if partitions.is_empty() {
        return;
    }

    let member_count = members.len().max(1) as u32;
    let locked_count = partitions.iter().filter(|p| p.locked).count() as u32;
    let quota = lock_quota(partitions.len() as u32, member_count, locked_count);

    debug!(
        topic = %topic,
        member = %member,
        members = member_count,
        partitions = partitions.len(),
        locked = locked_count,
        acquire = quota.acquire,
        spare = quota.spare,
        release = quota.release,
        "rebalancing topic"
    );

    let mut to_acquire = quota.acquire_budget();
    let mut to_release = quota.release;

    // One walk over the flattened list; each partition dispatches to the
    // matching bucket by its current flag and the remaining quotas.
    for partition in &partitions {
        let key = partition.registry_key();

        if !partition.locked && to_acquire > 0 {
            match registry.lock(member, &key).await {
                Ok(true) => {
                    to_acquire -= 1;
                    state.set_locked(&partition.tp, true);
                    stats.lock_acquired();
                    restore_offset(state, registry, partition.tp.clone(), &key).await;
                    debug!(member = %member, key = %key, "acquired partition lock");
                }
                Ok(false) => {
                    // Held elsewhere; fall through and retry next cycle.
                    debug!(member = %member, key = %key, "lock held elsewhere");
                }
                Err(err) => {
                    warn!(member = %member, key = %key, error = %err, "lock attempt failed");
                }
            }
        } else if partition.locked && to_release > 0 {
            match registry.release(member, &key).await {
                Ok(()) => {
                    to_release -= 1;
                    state.set_locked(&partition.tp, false);
                    stats.lock_released();
                    debug!(member = %member, key = %key, "released partition lock");
                }
                Err(err) => {
                    // Keep fetching what we still hold; retry next cycle.
                    warn!(member = %member, key = %key, error = %err, "lock release failed");
                }
            }
        }
    }

    stats.record_rebalance();
}

/// Restores a newly acquired partition's position from durable storage.
///
/// A persisted offset is the last consumed record, so consumption
/// resumes one past it. No persisted entry keeps the probed position.
async fn restore_offset(
    state: &mut OffsetState,
    registry: &dyn GroupRegistry,
    tp: weft_core::TopicPartition,
    key: &str,
) {
    match registry.get(key).await {
        Ok(Some(value)) => match value.parse::<u64>() {
            Ok(persisted) => {
                let restored = Offset::new(persisted).next();
                state.set_offset(&tp, restored);
                debug!(tp = %tp, offset = %restored, "restored persisted offset");
            }
            Err(_) => {
                warn!(tp = %tp, value = %value, "unparseable persisted offset; keeping probed position");
            }
        },
        Ok(None) => {}
        Err(err) => {
            warn!(tp = %tp, error = %err, "persisted offset lookup failed; keeping probed position");
        }
    }
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use weft_core::{Broker, PartitionId, TopicPartition};
    use weft_registry::SimulatedRegistry;
    use weft_state::PartitionState;

    use super::*;

    fn broker() -> Broker {
        Broker::new("node-1", 9092)
    }

    fn tp(topic: &str, partition: u32) -> TopicPartition {
        TopicPartition::new(topic, PartitionId::new(partition))
    }

    fn state_with(partitions: &[(u32, u64)]) -> OffsetState {
        let mut state = OffsetState::new();
        for &(partition, offset) in partitions {
            state.insert(PartitionState::new(
                tp("x", partition),
                broker(),
                Offset::new(offset),
            ));
        }
        state
    }

    fn member(name: &str) -> MemberId {
        MemberId::new(name)
    }

    #[test]
    fn test_quota_even_split_without_spares() {
        // Two partitions, two members: one each, nothing spare.
        assert_eq!(
            lock_quota(2, 2, 0),
            LockQuota { acquire: 1, spare: 0, release: 0 }
        );
        assert_eq!(
            lock_quota(2, 2, 1),
            LockQuota { acquire: 0, spare: 0, release: 0 }
        );
    }

    #[test]
    fn test_quota_release_when_over_share() {
        // A member holding both of two partitions after a second member
        // joins must shed exactly one.
        assert_eq!(
            lock_quota(2, 2, 2),
            LockQuota { acquire: 0, spare: 0, release: 1 }
        );
    }

    #[test]
    fn test_quota_spares_are_claimable_but_not_shed() {
        // Three partitions, two members: even share 1, one spare.
        assert_eq!(
            lock_quota(3, 2, 0),
            LockQuota { acquire: 1, spare: 1, release: 0 }
        );
        assert_eq!(
            lock_quota(3, 2, 1),
            LockQuota { acquire: 0, spare: 1, release: 0 }
        );
        // Holding share + spare is stable: no release, no thrash.
        assert_eq!(
            lock_quota(3, 2, 2),
            LockQuota { acquire: 0, spare: 0, release: 0 }
        );
    }

    #[test]
    fn test_quota_single_member_owns_everything() {
        assert_eq!(
            lock_quota(4, 1, 0),
            LockQuota { acquire: 4, spare: 0, release: 0 }
        );
    }

    #[tokio::test]
    async fn test_single_member_locks_all_partitions() {
        let registry = SimulatedRegistry::new(42);
        let stats = ConsumerStats::new();
        let me = member("a");
        registry.join(&me).await.unwrap();

        let mut state = state_with(&[(0, 5), (1, 0)]);
        rebalance_topic(&mut state, "x", &me, &registry, &stats).await;

        assert!(state.iter().all(|p| p.locked));
        assert_eq!(registry.lock_holder("x/0"), Some(me.clone()));
        assert_eq!(registry.lock_holder("x/1"), Some(me));
        assert_eq!(stats.locks_held(), 2);
    }

    #[tokio::test]
    async fn test_acquire_restores_persisted_offset() {
        let registry = SimulatedRegistry::new(42);
        let stats = ConsumerStats::new();
        let me = member("a");
        registry.join(&me).await.unwrap();
        registry.seed_kv("x/0", "6");

        let mut state = state_with(&[(0, 5)]);
        rebalance_topic(&mut state, "x", &me, &registry, &stats).await;

        // Persisted 6 = last consumed 6, so resume at 7.
        assert_eq!(state.find(&tp("x", 0)).unwrap().offset, Offset::new(7));
    }

    #[tokio::test]
    async fn test_unparseable_persisted_offset_keeps_probed() {
        let registry = SimulatedRegistry::new(42);
        let stats = ConsumerStats::new();
        let me = member("a");
        registry.join(&me).await.unwrap();
        registry.seed_kv("x/0", "not-a-number");

        let mut state = state_with(&[(0, 5)]);
        rebalance_topic(&mut state, "x", &me, &registry, &stats).await;

        assert_eq!(state.find(&tp("x", 0)).unwrap().offset, Offset::new(5));
    }

    #[tokio::test]
    async fn test_held_lock_falls_through_silently() {
        let registry = SimulatedRegistry::new(42);
        let stats = ConsumerStats::new();
        let me = member("a");
        let other = member("b");
        registry.join(&me).await.unwrap();
        registry.join(&other).await.unwrap();
        // The other member already owns partition 0.
        registry.lock(&other, "x/0").await.unwrap();

        let mut state = state_with(&[(0, 0), (1, 0)]);
        rebalance_topic(&mut state, "x", &me, &registry, &stats).await;

        // Partition 0 stays unlocked for this member; partition 1 is won.
        assert!(!state.find(&tp("x", 0)).unwrap().locked);
        assert!(state.find(&tp("x", 1)).unwrap().locked);
    }

    #[tokio::test]
    async fn test_member_join_triggers_release() {
        let registry = SimulatedRegistry::new(42);
        let stats = ConsumerStats::new();
        let me = member("a");
        registry.join(&me).await.unwrap();

        // First pass: alone, lock both partitions.
        let mut state = state_with(&[(0, 0), (1, 0)]);
        rebalance_topic(&mut state, "x", &me, &registry, &stats).await;
        assert_eq!(state.iter().filter(|p| p.locked).count(), 2);

        // A second member joins; the next pass sheds exactly one lock.
        registry.join(&member("b")).await.unwrap();
        rebalance_topic(&mut state, "x", &me, &registry, &stats).await;

        let locked: Vec<_> = state.iter().filter(|p| p.locked).collect();
        assert_eq!(locked.len(), 1);
        // The released key is free for the newcomer.
        let released = if locked[0].tp == tp("x", 0) { "x/1" } else { "x/0" };
        assert_eq!(registry.lock_holder(released), None);
    }

    #[tokio::test]
    async fn test_reentrant_reacquire_after_flag_reset() {
        let registry = SimulatedRegistry::new(42);
        let stats = ConsumerStats::new();
        let me = member("a");
        registry.join(&me).await.unwrap();

        let mut state = state_with(&[(0, 0)]);
        rebalance_topic(&mut state, "x", &me, &registry, &stats).await;
        assert!(state.find(&tp("x", 0)).unwrap().locked);

        // A reconnect rebuilds state with flags reset; the registry
        // still holds our lock, and reentrancy wins it back.
        let mut rebuilt = state_with(&[(0, 0)]);
        rebalance_topic(&mut rebuilt, "x", &me, &registry, &stats).await;
        assert!(rebuilt.find(&tp("x", 0)).unwrap().locked);
    }

    #[tokio::test]
    async fn test_two_members_split_two_partitions() {
        let registry = SimulatedRegistry::new(42);
        let stats = ConsumerStats::new();
        let a = member("a");
        let b = member("b");
        registry.join(&a).await.unwrap();
        registry.join(&b).await.unwrap();

        let mut state_a = state_with(&[(0, 0), (1, 0)]);
        let mut state_b = state_with(&[(0, 0), (1, 0)]);

        rebalance_topic(&mut state_a, "x", &a, &registry, &stats).await;
        rebalance_topic(&mut state_b, "x", &b, &registry, &stats).await;

        let a_locked: Vec<_> = state_a.iter().filter(|p| p.locked).collect();
        let b_locked: Vec<_> = state_b.iter().filter(|p| p.locked).collect();
        assert_eq!(a_locked.len(), 1);
        assert_eq!(b_locked.len(), 1);
        assert_ne!(a_locked[0].tp, b_locked[0].tp);
    }
}
