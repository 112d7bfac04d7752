//! Group registry abstraction.
//!
//! The registry is the shared coordination service behind a consumer
//! group: it tracks live members, arbitrates partition ownership through
//! reentrant locks, and persists committed offsets as key-value pairs.
//! Weft only ever talks to it through this trait; safety relies on the
//! registry's own atomicity for `lock` and `set`.

use std::collections::BTreeSet;

use async_trait::async_trait;
use weft_core::MemberId;

use crate::error::RegistryResult;

/// Handle to the group-membership and persistence service.
///
/// # Lock semantics
///
/// Locks are keyed by `"<topic>/<partition>"` and held per member.
/// They are **reentrant**: a member re-acquiring a key it already holds
/// succeeds immediately without blocking. Only the holder may release.
///
/// # Key-value semantics
///
/// `set` writes a batch atomically (all pairs or none); `get` reads one
/// key. Values are opaque strings; Weft stores decimal offsets.
#[async_trait]
pub trait GroupRegistry: Send + Sync {
    /// Registers a member as live in the group.
    ///
    /// Joining is idempotent; rejoining refreshes liveness.
    async fn join(&self, member: &MemberId) -> RegistryResult<()>;

    /// Returns the currently live members.
    async fn members(&self) -> RegistryResult<BTreeSet<MemberId>>;

    /// Tries to acquire the lock for `key` on behalf of `member`.
    ///
    /// Returns `true` on success, including the reentrant case. `false`
    /// means another member holds the key.
    async fn lock(&self, member: &MemberId, key: &str) -> RegistryResult<bool>;

    /// Releases the lock for `key` held by `member`.
    ///
    /// Releasing a key the member does not hold is a no-op.
    async fn release(&self, member: &MemberId, key: &str) -> RegistryResult<()>;

    /// Reads a persisted value.
    async fn get(&self, key: &str) -> RegistryResult<Option<String>>;

    /// Writes a batch of key-value pairs atomically.
    async fn set(&self, pairs: &[(String, String)]) -> RegistryResult<()>;

    /// Closes the connection. Further operations fail with `Closed`.
    async fn close(&self) -> RegistryResult<()>;
}
