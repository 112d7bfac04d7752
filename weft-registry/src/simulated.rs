//! In-memory simulated registry for deterministic testing.
//!
//! Provides the full `GroupRegistry` surface backed by shared in-memory
//! maps, plus deterministic fault injection for exercising error paths.
//! Clones share state via `Arc`, so one instance can stand in for the
//! registry seen by several simulated group members.

#![allow(clippy::significant_drop_tightening)]

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use weft_core::MemberId;

use crate::error::{RegistryError, RegistryResult};
use crate::registry::GroupRegistry;

// -----------------------------------------------------------------------------
// Fault Configuration
// -----------------------------------------------------------------------------

/// Fault configuration for the simulated registry.
#[derive(Debug, Clone, Default)]
pub struct RegistryFaultConfig {
    /// Probability of `get` failing (0.0 - 1.0).
    pub get_fail_rate: f64,
    /// Probability of `set` failing (0.0 - 1.0).
    pub set_fail_rate: f64,
    /// Probability of `lock` failing with an error (0.0 - 1.0).
    pub lock_fail_rate: f64,
    /// Force the next `set` to fail (one-shot).
    pub force_set_fail: bool,
    /// Force the next `lock` to return false (one-shot).
    pub force_lock_denied: bool,
}

impl RegistryFaultConfig {
    /// No faults (all operations succeed).
    #[must_use]
    pub const fn none() -> Self {
        Self {
            get_fail_rate: 0.0,
            set_fail_rate: 0.0,
            lock_fail_rate: 0.0,
            force_set_fail: false,
            force_lock_denied: false,
        }
    }

    /// Builder: set the `set` fail rate.
    #[must_use]
    pub const fn with_set_fail_rate(mut self, rate: f64) -> Self {
        self.set_fail_rate = rate;
        self
    }
}

// -----------------------------------------------------------------------------
// Simulated Registry
// -----------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Inner {
    members: BTreeSet<MemberId>,
    locks: HashMap<String, MemberId>,
    kv: HashMap<String, String>,
    set_history: Vec<Vec<(String, String)>>,
    closed: bool,
}

/// In-memory registry with deterministic fault injection.
///
/// Clones share state via `Arc` so multiple handles observe one group.
#[derive(Debug, Clone)]
pub struct SimulatedRegistry {
    inner: Arc<Mutex<Inner>>,
    fault_config: Arc<Mutex<RegistryFaultConfig>>,
    /// RNG seed for deterministic faults.
    seed: u64,
    /// Operation counter for deterministic RNG.
    counter: Arc<AtomicU64>,
}

impl SimulatedRegistry {
    /// Creates a new simulated registry with no faults.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            fault_config: Arc::new(Mutex::new(RegistryFaultConfig::none())),
            seed,
            counter: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Creates a simulated registry with fault injection.
    #[must_use]
    pub fn with_faults(seed: u64, config: RegistryFaultConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            fault_config: Arc::new(Mutex::new(config)),
            seed,
            counter: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Returns the fault config for modification.
    ///
    /// # Panics
    ///
    /// Panics if the mutex is poisoned.
    pub fn fault_config(&self) -> std::sync::MutexGuard<'_, RegistryFaultConfig> {
        self.fault_config.lock().expect("fault config lock poisoned")
    }

    /// Deterministic fault roll; `(seed + counter) * M` hashing.
    fn should_inject_fault(&self, rate: f64) -> bool {
        if rate <= 0.0 {
            return false;
        }
        if rate >= 1.0 {
            return true;
        }
        let counter = self.counter.fetch_add(1, Ordering::Relaxed);
        let hash = self
            .seed
            .wrapping_add(counter)
            .wrapping_mul(0x9e37_79b9_7f4a_7c15);
        #[allow(clippy::cast_precision_loss)]
        let normalized = (hash as f64) / (u64::MAX as f64);
        normalized < rate
    }

    fn ensure_open(inner: &Inner) -> RegistryResult<()> {
        if inner.closed {
            return Err(RegistryError::Closed);
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Test accessors (bypass faults)
    // -------------------------------------------------------------------------

    /// Returns the member currently holding a lock key.
    ///
    /// # Panics
    ///
    /// Panics if the mutex is poisoned.
    #[must_use]
    pub fn lock_holder(&self, key: &str) -> Option<MemberId> {
        let inner = self.inner.lock().expect("registry lock poisoned");
        inner.locks.get(key).cloned()
    }

    /// Returns a snapshot of the key-value store.
    ///
    /// # Panics
    ///
    /// Panics if the mutex is poisoned.
    #[must_use]
    pub fn kv_snapshot(&self) -> HashMap<String, String> {
        let inner = self.inner.lock().expect("registry lock poisoned");
        inner.kv.clone()
    }

    /// Returns every `set` batch ever written, in call order.
    ///
    /// # Panics
    ///
    /// Panics if the mutex is poisoned.
    #[must_use]
    pub fn set_history(&self) -> Vec<Vec<(String, String)>> {
        let inner = self.inner.lock().expect("registry lock poisoned");
        inner.set_history.clone()
    }

    /// Seeds a persisted value directly (test setup).
    ///
    /// # Panics
    ///
    /// Panics if the mutex is poisoned.
    pub fn seed_kv(&self, key: impl Into<String>, value: impl Into<String>) {
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        inner.kv.insert(key.into(), value.into());
    }

    /// Removes a member from the live set (simulates a member death).
    ///
    /// # Panics
    ///
    /// Panics if the mutex is poisoned.
    pub fn evict_member(&self, member: &MemberId) {
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        inner.members.remove(member);
        inner.locks.retain(|_, holder| holder != member);
    }
}

#[async_trait]
impl GroupRegistry for SimulatedRegistry {
    async fn join(&self, member: &MemberId) -> RegistryResult<()> {
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        Self::ensure_open(&inner)?;
        inner.members.insert(member.clone());
        Ok(())
    }

    async fn members(&self) -> RegistryResult<BTreeSet<MemberId>> {
        let inner = self.inner.lock().expect("registry lock poisoned");
        Self::ensure_open(&inner)?;
        Ok(inner.members.clone())
    }

    async fn lock(&self, member: &MemberId, key: &str) -> RegistryResult<bool> {
        {
            let mut config = self.fault_config.lock().expect("lock poisoned");
            if config.force_lock_denied {
                config.force_lock_denied = false;
                return Ok(false);
            }
        }
        let lock_fail_rate = self.fault_config.lock().expect("lock").lock_fail_rate;
        if self.should_inject_fault(lock_fail_rate) {
            return Err(RegistryError::Io {
                operation: "lock",
                message: "simulated failure (random)".into(),
            });
        }

        let mut inner = self.inner.lock().expect("registry lock poisoned");
        Self::ensure_open(&inner)?;
        match inner.locks.get(key) {
            // Reentrant: the holder re-acquiring succeeds immediately.
            Some(holder) => Ok(holder == member),
            None => {
                inner.locks.insert(key.to_string(), member.clone());
                Ok(true)
            }
        }
    }

    async fn release(&self, member: &MemberId, key: &str) -> RegistryResult<()> {
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        Self::ensure_open(&inner)?;
        if inner.locks.get(key) == Some(member) {
            inner.locks.remove(key);
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> RegistryResult<Option<String>> {
        let get_fail_rate = self.fault_config.lock().expect("lock").get_fail_rate;
        if self.should_inject_fault(get_fail_rate) {
            return Err(RegistryError::Io {
                operation: "get",
                message: "simulated failure (random)".into(),
            });
        }

        let inner = self.inner.lock().expect("registry lock poisoned");
        Self::ensure_open(&inner)?;
        Ok(inner.kv.get(key).cloned())
    }

    async fn set(&self, pairs: &[(String, String)]) -> RegistryResult<()> {
        {
            let mut config = self.fault_config.lock().expect("lock poisoned");
            if config.force_set_fail {
                config.force_set_fail = false;
                return Err(RegistryError::Io {
                    operation: "set",
                    message: "simulated failure (forced)".into(),
                });
            }
        }
        let set_fail_rate = self.fault_config.lock().expect("lock").set_fail_rate;
        if self.should_inject_fault(set_fail_rate) {
            return Err(RegistryError::Io {
                operation: "set",
                message: "simulated failure (random)".into(),
            });
        }

        let mut inner = self.inner.lock().expect("registry lock poisoned");
        Self::ensure_open(&inner)?;
        for (key, value) in pairs {
            inner.kv.insert(key.clone(), value.clone());
        }
        inner.set_history.push(pairs.to_vec());
        Ok(())
    }

    async fn close(&self) -> RegistryResult<()> {
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        inner.closed = true;
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------
