//! Consumer configuration.

use std::time::Duration;

use weft_core::{Broker, Limits, MemberId};
use weft_registry::RegistryConfig;

use crate::error::{ConsumerError, ConsumerResult};

/// Configuration for a Weft consumer.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Topics this consumer subscribes to.
    pub topics: Vec<String>,
    /// Bootstrap brokers for metadata discovery.
    pub brokers: Vec<Broker>,
    /// Persister debounce interval.
    pub offset_commit_freq: Duration,
    /// Per-broker fetch cycle deadline.
    pub fetch_timeout: Duration,
    /// Sleep after a cycle that produced no messages.
    pub fetch_poll: Duration,
    /// Initial offset policy: earliest (true) or latest (false).
    pub use_earliest: bool,
    /// Group member identity; generated when absent.
    pub host_name: Option<String>,
    /// Registry connection settings.
    pub registry: RegistryConfig,
    /// System limits.
    pub limits: Limits,
}

impl ConsumerConfig {
    /// Creates a configuration for the given subscription.
    #[must_use]
    pub fn new(topics: Vec<String>, brokers: Vec<Broker>) -> Self {
        Self {
            topics,
            brokers,
            ..Self::default()
        }
    }

    /// Sets the persister debounce interval.
    #[must_use]
    pub const fn with_offset_commit_freq(mut self, freq: Duration) -> Self {
        self.offset_commit_freq = freq;
        self
    }

    /// Sets the per-broker fetch deadline.
    #[must_use]
    pub const fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Sets the idle-cycle sleep.
    #[must_use]
    pub const fn with_fetch_poll(mut self, poll: Duration) -> Self {
        self.fetch_poll = poll;
        self
    }

    /// Sets the initial offset policy.
    #[must_use]
    pub const fn with_use_earliest(mut self, use_earliest: bool) -> Self {
        self.use_earliest = use_earliest;
        self
    }

    /// Sets an explicit member identity.
    #[must_use]
    pub fn with_host_name(mut self, host_name: impl Into<String>) -> Self {
        self.host_name = Some(host_name.into());
        self
    }

    /// Sets the registry connection settings.
    #[must_use]
    pub fn with_registry(mut self, registry: RegistryConfig) -> Self {
        self.registry = registry;
        self
    }

    /// Creates a configuration with short timings for tests.
    #[must_use]
    pub fn for_testing(topics: Vec<String>, brokers: Vec<Broker>) -> Self {
        Self::new(topics, brokers)
            .with_offset_commit_freq(Duration::from_millis(20))
            .with_fetch_timeout(Duration::from_millis(200))
            .with_fetch_poll(Duration::from_millis(10))
    }

    /// Returns this member's identity: the configured host name, or a
    /// generated one.
    #[must_use]
    pub fn member_id(&self) -> MemberId {
        self.host_name.as_ref().map_or_else(
            || MemberId::new(format!("member-{:08x}", rand::random::<u32>())),
            MemberId::new,
        )
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` when the subscription or broker list is
    /// empty, a timing is zero, or the limits are inconsistent.
    pub fn validate(&self) -> ConsumerResult<()> {
        if self.topics.is_empty() {
            return Err(ConsumerError::InvalidConfig {
                message: "at least one topic is required".into(),
            });
        }
        if self.brokers.is_empty() {
            return Err(ConsumerError::InvalidConfig {
                message: "at least one bootstrap broker is required".into(),
            });
        }
        if self.offset_commit_freq.is_zero() {
            return Err(ConsumerError::InvalidConfig {
                message: "offset_commit_freq must be positive".into(),
            });
        }
        if self.fetch_timeout.is_zero() {
            return Err(ConsumerError::InvalidConfig {
                message: "fetch_timeout must be positive".into(),
            });
        }
        self.limits
            .validate()
            .map_err(|err| ConsumerError::InvalidConfig {
                message: err.to_string(),
            })?;
        Ok(())
    }
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            topics: Vec::new(),
            brokers: Vec::new(),
            offset_commit_freq: Duration::from_millis(5000),
            fetch_timeout: Duration::from_millis(60_000),
            fetch_poll: Duration::from_millis(10_000),
            use_earliest: true,
            host_name: None,
            registry: RegistryConfig::default(),
            limits: Limits::new(),
        }
    }
}
