//! Weft Registry - group coordination and durable offset persistence.
//!
//! The registry is the shared service a consumer group coordinates
//! through: live membership, reentrant partition locks, and a key-value
//! face for persisted offsets. This crate defines the [`GroupRegistry`]
//! trait, an in-memory [`SimulatedRegistry`] for deterministic testing,
//! and the debounced [`spawn_persister`] actor that batches offset
//! writes through any registry.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod config;
mod error;
mod persister;
mod registry;
mod simulated;

pub use config::RegistryConfig;
pub use error::{RegistryError, RegistryResult};
pub use persister::{spawn_persister, OffsetUpdate, PersisterHandle};
pub use registry::GroupRegistry;
pub use simulated::{RegistryFaultConfig, SimulatedRegistry};
