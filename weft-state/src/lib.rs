//! Weft State - the canonical offset state store.
//!
//! Holds per-partition consumption state for a single consumer process
//! and the pure transforms the consume loop applies each cycle. The
//! store is single-writer by design: the consume loop owns it, and
//! fetchers only ever see cloned snapshots, so the store itself needs no
//! locking.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod partition;
mod store;

pub use partition::PartitionState;
pub use store::OffsetState;
