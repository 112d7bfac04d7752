//! Weft Core - Strongly-typed identifiers, record types, and limits.
//!
//! This crate holds the vocabulary shared by every Weft crate: broker and
//! partition identity, offsets, the records a fetch frame carries, and
//! the explicit bounds on every queue and buffer.
//!
//! # Design Principles (TigerStyle)
//!
//! - **Strongly-typed IDs**: an `Offset` is not a `PartitionId`
//! - **Explicit limits**: every resource has a bounded maximum
//! - **No unsafe code**: safety > performance

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod limits;
mod record;
mod types;

pub use error::{Error, Result};
pub use limits::Limits;
pub use record::{read_fetch, write_fetch, FetchError, FetchRecord, FrameError, Message};
pub use types::{Broker, MemberId, Offset, PartitionId, TopicPartition};
