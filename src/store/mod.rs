//! Per-shard durable document storage.
//!
//! Each shard owns two on-disk structures that together guarantee crash
//! consistency:
//!
//! - **`wal`**: an append-only log of every INDEX and DELETE operation,
//!   numbered by a monotonic 64-bit position. The log is the authoritative
//!   sequential record.
//! - **`store`**: the searchable tantivy index, a materialised view of the
//!   log that may lag behind it after a crash. On open the log is replayed
//!   from the first to the last entry; re-applying an INDEX is idempotent
//!   and re-deleting a missing id is a no-op, so replay always converges.

pub mod store;
pub mod wal;

pub use store::{LogEntry, Operation, Store};
pub use wal::Wal;

#[cfg(test)]
mod tests;
