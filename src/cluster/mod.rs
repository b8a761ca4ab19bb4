//! Cluster topology and shard routing.
//!
//! The peer list is static for the lifetime of the process: it is parsed from
//! configuration at startup, always contains the local node, and is never
//! mutated afterwards. Because every node builds the identical ordered list,
//! each one computes the same shard→owner assignment independently with no
//! coordination traffic.

pub mod router;
pub mod types;

pub use router::Cluster;
pub use types::Node;
