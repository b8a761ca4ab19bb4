//! Index and shard management plane.
//!
//! The [`Manager`] owns every index opened on this node and applies index
//! templates at creation time. An [`Index`] routes single and batch document
//! operations to the owning shard — local shards directly, remote shards
//! through the [`Forwarder`]'s cached peer channels — and answers searches by
//! scatter-gather over nodes and shards. The [`ClusterServer`] is the
//! receiving end: it accepts peer connections and dispatches forwarded
//! requests back into the same manager.

pub mod forwarder;
pub mod index;
pub mod manager;
pub mod protocol;
pub mod server;

pub use forwarder::Forwarder;
pub use index::Index;
pub use manager::{IndexTemplate, Manager};
pub use server::ClusterServer;

#[cfg(test)]
mod tests;
