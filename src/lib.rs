//! Breeze — a distributed, sharded document search engine.
//!
//! Documents are JSON objects identified by a stable string id. Each document
//! lives in a named index, is hash-routed to one of a fixed number of shards,
//! and every shard is owned by exactly one cluster node. Queries fan out
//! across shards and nodes and merge partial results.
//!
//! ## Architecture Modules
//!
//! - **`cluster`**: the static peer table and the deterministic shard→owner
//!   routing used by every read and write path.
//! - **`mapping`**: best-effort field-type inference (sniffing) plus explicit
//!   Elasticsearch-style overrides, persisted per index.
//! - **`store`**: the per-shard durable document store — a write-ahead log in
//!   front of a tantivy index, kept consistent by replay on open.
//! - **`shard`**: the index/shard manager, the per-peer request forwarder and
//!   the internal cluster server that answers forwarded requests.
//! - **`api`**: the Elasticsearch-compatible HTTP adapter (axum).
//! - **`models`**: wire-level document, query and search-result types shared
//!   by the store, the cluster protocol and the adapter.

pub mod api;
pub mod cluster;
pub mod error;
pub mod mapping;
pub mod models;
pub mod shard;
pub mod store;
