//! Elasticsearch-compatible HTTP adapter.
//!
//! A thin translator: handlers map wire requests onto the core manager and
//! index operations and shape the responses the way Elasticsearch clients
//! expect. No routing or storage decisions happen here.

pub mod dsl;
pub mod handlers;

pub use handlers::router;
