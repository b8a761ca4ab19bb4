//! Crate-wide error type.
//!
//! Every operation boundary returns [`Result`]. Aggregate operations (batch
//! writes, fan-out searches) collect the first error observed but always wait
//! for all sub-operations before returning it.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Index or document absent. Adapters surface this as 404 / null.
    #[error("not found: {0}")]
    NotFound(String),

    /// Create on a resource that already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Malformed document, unknown op-type, malformed wire or WAL entry.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Forwarder dial / encode / decode / timeout. The cached peer channel
    /// is evicted before this surfaces; there is no automatic retry.
    #[error("transport error: {0}")]
    Transport(String),

    /// WAL or searchable-index failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// Error text returned by a peer, propagated verbatim.
    #[error("{0}")]
    Remote(String),

    /// Broken invariant inside this process (missing local shard, failed
    /// worker task).
    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Index(#[from] tantivy::TantivyError),
}
