//! Shared data-model types.
//!
//! These shapes travel across module boundaries and over the internal
//! cluster wire, so everything here is serde-serializable. The search types
//! are deliberately engine-neutral: each shard store translates a [`Query`]
//! into its own engine query, and partial [`SearchResult`]s merge with an
//! associative operator so fold order never affects totals.

use serde::{Deserialize, Serialize};

/// An arbitrary JSON object keyed by field name.
///
/// Before storage the document is augmented with a `_source` key holding the
/// JSON serialisation of the original object; that string is the canonical
/// retrieval form.
pub type Document = serde_json::Map<String, serde_json::Value>;

/// Engine-neutral query tree, mirroring the subset of the Elasticsearch DSL
/// the adapter accepts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Query {
    /// Matches every document.
    MatchAll,
    /// Query-string syntax (`field:term`, bare terms against the catch-all).
    QueryString { query: String },
    /// Single-field match.
    Match { field: String, query: String },
    /// Conjunction of sub-queries.
    Bool {
        #[serde(default)]
        must: Vec<Query>,
    },
}

impl Default for Query {
    fn default() -> Self {
        Query::MatchAll
    }
}

fn default_size() -> usize {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    #[serde(default)]
    pub query: Query,
    #[serde(default)]
    pub from: usize,
    #[serde(default = "default_size")]
    pub size: usize,
    /// Stored fields to return with each hit (`_source` in practice).
    #[serde(default)]
    pub fields: Vec<String>,
}

impl SearchRequest {
    pub fn new(query: Query) -> Self {
        SearchRequest {
            query,
            from: 0,
            size: default_size(),
            fields: vec!["_source".to_string()],
        }
    }

    /// Number of hits a single shard must produce so the top-level window
    /// `[from, from+size)` can be cut after the merge.
    pub fn window(&self) -> usize {
        (self.from + self.size).max(1)
    }
}

/// One matching document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hit {
    pub id: String,
    pub score: f32,
    /// Requested stored fields; `_source` carries the verbatim JSON string.
    #[serde(default)]
    pub fields: Document,
}

/// Partial or merged search outcome.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchResult {
    pub total: u64,
    pub max_score: Option<f32>,
    pub hits: Vec<Hit>,
}

impl SearchResult {
    /// Folds another partial result into this one.
    ///
    /// Totals add, hits concatenate and re-sort by descending score. The
    /// operation is associative, so cluster-level and shard-level merges can
    /// fold in arrival order.
    pub fn merge(&mut self, other: SearchResult) {
        self.total += other.total;
        self.max_score = match (self.max_score, other.max_score) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        self.hits.extend(other.hits);
        self.hits
            .sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    }
}
