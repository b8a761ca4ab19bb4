//! Translation from the Elasticsearch search DSL to the internal query tree.
//!
//! The accepted subset: `match_all`, `query_string`, `match` (first field
//! only), and `bool` with `must`/`filter` clauses, plus `from`/`size`
//! pagination. Anything unrecognised degrades to `match_all`, the laxity
//! Elasticsearch clients lean on.

use serde_json::Value;

use crate::models::{Query, SearchRequest};

/// Builds a request from the `?q=` query-string parameter.
pub fn from_query_param(q: &str) -> SearchRequest {
    let query = if q.is_empty() || q == "*" {
        Query::MatchAll
    } else {
        Query::QueryString {
            query: q.to_string(),
        }
    };
    SearchRequest::new(query)
}

/// Builds a request from a search body.
pub fn from_search_body(body: &Value) -> SearchRequest {
    let query = body
        .get("query")
        .map(parse_query)
        .unwrap_or(Query::MatchAll);
    let mut req = SearchRequest::new(query);
    if let Some(size) = body.get("size").and_then(Value::as_u64) {
        req.size = size as usize;
    }
    if let Some(from) = body.get("from").and_then(Value::as_u64) {
        req.from = from as usize;
    }
    req
}

fn parse_query(node: &Value) -> Query {
    let Some(obj) = node.as_object() else {
        return Query::MatchAll;
    };

    if obj.contains_key("match_all") {
        return Query::MatchAll;
    }

    if let Some(qs) = obj.get("query_string").and_then(Value::as_object) {
        if let Some(text) = qs.get("query").and_then(Value::as_str) {
            if text == "*" {
                return Query::MatchAll;
            }
            return Query::QueryString {
                query: text.to_string(),
            };
        }
    }

    if let Some(m) = obj.get("match").and_then(Value::as_object) {
        // Like the rest of the adapter, only the first match field is used.
        if let Some((field, spec)) = m.iter().next() {
            let text = match spec {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                Value::Object(inner) => inner
                    .get("query")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                _ => String::new(),
            };
            if !text.is_empty() {
                return Query::Match {
                    field: field.clone(),
                    query: text,
                };
            }
        }
    }

    if let Some(b) = obj.get("bool").and_then(Value::as_object) {
        let mut must = Vec::new();
        for clause_key in ["must", "filter"] {
            match b.get(clause_key) {
                Some(Value::Array(items)) => {
                    for item in items {
                        must.push(parse_query(item));
                    }
                }
                Some(single @ Value::Object(_)) => must.push(parse_query(single)),
                _ => {}
            }
        }
        return Query::Bool { must };
    }

    Query::MatchAll
}
