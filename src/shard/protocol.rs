//! Internal cluster wire protocol.
//!
//! Peers exchange newline-delimited JSON records over a plain TCP stream:
//! one [`PeerRequest`] per line in, one [`PeerResponse`] per line out, in
//! strict request-response order per channel. The shape is private to the
//! cluster; the only compatibility requirement is that nodes built from the
//! same version interoperate.

use serde::{Deserialize, Serialize};

use crate::models::{Document, SearchRequest, SearchResult};

/// Operation carried by a forwarded request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestType {
    #[serde(rename = "INDEX")]
    Index,
    #[serde(rename = "BATCH_INDEX")]
    BatchIndex,
    #[serde(rename = "GET")]
    Get,
    #[serde(rename = "DELETE")]
    Delete,
    #[serde(rename = "SEARCH")]
    Search,
    #[serde(rename = "CREATE_INDEX")]
    CreateIndex,
}

/// Request envelope. Only the fields relevant to `type` are populated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerRequest {
    #[serde(rename = "type")]
    pub op: RequestType,
    pub index_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Document>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_docs: Option<Vec<Document>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_req: Option<SearchRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_shards: Option<u32>,
}

impl PeerRequest {
    pub fn new(op: RequestType, index_name: impl Into<String>) -> PeerRequest {
        PeerRequest {
            op,
            index_name: index_name.into(),
            id: None,
            data: None,
            batch_ids: None,
            batch_docs: None,
            search_req: None,
            num_shards: None,
        }
    }
}

/// Response envelope. A populated `err` means the operation failed on the
/// peer; the text is propagated to the caller verbatim.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PeerResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Document>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_result: Option<SearchResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,
}

impl PeerResponse {
    pub fn ok() -> PeerResponse {
        PeerResponse::default()
    }

    pub fn error(message: impl Into<String>) -> PeerResponse {
        PeerResponse {
            err: Some(message.into()),
            ..PeerResponse::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Query;

    #[test]
    fn request_envelope_uses_wire_field_names() {
        let mut req = PeerRequest::new(RequestType::Index, "books");
        req.id = Some("1".to_string());
        req.data = Some(Document::new());

        let encoded = serde_json::to_value(&req).unwrap();
        assert_eq!(encoded["type"], "INDEX");
        assert_eq!(encoded["index_name"], "books");
        assert_eq!(encoded["id"], "1");
        // Unset optionals stay off the wire.
        assert!(encoded.get("batch_ids").is_none());
        assert!(encoded.get("num_shards").is_none());
    }

    #[test]
    fn search_request_roundtrips_through_envelope() {
        let mut req = PeerRequest::new(RequestType::Search, "books");
        req.search_req = Some(SearchRequest::new(Query::QueryString {
            query: "name:apple".to_string(),
        }));

        let line = serde_json::to_string(&req).unwrap();
        let decoded: PeerRequest = serde_json::from_str(&line).unwrap();
        assert_eq!(decoded.op, RequestType::Search);
        assert!(decoded.search_req.is_some());
    }

    #[test]
    fn error_response_roundtrips() {
        let resp = PeerResponse::error("shard unavailable");
        let line = serde_json::to_string(&resp).unwrap();
        let decoded: PeerResponse = serde_json::from_str(&line).unwrap();
        assert_eq!(decoded.err.as_deref(), Some("shard unavailable"));
        assert!(decoded.data.is_none());
    }
}
