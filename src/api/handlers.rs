//! HTTP handlers for the Elasticsearch-compatible surface.
//!
//! Handlers translate between wire shapes and the core operations on
//! [`Manager`] and [`Index`]; document bodies pass through untouched apart
//! from the `_source` round-trip performed by the stores.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{DefaultBodyLimit, Extension, Path, Query};
use axum::http::{HeaderValue, StatusCode};
use axum::response::Response;
use axum::routing::{get, post, put};
use axum::{middleware, Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::Error;
use crate::models::Document;
use crate::shard::{Index, IndexTemplate, Manager};

use super::dsl;

/// Builds the public API router.
pub fn router(manager: Arc<Manager>, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/", get(handle_info))
        .route("/_cluster/health", get(handle_health))
        .route("/_cat/indices", get(handle_cat_indices))
        .route("/_metadata", get(handle_metadata))
        .route("/_mapping", get(handle_all_mappings))
        .route("/_bulk", post(handle_bulk))
        .route(
            "/_template/:name",
            put(handle_put_template)
                .post(handle_put_template)
                .get(handle_get_legacy_template),
        )
        .route(
            "/_index_template/:name",
            put(handle_put_template)
                .post(handle_put_template)
                .get(handle_get_index_template),
        )
        .route(
            "/:index",
            put(handle_create_index)
                .get(handle_index_info)
                .head(handle_head_index),
        )
        .route("/:index/_bulk", post(handle_index_bulk))
        .route(
            "/:index/_mapping",
            get(handle_get_mapping)
                .put(handle_put_mapping)
                .post(handle_put_mapping),
        )
        .route(
            "/:index/_doc/:id",
            put(handle_index_doc)
                .post(handle_index_doc)
                .get(handle_get_doc)
                .delete(handle_delete_doc),
        )
        .route(
            "/:index/_create/:id",
            put(handle_create_doc).post(handle_create_doc),
        )
        .route(
            "/:index/_search",
            get(handle_search_get).post(handle_search_post),
        )
        .layer(middleware::map_response(set_product_header))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(Extension(manager))
}

async fn set_product_header(mut response: Response) -> Response {
    response
        .headers_mut()
        .insert("X-Elastic-Product", HeaderValue::from_static("Elasticsearch"));
    response
}

fn es_error(status: u16, kind: &str, reason: &str, index: &str) -> Value {
    let cause = json!({"type": kind, "reason": reason, "index": index});
    json!({
        "error": {
            "root_cause": [cause],
            "type": kind,
            "reason": reason,
            "index": index,
        },
        "status": status,
    })
}

async fn get_or_create_index(
    manager: &Arc<Manager>,
    name: &str,
) -> crate::error::Result<Arc<Index>> {
    match manager.get_index(name) {
        Some(index) => Ok(index),
        None => manager.create_index(name, 0, true).await,
    }
}

// ---------------------------------------------------------------------------
// Cluster-level endpoints
// ---------------------------------------------------------------------------

async fn handle_info() -> Json<Value> {
    Json(json!({
        "name": "breeze-node",
        "cluster_name": "breeze-cluster",
        "cluster_uuid": "breeze-cluster-uuid",
        "version": {
            "number": "8.10.2",
            "build_flavor": "default",
            "build_type": "tar",
            "build_hash": "breeze-hash",
            "build_date": "2023-01-01T00:00:00Z",
            "build_snapshot": false,
            "lucene_version": "9.7.0",
        },
        "tagline": "You Know, for Search",
    }))
}

async fn handle_health(Extension(manager): Extension<Arc<Manager>>) -> Json<Value> {
    let nodes = manager.cluster.nodes.len().max(1);
    Json(json!({
        "cluster_name": "breeze-cluster",
        "status": "green",
        "timed_out": false,
        "number_of_nodes": nodes,
        "number_of_data_nodes": nodes,
        "active_primary_shards": 1,
        "active_shards": 1,
        "relocating_shards": 0,
        "initializing_shards": 0,
        "unassigned_shards": 0,
        "delayed_unassigned_shards": 0,
        "number_of_pending_tasks": 0,
        "number_of_in_flight_fetch": 0,
        "task_max_waiting_in_queue_millis": 0,
        "active_shards_percent_as_number": 100.0,
    }))
}

async fn handle_cat_indices(Extension(manager): Extension<Arc<Manager>>) -> String {
    let mut out = String::new();
    for name in manager.list_indices() {
        out.push_str(&format!("green open {} uuid 1 0 0 0 0b 0b\n", name));
    }
    out
}

async fn handle_metadata(Extension(manager): Extension<Arc<Manager>>) -> Json<Value> {
    let mut metadata = serde_json::Map::new();
    for name in manager.list_indices() {
        if let Some(index) = manager.get_index(&name) {
            metadata.insert(name, serde_json::to_value(index.metadata()).unwrap_or(Value::Null));
        }
    }
    Json(Value::Object(metadata))
}

// ---------------------------------------------------------------------------
// Index lifecycle
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct CreateIndexParams {
    shards: Option<u32>,
    forward: Option<bool>,
}

async fn handle_create_index(
    Path(index): Path<String>,
    Query(params): Query<CreateIndexParams>,
    Extension(manager): Extension<Arc<Manager>>,
) -> (StatusCode, Json<Value>) {
    let shards = params.shards.unwrap_or(0);
    let forward = params.forward.unwrap_or(true);

    match manager.create_index(&index, shards, forward).await {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({"acknowledged": true, "shards_acknowledged": true, "index": index})),
        ),
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(es_error(400, "invalid_index_name_exception", &e.to_string(), &index)),
        ),
    }
}

async fn handle_head_index(
    Path(index): Path<String>,
    Extension(manager): Extension<Arc<Manager>>,
) -> StatusCode {
    if manager.get_index(&index).is_some() {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn handle_index_info(
    Path(index): Path<String>,
    Extension(manager): Extension<Arc<Manager>>,
) -> (StatusCode, Json<Value>) {
    let mut result = serde_json::Map::new();
    for name in index.split(',').map(str::trim).filter(|n| !n.is_empty()) {
        let Some(idx) = manager.get_index(name) else {
            continue;
        };
        result.insert(
            name.to_string(),
            json!({
                "settings": {
                    "index": {
                        "number_of_shards": idx.num_shards().to_string(),
                        "number_of_replicas": "0",
                        "version": {"created": "8100299"},
                    },
                },
                "mappings": {"properties": mapping_properties(&idx)},
            }),
        );
    }

    if result.is_empty() {
        return (
            StatusCode::NOT_FOUND,
            Json(es_error(404, "index_not_found_exception", "no such index", &index)),
        );
    }
    (StatusCode::OK, Json(Value::Object(result)))
}

// ---------------------------------------------------------------------------
// Mappings
// ---------------------------------------------------------------------------

fn mapping_properties(index: &Index) -> Value {
    let mut properties = serde_json::Map::new();
    for (field, field_type) in index.mapping.snapshot() {
        properties.insert(field, json!({"type": field_type.as_es_type()}));
    }
    Value::Object(properties)
}

async fn handle_all_mappings(Extension(manager): Extension<Arc<Manager>>) -> Json<Value> {
    let mut result = serde_json::Map::new();
    for name in manager.list_indices() {
        if let Some(index) = manager.get_index(&name) {
            result.insert(
                name,
                json!({"mappings": {"properties": mapping_properties(&index)}}),
            );
        }
    }
    Json(Value::Object(result))
}

async fn handle_get_mapping(
    Path(index): Path<String>,
    Extension(manager): Extension<Arc<Manager>>,
) -> (StatusCode, Json<Value>) {
    let mut result = serde_json::Map::new();
    for name in index.split(',').map(str::trim).filter(|n| !n.is_empty()) {
        if let Some(idx) = manager.get_index(name) {
            result.insert(
                name.to_string(),
                json!({"mappings": {"properties": mapping_properties(&idx)}}),
            );
        }
    }
    if result.is_empty() {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "index not found"})),
        );
    }
    (StatusCode::OK, Json(Value::Object(result)))
}

#[derive(Deserialize)]
struct PutMappingBody {
    #[serde(default)]
    properties: Document,
}

async fn handle_put_mapping(
    Path(index): Path<String>,
    Extension(manager): Extension<Arc<Manager>>,
    Json(body): Json<PutMappingBody>,
) -> (StatusCode, Json<Value>) {
    let Some(idx) = manager.get_index(&index) else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "index not found"})),
        );
    };
    idx.update_mapping(&body.properties);
    (StatusCode::OK, Json(json!({"acknowledged": true})))
}

// ---------------------------------------------------------------------------
// Templates
// ---------------------------------------------------------------------------

async fn handle_put_template(
    Path(name): Path<String>,
    Extension(manager): Extension<Arc<Manager>>,
    Json(template): Json<IndexTemplate>,
) -> (StatusCode, Json<Value>) {
    match manager.put_template(&name, template) {
        Ok(()) => (StatusCode::OK, Json(json!({"acknowledged": true}))),
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": e.to_string()})),
        ),
    }
}

async fn handle_get_legacy_template(
    Path(name): Path<String>,
    Extension(manager): Extension<Arc<Manager>>,
) -> (StatusCode, Json<Value>) {
    match manager.get_template(&name) {
        Some(template) => (
            StatusCode::OK,
            Json(json!({name: serde_json::to_value(template).unwrap_or(Value::Null)})),
        ),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "template not found"})),
        ),
    }
}

async fn handle_get_index_template(
    Path(name): Path<String>,
    Extension(manager): Extension<Arc<Manager>>,
) -> (StatusCode, Json<Value>) {
    match manager.get_template(&name) {
        Some(template) => (
            StatusCode::OK,
            Json(json!({
                "index_templates": [{
                    "name": name,
                    "index_template": serde_json::to_value(template).unwrap_or(Value::Null),
                }],
            })),
        ),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "template not found"})),
        ),
    }
}

// ---------------------------------------------------------------------------
// Documents
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct IndexDocParams {
    op_type: Option<String>,
}

async fn handle_index_doc(
    Path((index, id)): Path<(String, String)>,
    Query(params): Query<IndexDocParams>,
    Extension(manager): Extension<Arc<Manager>>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let is_create = params.op_type.as_deref() == Some("create");
    index_document(manager, index, id, body, is_create).await
}

async fn handle_create_doc(
    Path((index, id)): Path<(String, String)>,
    Extension(manager): Extension<Arc<Manager>>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    index_document(manager, index, id, body, true).await
}

async fn index_document(
    manager: Arc<Manager>,
    index: String,
    id: String,
    body: Value,
    is_create: bool,
) -> (StatusCode, Json<Value>) {
    let Some(doc) = body.as_object().cloned() else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "document body must be a JSON object"})),
        );
    };

    let idx = match get_or_create_index(&manager, &index).await {
        Ok(idx) => idx,
        Err(e) => return internal_error(e),
    };

    if is_create {
        match idx.get(&id).await {
            Ok(Some(_)) => {
                let conflict = Error::AlreadyExists(format!("document {} already exists", id));
                let mut body = es_error(409, "version_conflict_engine_exception", &conflict.to_string(), &index);
                body["error"]["id"] = json!(id);
                return (StatusCode::CONFLICT, Json(body));
            }
            Ok(None) => {}
            Err(e) => return internal_error(e),
        }
    }

    if let Err(e) = idx.index(&id, doc).await {
        return internal_error(e);
    }
    (
        StatusCode::OK,
        Json(json!({"_index": index, "_id": id, "result": "created", "_version": 1})),
    )
}

async fn handle_get_doc(
    Path((index, id)): Path<(String, String)>,
    Extension(manager): Extension<Arc<Manager>>,
) -> (StatusCode, Json<Value>) {
    let not_found = (
        StatusCode::NOT_FOUND,
        Json(json!({"_index": index, "_id": id, "found": false})),
    );
    let Some(idx) = manager.get_index(&index) else {
        return not_found;
    };
    match idx.get(&id).await {
        Ok(Some(doc)) => (
            StatusCode::OK,
            Json(json!({"_index": index, "_id": id, "found": true, "_source": doc})),
        ),
        Ok(None) => not_found,
        Err(e) => internal_error(e),
    }
}

async fn handle_delete_doc(
    Path((index, id)): Path<(String, String)>,
    Extension(manager): Extension<Arc<Manager>>,
) -> (StatusCode, Json<Value>) {
    let Some(idx) = manager.get_index(&index) else {
        return (StatusCode::NOT_FOUND, Json(json!({"found": false})));
    };
    match idx.delete(&id).await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({"_index": index, "_id": id, "result": "deleted"})),
        ),
        Err(e) => internal_error(e),
    }
}

// ---------------------------------------------------------------------------
// Search
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct SearchParams {
    q: Option<String>,
    local: Option<bool>,
}

async fn handle_search_get(
    Path(index): Path<String>,
    Query(params): Query<SearchParams>,
    Extension(manager): Extension<Arc<Manager>>,
) -> (StatusCode, Json<Value>) {
    let req = dsl::from_query_param(params.q.as_deref().unwrap_or(""));
    run_search(manager, index, req, params.local.unwrap_or(false)).await
}

async fn handle_search_post(
    Path(index): Path<String>,
    Query(params): Query<SearchParams>,
    Extension(manager): Extension<Arc<Manager>>,
    body: Option<Json<Value>>,
) -> (StatusCode, Json<Value>) {
    let req = match body {
        Some(Json(body)) => dsl::from_search_body(&body),
        None => dsl::from_query_param(""),
    };
    run_search(manager, index, req, params.local.unwrap_or(false)).await
}

async fn run_search(
    manager: Arc<Manager>,
    index: String,
    req: crate::models::SearchRequest,
    local: bool,
) -> (StatusCode, Json<Value>) {
    let Some(idx) = manager.get_index(&index) else {
        return (
            StatusCode::OK,
            Json(json!({
                "took": 0,
                "timed_out": false,
                "hits": {"total": {"value": 0, "relation": "eq"}, "hits": []},
            })),
        );
    };

    let started = Instant::now();
    let outcome = if local {
        idx.local_search(&req).await
    } else {
        idx.search(&req).await
    };
    let result = match outcome {
        Ok(result) => result,
        Err(e) => return internal_error(e),
    };

    let hits: Vec<Value> = result
        .hits
        .iter()
        .skip(req.from)
        .take(req.size)
        .map(|hit| {
            let source = hit
                .fields
                .get("_source")
                .and_then(Value::as_str)
                .and_then(|s| serde_json::from_str::<Value>(s).ok())
                .unwrap_or_else(|| json!({}));
            json!({
                "_index": index,
                "_id": hit.id,
                "_score": hit.score,
                "_source": source,
            })
        })
        .collect();

    (
        StatusCode::OK,
        Json(json!({
            "took": started.elapsed().as_millis() as u64,
            "timed_out": false,
            "_shards": {"total": 1, "successful": 1, "skipped": 0, "failed": 0},
            "hits": {
                "total": {"value": result.total, "relation": "eq"},
                "hits": hits,
            },
            "aggregations": {},
        })),
    )
}

// ---------------------------------------------------------------------------
// Bulk
// ---------------------------------------------------------------------------

async fn handle_bulk(
    Extension(manager): Extension<Arc<Manager>>,
    body: String,
) -> Json<Value> {
    bulk(manager, None, body).await
}

async fn handle_index_bulk(
    Path(index): Path<String>,
    Extension(manager): Extension<Arc<Manager>>,
    body: String,
) -> Json<Value> {
    bulk(manager, Some(index), body).await
}

/// Processes an NDJSON bulk body: an action line, optionally followed by a
/// document line, per operation. Every operation reports its own status; the
/// batch itself always answers 200.
async fn bulk(manager: Arc<Manager>, default_index: Option<String>, body: String) -> Json<Value> {
    let started = Instant::now();
    let mut items: Vec<Value> = Vec::new();
    let mut errors = false;
    let mut lines = body.lines();

    while let Some(line) = lines.next() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Ok(action) = serde_json::from_str::<Value>(line) else {
            continue;
        };
        let Some((op, meta)) = action
            .as_object()
            .and_then(|obj| obj.iter().next())
            .map(|(k, v)| (k.clone(), v.clone()))
        else {
            continue;
        };
        let meta = meta.as_object().cloned().unwrap_or_default();
        let index_name = meta
            .get("_index")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| default_index.clone())
            .unwrap_or_default();
        let id = meta
            .get("_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let idx = match get_or_create_index(&manager, &index_name).await {
            Ok(idx) => idx,
            Err(e) => {
                errors = true;
                // A document line may follow the failed action; drop it.
                if op == "index" || op == "create" || op == "update" {
                    lines.next();
                }
                items.push(json!({op: {
                    "_index": index_name, "_id": id, "status": 400, "error": e.to_string(),
                }}));
                continue;
            }
        };

        match op.as_str() {
            "index" | "create" => {
                let Some(doc_line) = lines.next() else {
                    break;
                };
                let doc: Document = serde_json::from_str(doc_line).unwrap_or_default();

                let mut status = 201;
                let mut error: Option<Value> = None;
                if op == "create" {
                    if let Ok(Some(_)) = idx.get(&id).await {
                        status = 409;
                        error = Some(json!({
                            "type": "version_conflict_engine_exception",
                            "reason": "document already exists",
                            "index": index_name,
                            "id": id,
                        }));
                    }
                }
                if status == 201 {
                    if idx.index(&id, doc).await.is_err() {
                        status = 500;
                    }
                }
                if status != 201 {
                    errors = true;
                }

                let mut item = json!({"_index": index_name, "_id": id, "status": status});
                if let Some(error) = error {
                    item["error"] = error;
                }
                items.push(json!({op: item}));
            }
            "delete" => {
                let status = if idx.delete(&id).await.is_ok() { 200 } else { 404 };
                if status != 200 {
                    errors = true;
                }
                items.push(json!({op: {"_index": index_name, "_id": id, "status": status}}));
            }
            "update" => {
                let Some(doc_line) = lines.next() else {
                    break;
                };
                let update: Value = serde_json::from_str(doc_line).unwrap_or_default();
                let status = apply_update(&idx, &id, &update).await;
                if status != 200 {
                    errors = true;
                }
                items.push(json!({op: {"_index": index_name, "_id": id, "status": status}}));
            }
            _ => {
                items.push(json!({op: {"_index": index_name, "_id": id, "status": 400}}));
            }
        }
    }

    Json(json!({
        "took": started.elapsed().as_millis() as u64,
        "errors": errors,
        "items": items,
    }))
}

/// Merges an update body into the stored document, honouring
/// `doc_as_upsert` and `upsert` for missing documents.
async fn apply_update(idx: &Arc<Index>, id: &str, update: &Value) -> u16 {
    let partial = update.get("doc").and_then(Value::as_object);
    let upsert = update.get("upsert").and_then(Value::as_object);
    let doc_as_upsert = update
        .get("doc_as_upsert")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let existing = match idx.get(id).await {
        Ok(existing) => existing,
        Err(_) => return 500,
    };

    let merged = match existing {
        Some(mut doc) => {
            if let Some(partial) = partial {
                for (key, value) in partial {
                    doc.insert(key.clone(), value.clone());
                }
            }
            Some(doc)
        }
        None => {
            if doc_as_upsert {
                partial.cloned()
            } else {
                upsert.cloned()
            }
        }
    };

    match merged {
        Some(doc) => {
            if idx.index(id, doc).await.is_ok() {
                200
            } else {
                500
            }
        }
        None => 404,
    }
}

fn internal_error(e: Error) -> (StatusCode, Json<Value>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": e.to_string()})),
    )
}
