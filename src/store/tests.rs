#[cfg(test)]
mod tests {
    use crate::models::{Document, Query, SearchRequest};
    use crate::store::Store;
    use serde_json::json;
    use tempfile::TempDir;

    fn doc(value: serde_json::Value) -> Document {
        value.as_object().unwrap().clone()
    }

    // ============================================================
    // ROUND-TRIP AND DELETE
    // ============================================================

    #[test]
    fn index_then_get_roundtrips_document() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path(), true).unwrap();

        let original = doc(json!({
            "name": "Breeze",
            "kind": "database",
            "stars": 42,
            "meta": {"lang": "rust"},
        }));
        store.index("1", original.clone()).unwrap();

        let fetched = store.get("1").unwrap().expect("document should exist");
        assert_eq!(fetched, original);
    }

    #[test]
    fn get_missing_document_returns_none() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path(), true).unwrap();
        assert!(store.get("ghost").unwrap().is_none());
    }

    #[test]
    fn delete_removes_document() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path(), true).unwrap();

        store.index("a", doc(json!({"name": "Apple"}))).unwrap();
        assert!(store.get("a").unwrap().is_some());

        store.delete("a").unwrap();
        assert!(store.get("a").unwrap().is_none());
        assert_eq!(store.doc_count(), 0);
    }

    #[test]
    fn reindex_same_id_replaces_document() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path(), true).unwrap();

        store.index("a", doc(json!({"rev": 1}))).unwrap();
        store.index("a", doc(json!({"rev": 2}))).unwrap();

        assert_eq!(store.doc_count(), 1);
        let fetched = store.get("a").unwrap().unwrap();
        assert_eq!(fetched.get("rev"), Some(&json!(2)));
    }

    // ============================================================
    // CRASH CONSISTENCY / REPLAY
    // ============================================================

    #[test]
    fn documents_survive_close_and_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = Store::open(dir.path(), true).unwrap();
            for i in 0..100 {
                store
                    .index(&i.to_string(), doc(json!({"n": i})))
                    .unwrap();
            }
            store.close().unwrap();
        }

        let store = Store::open(dir.path(), true).unwrap();
        assert_eq!(store.doc_count(), 100);
        let fetched = store.get("57").unwrap().unwrap();
        assert_eq!(fetched.get("n"), Some(&json!(57)));

        let result = store
            .search(&SearchRequest {
                query: Query::MatchAll,
                from: 0,
                size: 10,
                fields: vec![],
            })
            .unwrap();
        assert_eq!(result.total, 100);
    }

    #[test]
    fn delete_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = Store::open(dir.path(), true).unwrap();
            store.index("a", doc(json!({"name": "Apple"}))).unwrap();
            store.delete("a").unwrap();
            store.close().unwrap();
        }

        let store = Store::open(dir.path(), true).unwrap();
        assert!(store.get("a").unwrap().is_none());
        assert_eq!(store.doc_count(), 0);
    }

    #[test]
    fn replay_is_idempotent_across_multiple_reopens() {
        let dir = TempDir::new().unwrap();
        {
            let store = Store::open(dir.path(), true).unwrap();
            store.index("a", doc(json!({"v": 1}))).unwrap();
            store.index("b", doc(json!({"v": 2}))).unwrap();
            store.close().unwrap();
        }
        for _ in 0..3 {
            let store = Store::open(dir.path(), true).unwrap();
            assert_eq!(store.doc_count(), 2);
            store.close().unwrap();
        }
    }

    // ============================================================
    // BATCHES
    // ============================================================

    #[test]
    fn batch_applies_entries_in_input_order() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path(), true).unwrap();

        store
            .batch_index(
                vec!["x".into(), "x".into()],
                vec![doc(json!({"rev": "first"})), doc(json!({"rev": "second"}))],
            )
            .unwrap();

        let fetched = store.get("x").unwrap().unwrap();
        assert_eq!(fetched.get("rev"), Some(&json!("second")));
        assert_eq!(store.doc_count(), 1);
    }

    #[test]
    fn batch_rejects_mismatched_lengths() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path(), true).unwrap();

        let err = store
            .batch_index(vec!["a".into()], vec![])
            .unwrap_err();
        assert!(err.to_string().contains("mismatch"));
    }

    #[test]
    fn batch_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = Store::open(dir.path(), true).unwrap();
            let ids: Vec<String> = (0..25).map(|i| format!("doc-{}", i)).collect();
            let docs: Vec<Document> = (0..25).map(|i| doc(json!({"n": i}))).collect();
            store.batch_index(ids, docs).unwrap();
            store.close().unwrap();
        }
        let store = Store::open(dir.path(), true).unwrap();
        assert_eq!(store.doc_count(), 25);
    }

    // ============================================================
    // SEARCH
    // ============================================================

    #[test]
    fn query_string_matches_document_text() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path(), true).unwrap();

        store.index("a", doc(json!({"name": "Apple"}))).unwrap();
        store.index("b", doc(json!({"name": "Banana"}))).unwrap();

        let result = store
            .search(&SearchRequest::new(Query::QueryString {
                query: "Apple".to_string(),
            }))
            .unwrap();

        assert_eq!(result.total, 1);
        assert_eq!(result.hits[0].id, "a");
        assert!(result.max_score.is_some());
    }

    #[test]
    fn match_query_is_field_scoped() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path(), true).unwrap();

        store
            .index("a", doc(json!({"name": "Apple", "color": "red"})))
            .unwrap();
        store
            .index("b", doc(json!({"name": "Cherry", "color": "apple"})))
            .unwrap();

        let result = store
            .search(&SearchRequest::new(Query::Match {
                field: "name".to_string(),
                query: "Apple".to_string(),
            }))
            .unwrap();

        assert_eq!(result.total, 1);
        assert_eq!(result.hits[0].id, "a");
    }

    #[test]
    fn bool_query_requires_all_clauses() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path(), true).unwrap();

        store
            .index("a", doc(json!({"name": "Apple", "color": "red"})))
            .unwrap();
        store
            .index("b", doc(json!({"name": "Apple", "color": "green"})))
            .unwrap();

        let result = store
            .search(&SearchRequest::new(Query::Bool {
                must: vec![
                    Query::Match {
                        field: "name".to_string(),
                        query: "Apple".to_string(),
                    },
                    Query::Match {
                        field: "color".to_string(),
                        query: "green".to_string(),
                    },
                ],
            }))
            .unwrap();

        assert_eq!(result.total, 1);
        assert_eq!(result.hits[0].id, "b");
    }

    #[test]
    fn search_window_limits_hits_but_not_total() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path(), true).unwrap();

        let ids: Vec<String> = (0..20).map(|i| format!("doc-{}", i)).collect();
        let docs: Vec<Document> = (0..20).map(|i| doc(json!({"n": i}))).collect();
        store.batch_index(ids, docs).unwrap();

        let mut req = SearchRequest::new(Query::MatchAll);
        req.size = 5;
        let result = store.search(&req).unwrap();

        assert_eq!(result.total, 20);
        assert_eq!(result.hits.len(), 5);
    }

    #[test]
    fn search_returns_requested_source_field() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path(), true).unwrap();

        let original = doc(json!({"name": "Apple"}));
        store.index("a", original.clone()).unwrap();

        let result = store
            .search(&SearchRequest::new(Query::QueryString {
                query: "Apple".to_string(),
            }))
            .unwrap();

        let source = result.hits[0]
            .fields
            .get("_source")
            .and_then(|v| v.as_str())
            .expect("_source should be returned");
        let decoded: Document = serde_json::from_str(source).unwrap();
        assert_eq!(decoded, original);
    }
}
