#[cfg(test)]
mod tests {
    use crate::cluster::Cluster;
    use crate::mapping::FieldType;
    use crate::models::{Document, Query, SearchRequest};
    use crate::shard::manager::IndexTemplate;
    use crate::shard::{ClusterServer, Manager};
    use serde_json::json;
    use std::path::Path;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn doc(value: serde_json::Value) -> Document {
        value.as_object().unwrap().clone()
    }

    async fn single_node(path: &Path, default_shards: u32) -> Arc<Manager> {
        let peers = vec!["n1=127.0.0.1:19991".to_string()];
        let cluster = Arc::new(Cluster::new("n1", "127.0.0.1:19991", &peers));
        Manager::open(path, default_shards, cluster).await.unwrap()
    }

    /// First id whose crc32 routes to the wanted shard.
    fn id_for_shard(shard: u32, num_shards: u32) -> String {
        (0..)
            .map(|i| format!("doc-{}", i))
            .find(|id| crc32fast::hash(id.as_bytes()) % num_shards == shard)
            .unwrap()
    }

    // ============================================================
    // MANAGER LIFECYCLE
    // ============================================================

    #[tokio::test]
    async fn create_index_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let manager = single_node(dir.path(), 3).await;

        let first = manager.create_index("books", 3, true).await.unwrap();
        let second = manager.create_index("books", 5, true).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.num_shards(), 3);
    }

    #[tokio::test]
    async fn invalid_index_names_are_rejected() {
        let dir = TempDir::new().unwrap();
        let manager = single_node(dir.path(), 3).await;

        assert!(manager.create_index("_templates", 1, false).await.is_err());
        assert!(manager.create_index("a/b", 1, false).await.is_err());
        assert!(manager.create_index("", 1, false).await.is_err());
    }

    #[tokio::test]
    async fn startup_reopens_existing_indices() {
        let dir = TempDir::new().unwrap();
        {
            let manager = single_node(dir.path(), 3).await;
            let index = manager.create_index("books", 3, false).await.unwrap();
            for i in 0..100 {
                index
                    .index(&i.to_string(), doc(json!({"n": i})))
                    .await
                    .unwrap();
            }
            manager.close();
        }

        let manager = single_node(dir.path(), 3).await;
        assert_eq!(manager.list_indices(), vec!["books".to_string()]);

        let index = manager.get_index("books").unwrap();
        assert_eq!(index.num_shards(), 3);
        let result = index
            .search(&SearchRequest::new(Query::MatchAll))
            .await
            .unwrap();
        assert_eq!(result.total, 100);
    }

    #[tokio::test]
    async fn delete_survives_restart() {
        let dir = TempDir::new().unwrap();
        {
            let manager = single_node(dir.path(), 3).await;
            let index = manager.create_index("books", 3, false).await.unwrap();
            index.index("a", doc(json!({"name": "Apple"}))).await.unwrap();
            index.delete("a").await.unwrap();
            assert!(index.get("a").await.unwrap().is_none());
            manager.close();
        }

        let manager = single_node(dir.path(), 3).await;
        let index = manager.get_index("books").unwrap();
        assert!(index.get("a").await.unwrap().is_none());
    }

    // ============================================================
    // ROUTING AND FAN-OUT
    // ============================================================

    #[tokio::test]
    async fn shard_routing_uses_crc32() {
        let dir = TempDir::new().unwrap();
        let manager = single_node(dir.path(), 3).await;
        let index = manager.create_index("books", 3, false).await.unwrap();

        for i in 0..50 {
            let id = format!("doc-{}", i);
            let expected = crc32fast::hash(id.as_bytes()) % 3;
            assert_eq!(index.shard_id(&id), expected);
        }
    }

    #[tokio::test]
    async fn search_total_is_shard_count_independent() {
        for shards in [1u32, 3, 7] {
            let dir = TempDir::new().unwrap();
            let manager = single_node(dir.path(), shards).await;
            let index = manager.create_index("books", shards, false).await.unwrap();

            let ids: Vec<String> = (0..40).map(|i| format!("doc-{}", i)).collect();
            let docs: Vec<Document> = (0..40).map(|i| doc(json!({"n": i}))).collect();
            index.batch_index(ids, docs).await.unwrap();

            let mut req = SearchRequest::new(Query::MatchAll);
            req.size = 100;
            let result = index.search(&req).await.unwrap();
            assert_eq!(result.total, 40, "num_shards={}", shards);

            let local = index.local_search(&req).await.unwrap();
            assert_eq!(local.total, 40);
        }
    }

    #[tokio::test]
    async fn query_search_returns_matching_hit() {
        let dir = TempDir::new().unwrap();
        let manager = single_node(dir.path(), 3).await;
        let index = manager.create_index("fruit", 3, false).await.unwrap();

        index.index("a", doc(json!({"name": "Apple"}))).await.unwrap();
        index.index("b", doc(json!({"name": "Banana"}))).await.unwrap();
        index.index("c", doc(json!({"name": "Cherry"}))).await.unwrap();

        let result = index
            .search(&SearchRequest::new(Query::QueryString {
                query: "Apple".to_string(),
            }))
            .await
            .unwrap();

        assert_eq!(result.total, 1);
        assert_eq!(result.hits[0].id, "a");
    }

    #[tokio::test]
    async fn batch_then_deletes_reach_net_result() {
        let dir = TempDir::new().unwrap();
        let manager = single_node(dir.path(), 3).await;
        let index = manager.create_index("books", 3, false).await.unwrap();

        let ids: Vec<String> = (0..10).map(|i| format!("doc-{}", i)).collect();
        let docs: Vec<Document> = (0..10).map(|i| doc(json!({"n": i}))).collect();
        index.batch_index(ids, docs).await.unwrap();

        for i in [1, 4, 7] {
            index.delete(&format!("doc-{}", i)).await.unwrap();
        }

        let result = index
            .search(&SearchRequest::new(Query::MatchAll))
            .await
            .unwrap();
        assert_eq!(result.total, 7);
        assert!(index.get("doc-4").await.unwrap().is_none());
        assert!(index.get("doc-5").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn batch_last_write_wins_per_shard() {
        let dir = TempDir::new().unwrap();
        let manager = single_node(dir.path(), 3).await;
        let index = manager.create_index("books", 3, false).await.unwrap();

        index
            .batch_index(
                vec!["x".into(), "x".into()],
                vec![doc(json!({"rev": 1})), doc(json!({"rev": 2}))],
            )
            .await
            .unwrap();

        let fetched = index.get("x").await.unwrap().unwrap();
        assert_eq!(fetched.get("rev"), Some(&json!(2)));
    }

    // ============================================================
    // MAPPING
    // ============================================================

    #[tokio::test]
    async fn sniffed_mapping_is_persisted_across_restart() {
        let dir = TempDir::new().unwrap();
        {
            let manager = single_node(dir.path(), 3).await;
            let index = manager.create_index("books", 3, false).await.unwrap();
            index
                .index("1", doc(json!({"title": "Dune", "year": 1965})))
                .await
                .unwrap();
            manager.close();
        }

        let manager = single_node(dir.path(), 3).await;
        let index = manager.get_index("books").unwrap();
        assert_eq!(index.mapping.field_type("title"), Some(FieldType::String));
        assert_eq!(index.mapping.field_type("year"), Some(FieldType::Number));
    }

    // ============================================================
    // TEMPLATES
    // ============================================================

    #[tokio::test]
    async fn template_sets_shard_count() {
        let dir = TempDir::new().unwrap();
        let manager = single_node(dir.path(), 5).await;

        let template: IndexTemplate = serde_json::from_value(json!({
            "index_patterns": ["logs-*"],
            "settings": {"number_of_shards": 4},
        }))
        .unwrap();
        manager.put_template("t", template).unwrap();

        let index = manager.create_index("logs-2024", 0, false).await.unwrap();
        assert_eq!(index.num_shards(), 4);

        // Non-matching names fall back to the configured default.
        let other = manager.create_index("metrics-2024", 0, false).await.unwrap();
        assert_eq!(other.num_shards(), 5);
    }

    #[tokio::test]
    async fn template_mappings_seed_field_types() {
        let dir = TempDir::new().unwrap();
        let manager = single_node(dir.path(), 3).await;

        let template: IndexTemplate = serde_json::from_value(json!({
            "index_patterns": ["logs-*"],
            "template": {
                "settings": {"index": {"number_of_shards": "2"}},
                "mappings": {"properties": {
                    "message": {"type": "text"},
                    "count": {"type": "long"},
                }},
            },
        }))
        .unwrap();
        manager.put_template("logs", template).unwrap();

        let index = manager.create_index("logs-app", 0, false).await.unwrap();
        assert_eq!(index.num_shards(), 2);
        assert_eq!(index.mapping.field_type("message"), Some(FieldType::String));
        assert_eq!(index.mapping.field_type("count"), Some(FieldType::Number));
    }

    #[tokio::test]
    async fn highest_priority_template_wins() {
        let dir = TempDir::new().unwrap();
        let manager = single_node(dir.path(), 5).await;

        let low: IndexTemplate = serde_json::from_value(json!({
            "index_patterns": ["logs-*"],
            "priority": 1,
            "settings": {"number_of_shards": 2},
        }))
        .unwrap();
        let high: IndexTemplate = serde_json::from_value(json!({
            "index_patterns": ["logs-*"],
            "priority": 10,
            "settings": {"number_of_shards": 4},
        }))
        .unwrap();
        manager.put_template("low", low).unwrap();
        manager.put_template("high", high).unwrap();

        let index = manager.create_index("logs-2024", 0, false).await.unwrap();
        assert_eq!(index.num_shards(), 4);
    }

    #[tokio::test]
    async fn templates_are_reloaded_from_disk() {
        let dir = TempDir::new().unwrap();
        {
            let manager = single_node(dir.path(), 5).await;
            let template: IndexTemplate = serde_json::from_value(json!({
                "index_patterns": ["logs-*"],
                "settings": {"number_of_shards": 4},
            }))
            .unwrap();
            manager.put_template("t", template).unwrap();
        }

        let manager = single_node(dir.path(), 5).await;
        assert!(manager.get_template("t").is_some());
        let index = manager.create_index("logs-later", 0, false).await.unwrap();
        assert_eq!(index.num_shards(), 4);
    }

    // ============================================================
    // TWO-NODE CLUSTER
    // ============================================================

    #[tokio::test]
    async fn two_node_cluster_routes_and_forwards() {
        let dir1 = TempDir::new().unwrap();
        let dir2 = TempDir::new().unwrap();

        let server1 = ClusterServer::bind("127.0.0.1:0").await.unwrap();
        let server2 = ClusterServer::bind("127.0.0.1:0").await.unwrap();
        let addr1 = server1.local_addr().unwrap().to_string();
        let addr2 = server2.local_addr().unwrap().to_string();

        let peers = vec![format!("n1={}", addr1), format!("n2={}", addr2)];
        let cluster1 = Arc::new(Cluster::new("n1", addr1.clone(), &peers));
        let cluster2 = Arc::new(Cluster::new("n2", addr2.clone(), &peers));

        let manager1 = Manager::open(dir1.path(), 2, cluster1).await.unwrap();
        let manager2 = Manager::open(dir2.path(), 2, cluster2).await.unwrap();
        server1.start(manager1.clone());
        server2.start(manager2.clone());

        // Shard 0 is owned by n1, shard 1 by n2.
        let index = manager1.create_index("books", 2, true).await.unwrap();
        assert_eq!(index.shards.len(), 1);
        assert!(index.shards.contains_key(&0));

        let local_id = id_for_shard(0, 2);
        let remote_id = id_for_shard(1, 2);
        index
            .index(&local_id, doc(json!({"name": "local"})))
            .await
            .unwrap();
        index
            .index(&remote_id, doc(json!({"name": "remote"})))
            .await
            .unwrap();

        // Both reads succeed from n1; one of them traverses the forwarder.
        assert!(index.get(&local_id).await.unwrap().is_some());
        let remote_doc = index.get(&remote_id).await.unwrap().unwrap();
        assert_eq!(remote_doc.get("name"), Some(&json!("remote")));

        // The forwarded CREATE_INDEX materialised the index on n2, and the
        // forwarded write landed in n2's own shard.
        let index2 = manager2.get_index("books").unwrap();
        assert_eq!(index2.num_shards(), 2);
        assert!(index2.shards.contains_key(&1));
        let local_on_n2 = index2
            .local_search(&SearchRequest::new(Query::MatchAll))
            .await
            .unwrap();
        assert_eq!(local_on_n2.total, 1);

        // Cluster-wide search from n1 sees both documents; the peer answered
        // with a local search only, so the fan-out never recursed.
        let result = index
            .search(&SearchRequest::new(Query::MatchAll))
            .await
            .unwrap();
        assert_eq!(result.total, 2);

        // Deleting the remote document through n1 goes through the same
        // forwarding path.
        index.delete(&remote_id).await.unwrap();
        assert!(index.get(&remote_id).await.unwrap().is_none());
    }
}
