//! One logical index: a fixed set of shards spread over the cluster.
//!
//! `shards` holds only the stores whose owner is the local node; remote
//! shards are reached through the forwarder. Placement is the composition
//! `owner(shard_id(id))` — with the static router and peer list it is stable
//! for the cluster's lifetime.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;

use crate::cluster::Cluster;
use crate::error::{Error, Result};
use crate::mapping::Mapping;
use crate::models::{Document, SearchRequest, SearchResult};
use crate::store::Store;

use super::forwarder::Forwarder;

pub const MAPPING_FILE: &str = "mapping.json";

/// Shard-count and shard-name summary reported by the metadata endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct IndexMetadata {
    pub num_shards: u32,
    pub shards: Vec<String>,
}

pub struct Index {
    pub name: String,
    pub(crate) num_shards: u32,
    pub(crate) path: PathBuf,
    /// Locally-owned shards only.
    pub(crate) shards: HashMap<u32, Arc<Store>>,
    pub mapping: Mapping,
    pub(crate) cluster: Arc<Cluster>,
    pub(crate) forwarder: Arc<Forwarder>,
}

impl Index {
    /// Hash-routes a document id to its shard.
    pub fn shard_id(&self, id: &str) -> u32 {
        crc32fast::hash(id.as_bytes()) % self.num_shards
    }

    pub fn num_shards(&self) -> u32 {
        self.num_shards
    }

    pub fn metadata(&self) -> IndexMetadata {
        IndexMetadata {
            num_shards: self.num_shards,
            shards: (0..self.num_shards).map(|i| format!("shard_{}", i)).collect(),
        }
    }

    /// Indexes one document on its owning shard, local or remote. A sniffed
    /// mapping change is persisted before the write is routed.
    pub async fn index(&self, id: &str, doc: Document) -> Result<()> {
        if self.mapping.sniff(&doc) {
            self.save_mapping();
        }

        let shard_id = self.shard_id(id);
        let owner = self.cluster.shard_owner(shard_id);
        if self.cluster.is_local(owner) {
            let store = self.local_shard(shard_id)?;
            let id = id.to_string();
            run_blocking(move || store.index(&id, doc)).await
        } else {
            self.forwarder
                .forward_index(owner, &self.name, id, &doc)
                .await
        }
    }

    /// Indexes a batch: entries are grouped by owning node, node groups are
    /// dispatched concurrently, and the local group is sub-grouped by shard.
    /// Every sub-task runs to completion; the first error observed becomes
    /// the aggregate error.
    pub async fn batch_index(
        self: &Arc<Self>,
        ids: Vec<String>,
        docs: Vec<Document>,
    ) -> Result<()> {
        if ids.len() != docs.len() {
            return Err(Error::InvalidRequest(format!(
                "batch id/document count mismatch: {} vs {}",
                ids.len(),
                docs.len()
            )));
        }

        let mut changed = false;
        for doc in &docs {
            changed |= self.mapping.sniff(doc);
        }
        if changed {
            self.save_mapping();
        }

        let mut groups: HashMap<String, (Vec<String>, Vec<Document>)> = HashMap::new();
        for (id, doc) in ids.into_iter().zip(docs) {
            let owner = self.cluster.shard_owner(self.shard_id(&id));
            let group = groups.entry(owner.id.clone()).or_default();
            group.0.push(id);
            group.1.push(doc);
        }

        let mut handles = Vec::with_capacity(groups.len());
        for (node_id, (group_ids, group_docs)) in groups {
            let index = self.clone();
            handles.push(tokio::spawn(async move {
                index.dispatch_batch(&node_id, group_ids, group_docs).await
            }));
        }

        let mut first_err = None;
        for handle in handles {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    if first_err.is_none() {
                        first_err = Some(e);
                    }
                }
                Err(e) => {
                    if first_err.is_none() {
                        first_err = Some(Error::Internal(format!("batch task failed: {}", e)));
                    }
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn dispatch_batch(
        &self,
        node_id: &str,
        ids: Vec<String>,
        docs: Vec<Document>,
    ) -> Result<()> {
        let node = self
            .cluster
            .node_by_id(node_id)
            .ok_or_else(|| Error::Internal(format!("unknown cluster node {}", node_id)))?
            .clone();

        if !self.cluster.is_local(&node) {
            return self
                .forwarder
                .forward_batch_index(&node, &self.name, ids, docs)
                .await;
        }

        let mut shard_groups: HashMap<u32, (Vec<String>, Vec<Document>)> = HashMap::new();
        for (id, doc) in ids.into_iter().zip(docs) {
            let group = shard_groups.entry(self.shard_id(&id)).or_default();
            group.0.push(id);
            group.1.push(doc);
        }
        for (shard_id, (shard_ids, shard_docs)) in shard_groups {
            let store = self.local_shard(shard_id)?;
            run_blocking(move || store.batch_index(shard_ids, shard_docs)).await?;
        }
        Ok(())
    }

    /// Fetches a document from its owning shard. `None` when absent.
    pub async fn get(&self, id: &str) -> Result<Option<Document>> {
        let shard_id = self.shard_id(id);
        let owner = self.cluster.shard_owner(shard_id);
        if self.cluster.is_local(owner) {
            let store = self.local_shard(shard_id)?;
            let id = id.to_string();
            run_blocking(move || store.get(&id)).await
        } else {
            self.forwarder.forward_get(owner, &self.name, id).await
        }
    }

    /// Deletes a document from its owning shard.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let shard_id = self.shard_id(id);
        let owner = self.cluster.shard_owner(shard_id);
        if self.cluster.is_local(owner) {
            let store = self.local_shard(shard_id)?;
            let id = id.to_string();
            run_blocking(move || store.delete(&id)).await
        } else {
            self.forwarder.forward_delete(owner, &self.name, id).await
        }
    }

    /// Cluster-wide search: fan out to every node in parallel — self through
    /// [`Index::local_search`], peers through the forwarder — and fold the
    /// partial results. Any sub-error aborts the aggregate, but only after
    /// every sub-task has finished.
    pub async fn search(self: &Arc<Self>, req: &SearchRequest) -> Result<SearchResult> {
        let mut handles = Vec::with_capacity(self.cluster.nodes.len());
        for node in &self.cluster.nodes {
            if self.cluster.is_local(node) {
                let index = self.clone();
                let req = req.clone();
                handles.push(tokio::spawn(
                    async move { index.local_search(&req).await },
                ));
            } else {
                let forwarder = self.forwarder.clone();
                let node = node.clone();
                let name = self.name.clone();
                let req = req.clone();
                handles.push(tokio::spawn(async move {
                    forwarder.forward_search(&node, &name, &req).await
                }));
            }
        }

        let mut merged = SearchResult::default();
        let mut first_err = None;
        for handle in handles {
            match handle.await {
                Ok(Ok(partial)) => merged.merge(partial),
                Ok(Err(e)) => {
                    if first_err.is_none() {
                        first_err = Some(e);
                    }
                }
                Err(e) => {
                    if first_err.is_none() {
                        first_err = Some(Error::Internal(format!("search task failed: {}", e)));
                    }
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(merged),
        }
    }

    /// Searches only the locally-owned shards, in parallel. This is what a
    /// SEARCH request from a peer runs, so fan-out never recurses between
    /// nodes.
    pub async fn local_search(&self, req: &SearchRequest) -> Result<SearchResult> {
        let mut handles = Vec::with_capacity(self.shards.len());
        for store in self.shards.values() {
            let store = store.clone();
            let req = req.clone();
            handles.push(tokio::task::spawn_blocking(move || store.search(&req)));
        }

        let mut merged = SearchResult::default();
        let mut first_err = None;
        for handle in handles {
            match handle.await {
                Ok(Ok(partial)) => merged.merge(partial),
                Ok(Err(e)) => {
                    if first_err.is_none() {
                        first_err = Some(e);
                    }
                }
                Err(e) => {
                    if first_err.is_none() {
                        first_err = Some(Error::Internal(format!("shard search failed: {}", e)));
                    }
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(merged),
        }
    }

    /// Applies explicit mapping overrides and persists the snapshot.
    pub fn update_mapping(&self, properties: &Document) {
        self.mapping.update(properties);
        self.save_mapping();
    }

    pub(crate) fn save_mapping(&self) {
        let path = self.path.join(MAPPING_FILE);
        let snapshot = self.mapping.snapshot();
        match serde_json::to_vec(&snapshot) {
            Ok(data) => {
                if let Err(e) = fs::write(&path, data) {
                    tracing::warn!("Failed to persist mapping for {}: {}", self.name, e);
                }
            }
            Err(e) => tracing::warn!("Failed to encode mapping for {}: {}", self.name, e),
        }
    }

    /// Flushes the mapping snapshot and closes every local shard.
    pub fn close(&self) -> Result<()> {
        self.save_mapping();
        for (shard_id, store) in &self.shards {
            store.close().map_err(|e| {
                Error::Storage(format!(
                    "close shard {} of {}: {}",
                    shard_id, self.name, e
                ))
            })?;
        }
        Ok(())
    }

    fn local_shard(&self, shard_id: u32) -> Result<Arc<Store>> {
        self.shards.get(&shard_id).cloned().ok_or_else(|| {
            Error::Internal(format!(
                "shard {} of index {} is not owned by this node",
                shard_id, self.name
            ))
        })
    }
}

async fn run_blocking<T, F>(work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| Error::Internal(format!("blocking task failed: {}", e)))?
}
