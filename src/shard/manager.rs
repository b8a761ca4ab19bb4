//! Index lifecycle on this node.
//!
//! The manager opens every index directory found under the base path at
//! startup, creates or opens indices on demand, and applies index templates
//! when an index is created. Only the shards owned by the local node are
//! materialised; the rest of the index lives on peers.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cluster::Cluster;
use crate::error::{Error, Result};
use crate::mapping::Mapping;
use crate::models::Document;
use crate::store::Store;

use super::forwarder::Forwarder;
use super::index::{Index, MAPPING_FILE};

const TEMPLATES_DIR: &str = "_templates";

/// Pattern-matched defaults applied when an index is created.
///
/// Both the legacy flat layout (`settings`/`mappings` at the top level) and
/// the composable layout (nested under `template`) are accepted, the way
/// Elasticsearch clients send them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexTemplate {
    #[serde(default)]
    pub index_patterns: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mappings: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<TemplateBody>,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub order: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemplateBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mappings: Option<Value>,
}

impl IndexTemplate {
    pub fn matches(&self, index_name: &str) -> bool {
        self.index_patterns.iter().any(|pattern| {
            glob::Pattern::new(pattern)
                .map(|p| p.matches(index_name))
                .unwrap_or(false)
        })
    }

    fn effective_settings(&self) -> Option<&Value> {
        self.template
            .as_ref()
            .and_then(|t| t.settings.as_ref())
            .or(self.settings.as_ref())
    }

    fn effective_mappings(&self) -> Option<&Value> {
        self.template
            .as_ref()
            .and_then(|t| t.mappings.as_ref())
            .or(self.mappings.as_ref())
    }

    /// `number_of_shards` from the settings, either top-level or nested
    /// under `index`, as a number or a numeric string.
    pub fn number_of_shards(&self) -> Option<u32> {
        let settings = self.effective_settings()?;
        let direct = settings.get("number_of_shards");
        let nested = settings.get("index").and_then(|v| v.get("number_of_shards"));
        let value = direct.or(nested)?;
        match value {
            Value::Number(n) => n.as_u64().map(|n| n as u32),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// The `properties` object of the template mappings, if any.
    pub fn mapping_properties(&self) -> Option<&Document> {
        self.effective_mappings()?
            .get("properties")
            .and_then(Value::as_object)
    }
}

pub struct Manager {
    indices: DashMap<String, Arc<Index>>,
    templates: DashMap<String, IndexTemplate>,
    base_path: PathBuf,
    default_num_shards: u32,
    pub cluster: Arc<Cluster>,
    pub forwarder: Arc<Forwarder>,
    /// Serialises index opens; the underlying engine takes a directory lock,
    /// so two concurrent opens of the same index must not race.
    open_lock: tokio::sync::Mutex<()>,
}

impl Manager {
    /// Opens the manager over `base_path`: loads persisted templates, then
    /// opens every index directory found on disk.
    pub async fn open(
        base_path: impl Into<PathBuf>,
        default_num_shards: u32,
        cluster: Arc<Cluster>,
    ) -> Result<Arc<Manager>> {
        let base_path = base_path.into();
        fs::create_dir_all(&base_path)?;

        let manager = Arc::new(Manager {
            indices: DashMap::new(),
            templates: DashMap::new(),
            base_path: base_path.clone(),
            default_num_shards: default_num_shards.max(1),
            cluster,
            forwarder: Forwarder::new(),
            open_lock: tokio::sync::Mutex::new(()),
        });

        manager.load_templates()?;

        for entry in fs::read_dir(&base_path)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('_') {
                continue;
            }
            if let Err(e) = manager.open_index(&name).await {
                tracing::error!("Failed to open index {}: {}", name, e);
            }
        }

        Ok(manager)
    }

    fn load_templates(&self) -> Result<()> {
        let dir = self.base_path.join(TEMPLATES_DIR);
        fs::create_dir_all(&dir)?;
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match fs::read(&path).map_err(Error::from).and_then(|data| {
                serde_json::from_slice::<IndexTemplate>(&data).map_err(Error::from)
            }) {
                Ok(template) => {
                    self.templates.insert(name.to_string(), template);
                }
                Err(e) => tracing::warn!("Skipping template {}: {}", path.display(), e),
            }
        }
        Ok(())
    }

    /// Opens an index already present on disk (or materialises the local
    /// view of an index known to peers). Idempotent; safe to call from the
    /// cluster server dispatcher for a request that arrives before the index
    /// has been discovered locally.
    pub async fn open_index(&self, name: &str) -> Result<Arc<Index>> {
        self.open_index_with(name, None).await
    }

    async fn open_index_with(&self, name: &str, desired_shards: Option<u32>) -> Result<Arc<Index>> {
        if let Some(idx) = self.get_index(name) {
            return Ok(idx);
        }

        let _guard = self.open_lock.lock().await;
        if let Some(idx) = self.get_index(name) {
            return Ok(idx);
        }

        validate_index_name(name)?;
        let index_path = self.base_path.join(name);
        fs::create_dir_all(&index_path)?;

        // Shard count: explicit (create path) beats the shard_<n> directory
        // scan, which beats the configured default. The scan is lossy when
        // this node owns no local shards.
        let num_shards = match desired_shards {
            Some(n) if n > 0 => n,
            _ => discover_num_shards(&index_path)?.unwrap_or(self.default_num_shards),
        };

        let mut owned_shards = Vec::new();
        for shard_id in 0..num_shards {
            if self.cluster.is_local(self.cluster.shard_owner(shard_id)) {
                owned_shards.push(shard_id);
            }
        }

        let open_path = index_path.clone();
        let stores = tokio::task::spawn_blocking(move || -> Result<HashMap<u32, Arc<Store>>> {
            let mut stores = HashMap::new();
            for shard_id in owned_shards {
                let shard_path = open_path.join(format!("shard_{}", shard_id));
                stores.insert(shard_id, Arc::new(Store::open(&shard_path, true)?));
            }
            Ok(stores)
        })
        .await
        .map_err(|e| Error::Internal(format!("shard open task failed: {}", e)))??;

        let mapping = load_mapping(&index_path.join(MAPPING_FILE));

        let index = Arc::new(Index {
            name: name.to_string(),
            num_shards,
            path: index_path,
            shards: stores,
            mapping,
            cluster: self.cluster.clone(),
            forwarder: self.forwarder.clone(),
        });
        tracing::info!(
            "Opened index {} ({} shards, {} local)",
            name,
            num_shards,
            index.shards.len()
        );
        self.indices.insert(name.to_string(), index.clone());
        Ok(index)
    }

    /// Creates an index, applying the best-matching template.
    ///
    /// Idempotent: creating an index that already exists returns it. With
    /// `forward` set, the resolved shard count is propagated to every peer so
    /// they materialise their own shards.
    pub async fn create_index(
        &self,
        name: &str,
        num_shards: u32,
        forward: bool,
    ) -> Result<Arc<Index>> {
        if let Some(idx) = self.get_index(name) {
            return Ok(idx);
        }
        validate_index_name(name)?;

        let template = self.matching_template(name);
        let mut resolved = num_shards;
        if resolved == 0 {
            if let Some((template_name, template)) = &template {
                if let Some(n) = template.number_of_shards() {
                    tracing::info!("Applying template {} to index {}", template_name, name);
                    resolved = n;
                }
            }
        }
        if resolved == 0 {
            resolved = self.default_num_shards;
        }

        let index = self.open_index_with(name, Some(resolved)).await?;

        if let Some((_, template)) = &template {
            if let Some(properties) = template.mapping_properties() {
                index.update_mapping(properties);
            }
        }

        if forward {
            for node in &self.cluster.nodes {
                if self.cluster.is_local(node) {
                    continue;
                }
                if let Err(e) = self
                    .forwarder
                    .forward_create_index(node, name, resolved)
                    .await
                {
                    tracing::warn!("Failed to forward index creation to {}: {}", node.id, e);
                }
            }
        }

        Ok(index)
    }

    pub fn get_index(&self, name: &str) -> Option<Arc<Index>> {
        self.indices.get(name).map(|entry| entry.value().clone())
    }

    pub fn list_indices(&self) -> Vec<String> {
        let mut names: Vec<String> = self.indices.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Stores a template and persists it as submitted.
    pub fn put_template(&self, name: &str, template: IndexTemplate) -> Result<()> {
        validate_index_name(name)?;
        let path = self
            .base_path
            .join(TEMPLATES_DIR)
            .join(format!("{}.json", name));
        fs::write(&path, serde_json::to_vec(&template)?)?;
        self.templates.insert(name.to_string(), template);
        Ok(())
    }

    pub fn get_template(&self, name: &str) -> Option<IndexTemplate> {
        self.templates.get(name).map(|entry| entry.value().clone())
    }

    /// Best-matching template for a new index name: highest `priority`, then
    /// highest `order`, then lexicographically smallest name.
    fn matching_template(&self, index_name: &str) -> Option<(String, IndexTemplate)> {
        let mut candidates: Vec<(String, IndexTemplate)> = self
            .templates
            .iter()
            .filter(|entry| entry.value().matches(index_name))
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        candidates.sort_by(|a, b| {
            (b.1.priority, b.1.order)
                .cmp(&(a.1.priority, a.1.order))
                .then_with(|| a.0.cmp(&b.0))
        });
        candidates.into_iter().next()
    }

    /// Flushes mapping snapshots and closes every shard of every index.
    pub fn close(&self) {
        for entry in self.indices.iter() {
            if let Err(e) = entry.value().close() {
                tracing::error!("Failed to close index {}: {}", entry.key(), e);
            }
        }
    }
}

fn validate_index_name(name: &str) -> Result<()> {
    if name.is_empty()
        || name.starts_with('_')
        || name.contains('/')
        || name.contains('\\')
        || name.contains("..")
    {
        return Err(Error::InvalidRequest(format!(
            "invalid index name {:?}",
            name
        )));
    }
    Ok(())
}

/// Shard count of an existing index directory: `max(n) + 1` over the
/// `shard_<n>` entries, or `None` when no shard directory exists locally.
fn discover_num_shards(index_path: &Path) -> Result<Option<u32>> {
    let mut max_shard: Option<u32> = None;
    for entry in fs::read_dir(index_path)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if let Some(rest) = name.strip_prefix("shard_") {
            if let Ok(id) = rest.parse::<u32>() {
                max_shard = Some(max_shard.map_or(id, |m| m.max(id)));
            }
        }
    }
    Ok(max_shard.map(|m| m + 1))
}

fn load_mapping(path: &Path) -> Mapping {
    match fs::read(path) {
        Ok(data) => match serde_json::from_slice(&data) {
            Ok(fields) => Mapping::from_snapshot(fields),
            Err(e) => {
                tracing::warn!("Ignoring unreadable mapping at {}: {}", path.display(), e);
                Mapping::new()
            }
        },
        Err(_) => Mapping::new(),
    }
}
