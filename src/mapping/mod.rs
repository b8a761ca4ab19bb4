//! Dynamic field-type mapping.
//!
//! Every index carries a mapping: an ordered association from field name to a
//! four-way semantic type tag. Types are discovered by sniffing documents as
//! they are written (first writer wins) or set explicitly through a mapping
//! update, and the snapshot is persisted next to the index as `mapping.json`.
//!
//! Consumers that derive schemas from the mapping watch the generation
//! counter instead of polling: every accepted change bumps it, and a derived
//! schema is rebuilt lazily when the observed generation goes stale.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::Document;

/// Semantic type tag for a document field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Object,
}

impl FieldType {
    /// Normalises an Elasticsearch type name to the internal tag.
    pub fn from_es_type(name: &str) -> FieldType {
        match name {
            "text" | "keyword" => FieldType::String,
            "double" | "float" | "integer" | "long" => FieldType::Number,
            "boolean" => FieldType::Boolean,
            _ => FieldType::Object,
        }
    }

    /// The Elasticsearch type name reported back through `_mapping`.
    pub fn as_es_type(&self) -> &'static str {
        match self {
            FieldType::String => "text",
            FieldType::Number => "double",
            FieldType::Boolean => "boolean",
            FieldType::Object => "object",
        }
    }

    fn infer(value: &Value) -> Option<FieldType> {
        match value {
            Value::String(_) => Some(FieldType::String),
            Value::Number(_) => Some(FieldType::Number),
            Value::Bool(_) => Some(FieldType::Boolean),
            Value::Object(_) => Some(FieldType::Object),
            _ => None,
        }
    }
}

/// Per-index field-type registry.
///
/// Sniffing is write-exclusive; schema readers share the read side and may
/// proceed in parallel with each other.
pub struct Mapping {
    fields: RwLock<BTreeMap<String, FieldType>>,
    generation: AtomicU64,
}

impl Mapping {
    pub fn new() -> Mapping {
        Mapping {
            fields: RwLock::new(BTreeMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    /// Rebuilds the registry from a persisted snapshot.
    pub fn from_snapshot(fields: BTreeMap<String, FieldType>) -> Mapping {
        Mapping {
            fields: RwLock::new(fields),
            generation: AtomicU64::new(0),
        }
    }

    /// Classifies the top-level fields of `doc` and records any field not yet
    /// known. Returns whether the registry changed.
    ///
    /// `_source` is never sniffed, and a field's recorded type is never
    /// downgraded by later documents with a different raw shape.
    pub fn sniff(&self, doc: &Document) -> bool {
        let mut fields = self.fields.write();
        let mut changed = false;
        for (key, value) in doc {
            if key == "_source" {
                continue;
            }
            let Some(detected) = FieldType::infer(value) else {
                continue;
            };
            if !fields.contains_key(key) {
                fields.insert(key.clone(), detected);
                changed = true;
            }
        }
        drop(fields);
        if changed {
            self.generation.fetch_add(1, Ordering::SeqCst);
        }
        changed
    }

    /// Applies explicit Elasticsearch-style property overrides:
    /// `{field: {"type": "text" | "double" | ...}}`.
    ///
    /// Unlike sniffing, overrides unconditionally replace prior types.
    pub fn update(&self, properties: &Document) {
        let mut fields = self.fields.write();
        let mut changed = false;
        for (key, value) in properties {
            let Some(spec) = value.as_object() else {
                continue;
            };
            let type_name = spec.get("type").and_then(Value::as_str).unwrap_or("");
            let detected = FieldType::from_es_type(type_name);
            if fields.insert(key.clone(), detected) != Some(detected) {
                changed = true;
            }
        }
        drop(fields);
        if changed {
            self.generation.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Current snapshot, for persistence and the `_mapping` endpoint.
    pub fn snapshot(&self) -> BTreeMap<String, FieldType> {
        self.fields.read().clone()
    }

    pub fn field_type(&self, name: &str) -> Option<FieldType> {
        self.fields.read().get(name).copied()
    }

    /// Monotonic change counter. A reader holding a stale generation knows
    /// its derived schema needs a rebuild.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}

impl Default for Mapping {
    fn default() -> Self {
        Mapping::new()
    }
}
