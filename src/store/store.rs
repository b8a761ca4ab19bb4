//! Durable single-shard document store: WAL + searchable tantivy index.
//!
//! Writes append to the log first and touch the searchable index second;
//! both steps happen under the shard's write mutex, so per-shard commit
//! order equals log order. Reads go straight to the index reader without
//! the mutex.

use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tantivy::collector::{Count, TopDocs};
use tantivy::directory::MmapDirectory;
use tantivy::query::{AllQuery, BooleanQuery, Occur, QueryParser, TermQuery};
use tantivy::schema::{Field, IndexRecordOption, Schema, Value as _, STORED, STRING, TEXT};
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy, Term};

use crate::error::{Error, Result};
use crate::models::{Document, Hit, Query, SearchRequest, SearchResult};

/// Name of the engine directory inside a shard.
const ENGINE_DIR: &str = "tantivy";
/// Name of the log directory inside a shard.
const WAL_DIR: &str = "wal";
/// Stored field carrying the verbatim JSON of the original document.
const SOURCE_FIELD: &str = "_source";
/// Indexed catch-all over every document value, the default search target.
const ALL_FIELD: &str = "_all";
/// Dynamic JSON field holding the document body for field-scoped queries.
const BODY_FIELD: &str = "doc";

use super::wal::Wal;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    #[serde(rename = "INDEX")]
    Index,
    #[serde(rename = "DELETE")]
    Delete,
}

/// One WAL record. `data` is present for INDEX and absent for DELETE.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub op: Operation,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Document>,
}

#[derive(Clone, Copy)]
struct StoreFields {
    id: Field,
    source: Field,
    all: Field,
    body: Field,
}

struct StoreInner {
    wal: Wal,
    writer: IndexWriter,
}

/// A single shard's document store.
pub struct Store {
    index: Index,
    reader: IndexReader,
    fields: StoreFields,
    inner: Mutex<StoreInner>,
    path: PathBuf,
}

impl Store {
    /// Opens the store at `path`, creating it if needed, and replays the WAL
    /// into the searchable index.
    pub fn open(path: &Path, sync_writes: bool) -> Result<Store> {
        fs::create_dir_all(path)?;

        let engine_path = path.join(ENGINE_DIR);
        fs::create_dir_all(&engine_path)?;

        let mut schema_builder = Schema::builder();
        let fields = StoreFields {
            id: schema_builder.add_text_field("_id", STRING | STORED),
            source: schema_builder.add_text_field(SOURCE_FIELD, STORED),
            all: schema_builder.add_text_field(ALL_FIELD, TEXT),
            body: schema_builder.add_json_field(BODY_FIELD, TEXT),
        };
        let schema = schema_builder.build();

        let dir = MmapDirectory::open(&engine_path)
            .map_err(|e| Error::Storage(format!("open engine dir: {}", e)))?;
        let index = Index::open_or_create(dir, schema)?;
        let writer = index.writer_with_num_threads(1, 15_000_000)?;
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;

        let wal = Wal::open(&path.join(WAL_DIR), sync_writes)?;

        let store = Store {
            index,
            reader,
            fields,
            inner: Mutex::new(StoreInner { wal, writer }),
            path: path.to_path_buf(),
        };
        store.replay()?;
        Ok(store)
    }

    /// Replays the whole log into the searchable index.
    ///
    /// The index is a materialised view that may lag the log after a crash;
    /// INDEX entries re-apply as upserts and DELETE of a missing id is a
    /// no-op, so replay converges regardless of how far the view lagged.
    /// Entries that fail to decode are treated as torn writes and skipped.
    fn replay(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        let last = inner.wal.last_index();
        if last == 0 {
            return Ok(());
        }
        let first = inner.wal.first_index();

        let mut applied = 0u64;
        for i in first..=last {
            let payload = inner.wal.read(i)?;
            let entry: LogEntry = match serde_json::from_slice(&payload) {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(
                        "Skipping undecodable WAL entry {} in {}: {}",
                        i,
                        self.path.display(),
                        e
                    );
                    continue;
                }
            };
            match entry.op {
                Operation::Index => {
                    let data = entry.data.unwrap_or_default();
                    self.upsert(&mut inner.writer, &entry.id, &data)?;
                }
                Operation::Delete => {
                    inner
                        .writer
                        .delete_term(Term::from_field_text(self.fields.id, &entry.id));
                }
            }
            applied += 1;
        }

        inner.writer.commit()?;
        drop(inner);
        self.reader.reload()?;
        tracing::debug!(
            "Replayed {} WAL entries for shard {}",
            applied,
            self.path.display()
        );
        Ok(())
    }

    /// Indexes one document: augment with `_source`, append to the WAL, then
    /// apply to the searchable index. The index is not touched if the log
    /// append fails.
    pub fn index(&self, id: &str, mut doc: Document) -> Result<()> {
        let source = serde_json::to_string(&doc)?;
        doc.insert(SOURCE_FIELD.to_string(), Value::String(source));

        let entry = LogEntry {
            op: Operation::Index,
            id: id.to_string(),
            data: Some(doc),
        };
        let payload = serde_json::to_vec(&entry)?;
        let doc = entry.data.unwrap_or_default();

        let mut inner = self.inner.lock();
        inner.wal.append(&payload)?;
        self.upsert(&mut inner.writer, id, &doc)?;
        inner.writer.commit()?;
        drop(inner);
        self.reader.reload()?;
        Ok(())
    }

    /// Indexes a batch: every entry is appended to the WAL in input order,
    /// then the whole batch is applied to the searchable index under one
    /// commit. Later entries for the same id win.
    pub fn batch_index(&self, ids: Vec<String>, docs: Vec<Document>) -> Result<()> {
        if ids.len() != docs.len() {
            return Err(Error::InvalidRequest(format!(
                "batch id/document count mismatch: {} vs {}",
                ids.len(),
                docs.len()
            )));
        }

        let mut inner = self.inner.lock();
        let mut augmented = Vec::with_capacity(ids.len());
        for (id, mut doc) in ids.iter().zip(docs) {
            let source = serde_json::to_string(&doc)?;
            doc.insert(SOURCE_FIELD.to_string(), Value::String(source));
            let entry = LogEntry {
                op: Operation::Index,
                id: id.clone(),
                data: Some(doc),
            };
            inner.wal.append(&serde_json::to_vec(&entry)?)?;
            augmented.push(entry.data.unwrap_or_default());
        }
        for (id, doc) in ids.iter().zip(&augmented) {
            self.upsert(&mut inner.writer, id, doc)?;
        }
        inner.writer.commit()?;
        drop(inner);
        self.reader.reload()?;
        Ok(())
    }

    /// Removes a document: append DELETE to the WAL, then delete from the
    /// searchable index.
    pub fn delete(&self, id: &str) -> Result<()> {
        let entry = LogEntry {
            op: Operation::Delete,
            id: id.to_string(),
            data: None,
        };
        let payload = serde_json::to_vec(&entry)?;

        let mut inner = self.inner.lock();
        inner.wal.append(&payload)?;
        inner
            .writer
            .delete_term(Term::from_field_text(self.fields.id, id));
        inner.writer.commit()?;
        drop(inner);
        self.reader.reload()?;
        Ok(())
    }

    /// Resolves a document by id and decodes its stored `_source`.
    /// Returns `None` when the id is absent.
    pub fn get(&self, id: &str) -> Result<Option<Document>> {
        let term = Term::from_field_text(self.fields.id, id);
        let query = TermQuery::new(term, IndexRecordOption::Basic);
        let searcher = self.reader.searcher();
        let top = searcher.search(&query, &TopDocs::with_limit(1))?;
        let Some(&(_, addr)) = top.first() else {
            return Ok(None);
        };

        let stored = searcher.doc::<tantivy::TantivyDocument>(addr)?;
        let Some(source) = stored
            .get_first(self.fields.source)
            .and_then(|v| v.as_str())
        else {
            return Err(Error::Storage(format!(
                "document {} is missing its stored _source",
                id
            )));
        };
        let doc: Document = serde_json::from_str(source)?;
        Ok(Some(doc))
    }

    /// Runs a query against this shard and returns its top `window` hits
    /// with an exact total.
    pub fn search(&self, req: &SearchRequest) -> Result<SearchResult> {
        let query = self.build_query(&req.query)?;
        let searcher = self.reader.searcher();
        let (total, top) =
            searcher.search(&*query, &(Count, TopDocs::with_limit(req.window())))?;

        let want_source = req.fields.iter().any(|f| f == SOURCE_FIELD);
        let mut hits = Vec::with_capacity(top.len());
        let mut max_score: Option<f32> = None;
        for (score, addr) in top {
            let stored = searcher.doc::<tantivy::TantivyDocument>(addr)?;
            let id = stored
                .get_first(self.fields.id)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            let mut fields = Document::new();
            if want_source {
                if let Some(source) = stored
                    .get_first(self.fields.source)
                    .and_then(|v| v.as_str())
                {
                    fields.insert(
                        SOURCE_FIELD.to_string(),
                        Value::String(source.to_string()),
                    );
                }
            }
            max_score = Some(max_score.map_or(score, |m| m.max(score)));
            hits.push(Hit { id, score, fields });
        }

        Ok(SearchResult {
            total: total as u64,
            max_score,
            hits,
        })
    }

    /// Number of live documents in the searchable index.
    pub fn doc_count(&self) -> u64 {
        self.reader.searcher().num_docs()
    }

    /// Flushes pending engine state and syncs the log.
    pub fn close(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.writer.commit()?;
        inner.wal.sync()?;
        Ok(())
    }

    /// Delete-then-add so both fresh writes and replay behave as upserts.
    fn upsert(&self, writer: &mut IndexWriter, id: &str, doc: &Document) -> Result<()> {
        writer.delete_term(Term::from_field_text(self.fields.id, id));
        writer.add_document(self.engine_doc(id, doc))?;
        Ok(())
    }

    fn engine_doc(&self, id: &str, doc: &Document) -> tantivy::TantivyDocument {
        let mut body = doc.clone();
        let source = body.remove(SOURCE_FIELD);

        let mut engine_doc = tantivy::TantivyDocument::default();
        engine_doc.add_text(self.fields.id, id);
        if let Some(Value::String(source)) = source {
            engine_doc.add_text(self.fields.source, &source);
        }

        let mut all = Vec::new();
        for value in body.values() {
            collect_text(value, &mut all);
        }
        engine_doc.add_text(self.fields.all, &all.join(" "));
        let body: std::collections::BTreeMap<String, tantivy::schema::OwnedValue> = body
            .into_iter()
            .map(|(k, v)| (k, tantivy::schema::OwnedValue::from(v)))
            .collect();
        engine_doc.add_object(self.fields.body, body);
        engine_doc
    }

    fn build_query(&self, query: &Query) -> Result<Box<dyn tantivy::query::Query>> {
        match query {
            Query::MatchAll => Ok(Box::new(AllQuery)),
            Query::QueryString { query } => self.parse(query),
            Query::Match { field, query } => {
                // Address the field explicitly inside the JSON body so the
                // lookup never depends on schema field resolution.
                let escaped = query.replace('"', "\\\"");
                self.parse(&format!("{}.{}:\"{}\"", BODY_FIELD, field, escaped))
            }
            Query::Bool { must } => {
                let mut clauses = Vec::with_capacity(must.len());
                for sub in must {
                    clauses.push((Occur::Must, self.build_query(sub)?));
                }
                Ok(Box::new(BooleanQuery::new(clauses)))
            }
        }
    }

    fn parse(&self, input: &str) -> Result<Box<dyn tantivy::query::Query>> {
        let parser =
            QueryParser::for_index(&self.index, vec![self.fields.all, self.fields.body]);
        parser
            .parse_query(input)
            .map_err(|e| Error::InvalidRequest(format!("bad query {:?}: {}", input, e)))
    }
}

/// Flattens every scalar in a JSON value into searchable text.
fn collect_text(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => out.push(s.clone()),
        Value::Number(n) => out.push(n.to_string()),
        Value::Bool(b) => out.push(b.to_string()),
        Value::Array(items) => {
            for item in items {
                collect_text(item, out);
            }
        }
        Value::Object(map) => {
            for item in map.values() {
                collect_text(item, out);
            }
        }
        Value::Null => {}
    }
}
