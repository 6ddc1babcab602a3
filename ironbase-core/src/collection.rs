// collection.rs
// Document/collection layer (§4.6): a named container of documents within a
// database, with lazily-populated in-memory secondary indexes and
// synchronous change-stream emission. Collections are created implicitly by
// `Database` on first write; this type itself assumes its own namespace
// already belongs to it.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;

use crate::change_stream::{ChangeEvent, ChangeStream, EventKind};
use crate::document::{generate_doc_id, Document};
use crate::engine::LsmEngine;
use crate::error::{Error, Result};
use crate::query::{self, Plan};
use crate::secondary_index::SecondaryIndex;

fn doc_key(database: &str, collection: &str, id: &str) -> Vec<u8> {
    format!("db:{database}:collection:{collection}:doc:{id}").into_bytes()
}

fn doc_prefix(database: &str, collection: &str) -> Vec<u8> {
    format!("db:{database}:collection:{collection}:doc:").into_bytes()
}

fn vector_key(database: &str, collection: &str, id: &str) -> Vec<u8> {
    format!("db:{database}:vector:{collection}:{id}").into_bytes()
}

/// Upper bound for a `range_scan` over everything sharing `prefix`. Works
/// because every document/index key in this namespace is plain ASCII, all
/// strictly less than 0xFF.
fn prefix_upper_bound(prefix: &[u8]) -> Vec<u8> {
    let mut end = prefix.to_vec();
    end.push(0xFF);
    end
}

fn key_to_doc_id(key: &[u8]) -> String {
    String::from_utf8_lossy(key).rsplit(':').next().unwrap_or("").to_string()
}

pub struct Collection {
    engine: Arc<LsmEngine>,
    change_stream: ChangeStream,
    database: String,
    name: String,
    indexes: Mutex<HashMap<String, Arc<SecondaryIndex>>>,
    doc_locks: DashMap<String, Arc<Mutex<()>>>,
}

pub struct FindResult {
    pub documents: Vec<Value>,
    pub explanation: Option<query::Explanation>,
}

impl Collection {
    pub fn new(engine: Arc<LsmEngine>, change_stream: ChangeStream, database: &str, name: &str) -> Self {
        Collection {
            engine,
            change_stream,
            database: database.to_string(),
            name: name.to_string(),
            indexes: Mutex::new(HashMap::new()),
            doc_locks: DashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn engine(&self) -> &Arc<LsmEngine> {
        &self.engine
    }

    fn doc_lock(&self, id: &str) -> Arc<Mutex<()>> {
        self.doc_locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn key(&self, id: &str) -> Vec<u8> {
        doc_key(&self.database, &self.name, id)
    }

    pub fn insert(&self, data: Value) -> Result<Document> {
        if !data.is_object() {
            return Err(Error::validation("document must be a JSON object"));
        }
        let id = generate_doc_id();
        let doc = Document::new_inserted(data, id.clone());
        let lock = self.doc_lock(&id);
        let _guard = lock.lock();
        let bytes = doc.to_json_bytes()?;
        self.engine.put(&self.key(&id), &bytes)?;
        self.update_indexes_on_insert(&id, doc.as_value());
        self.emit(
            EventKind::Insert,
            Some(id),
            Some(doc.as_value().clone()),
            Vec::new(),
        );
        Ok(doc)
    }

    /// Shares one WAL commit across every document via `engine::put_batch`.
    pub fn insert_many(&self, items: Vec<Value>) -> Result<Vec<Document>> {
        let (docs, batch) = self.prepare_inserts(items)?;
        self.engine.put_batch(&batch)?;
        self.commit_prepared_inserts(&docs);
        Ok(docs)
    }

    /// Stamps `_id`/timestamps and JSON-encodes each item, without writing
    /// anything yet. Lets a caller (e.g. `VectorCollection::insert_batch`)
    /// fold these document-key writes into a larger `put_batch` alongside
    /// its own sibling keys, so the whole batch shares one WAL commit.
    pub(crate) fn prepare_inserts(&self, items: Vec<Value>) -> Result<(Vec<Document>, Vec<(Vec<u8>, Vec<u8>)>)> {
        let mut docs = Vec::with_capacity(items.len());
        let mut batch = Vec::with_capacity(items.len());
        for data in items {
            if !data.is_object() {
                return Err(Error::validation("document must be a JSON object"));
            }
            let id = generate_doc_id();
            let doc = Document::new_inserted(data, id);
            let bytes = doc.to_json_bytes()?;
            batch.push((self.key(doc.id()), bytes));
            docs.push(doc);
        }
        Ok((docs, batch))
    }

    /// Updates secondary indexes and emits `INSERT` events for documents
    /// already durably written via `prepare_inserts` + `put_batch`.
    pub(crate) fn commit_prepared_inserts(&self, docs: &[Document]) {
        for doc in docs {
            self.update_indexes_on_insert(doc.id(), doc.as_value());
            self.emit(
                EventKind::Insert,
                Some(doc.id().to_string()),
                Some(doc.as_value().clone()),
                Vec::new(),
            );
        }
    }

    pub fn find_by_id(&self, id: &str) -> Result<Option<Document>> {
        match self.engine.get(&self.key(id))? {
            Some(bytes) => Ok(Some(Document::from_json_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Runs the cost-based planner. When `explain` is set, returns the
    /// chosen plan without executing it (`documents` is empty in that case).
    pub fn find(&self, filter: &Value, limit: Option<usize>, explain: bool) -> Result<FindResult> {
        let indexed: Vec<String> = self.indexes.lock().keys().cloned().collect();
        let size = self.estimate_size()?;
        let (plan, explanation) = query::plan(filter, &indexed, size);

        if explain {
            return Ok(FindResult {
                documents: Vec::new(),
                explanation: Some(explanation),
            });
        }

        let candidate_ids: Option<Vec<String>> = match &plan {
            Plan::FullScan => None,
            Plan::IndexEq { field, value } => {
                let idx = self.indexes.lock().get(field).cloned();
                match idx {
                    Some(idx) => Some(idx.lookup(value)?),
                    None => None,
                }
            }
            Plan::IndexRange { field, start, end } => {
                let idx = self.indexes.lock().get(field).cloned();
                match idx {
                    Some(idx) => Some(idx.range_lookup(start, end)?),
                    None => None,
                }
            }
        };

        let mut out = Vec::new();
        match candidate_ids {
            Some(ids) => {
                for id in ids {
                    if let Some(bytes) = self.engine.get(&self.key(&id))? {
                        let value: Value = serde_json::from_slice(&bytes)?;
                        if query::matches_filter(&value, filter) {
                            out.push(value);
                            if limit.map(|l| out.len() >= l).unwrap_or(false) {
                                break;
                            }
                        }
                    }
                }
            }
            None => {
                let prefix = doc_prefix(&self.database, &self.name);
                let end = prefix_upper_bound(&prefix);
                for (_, bytes) in self.engine.range_scan(&prefix, &end)? {
                    let value: Value = serde_json::from_slice(&bytes)?;
                    if query::matches_filter(&value, filter) {
                        out.push(value);
                        if limit.map(|l| out.len() >= l).unwrap_or(false) {
                            break;
                        }
                    }
                }
            }
        }

        Ok(FindResult {
            documents: out,
            explanation: None,
        })
    }

    /// Read-modify-write, atomic with respect to `get`/`delete` on the same
    /// id via the per-document lock.
    pub fn update(&self, id: &str, patch: &Value) -> Result<Option<Document>> {
        let lock = self.doc_lock(id);
        let _guard = lock.lock();
        let mut doc = match self.find_by_id(id)? {
            Some(d) => d,
            None => return Ok(None),
        };
        let before = doc.as_value().clone();
        let changed = doc.apply_patch(patch);
        let bytes = doc.to_json_bytes()?;
        self.engine.put(&self.key(id), &bytes)?;
        self.update_indexes_on_update(id, &before, doc.as_value());
        self.emit(
            EventKind::Update,
            Some(id.to_string()),
            Some(doc.as_value().clone()),
            changed,
        );
        Ok(Some(doc))
    }

    /// Naive iterate-and-update; not transactional across documents.
    pub fn update_many(&self, filter: &Value, patch: &Value) -> Result<usize> {
        let ids = self.matching_ids(filter)?;
        let mut count = 0;
        for id in ids {
            if self.update(&id, patch)?.is_some() {
                count += 1;
            }
        }
        Ok(count)
    }

    pub fn delete(&self, id: &str) -> Result<bool> {
        let lock = self.doc_lock(id);
        let _guard = lock.lock();
        let doc = match self.find_by_id(id)? {
            Some(d) => d,
            None => return Ok(false),
        };
        self.engine.delete(&self.key(id))?;
        self.engine.delete(&vector_key(&self.database, &self.name, id))?;
        self.update_indexes_on_delete(id, doc.as_value());
        self.emit(EventKind::Delete, Some(id.to_string()), None, Vec::new());
        Ok(true)
    }

    pub fn delete_many(&self, filter: &Value) -> Result<usize> {
        let ids = self.matching_ids(filter)?;
        let mut count = 0;
        for id in ids {
            if self.delete(&id)? {
                count += 1;
            }
        }
        Ok(count)
    }

    pub fn count(&self, filter: &Value) -> Result<usize> {
        Ok(self.find(filter, None, false)?.documents.len())
    }

    fn matching_ids(&self, filter: &Value) -> Result<Vec<String>> {
        Ok(self
            .find(filter, None, false)?
            .documents
            .iter()
            .filter_map(|d| d.get("_id").and_then(Value::as_str).map(str::to_string))
            .collect())
    }

    /// Run a MongoDB-shaped aggregation pipeline (`$match`/`$group`/`$sort`/
    /// `$limit`/`$project`) over every document in this collection (§6).
    pub fn aggregate(&self, pipeline: &[Value]) -> Result<Vec<Value>> {
        let stages = crate::pipeline::parse_pipeline(pipeline)?;
        crate::pipeline::run(self, &stages)
    }

    /// Populate (or repopulate) an index on `field` via a full collection
    /// scan (§4.7).
    pub fn create_index(&self, field: &str) -> Result<()> {
        let index = Arc::new(SecondaryIndex::new(
            Arc::clone(&self.engine),
            &self.database,
            &self.name,
            field,
        ));
        let prefix = doc_prefix(&self.database, &self.name);
        let end = prefix_upper_bound(&prefix);
        let mut docs = Vec::new();
        for (key, bytes) in self.engine.range_scan(&prefix, &end)? {
            let id = key_to_doc_id(&key);
            let value: Value = serde_json::from_slice(&bytes)?;
            docs.push((id, value));
        }
        index.rebuild(docs)?;
        self.indexes.lock().insert(field.to_string(), index);
        Ok(())
    }

    fn estimate_size(&self) -> Result<u64> {
        let prefix = doc_prefix(&self.database, &self.name);
        let end = prefix_upper_bound(&prefix);
        Ok(self.engine.range_scan(&prefix, &end)?.len() as u64)
    }

    fn update_indexes_on_insert(&self, id: &str, doc: &Value) {
        let indexes = self.indexes.lock();
        for index in indexes.values() {
            if let Some(value) = crate::value_utils::get_nested_value(doc, index.field()) {
                if !value.is_null() {
                    let _ = index.add(id, value);
                }
            }
        }
    }

    fn update_indexes_on_update(&self, id: &str, before: &Value, after: &Value) {
        let indexes = self.indexes.lock();
        for index in indexes.values() {
            let old = crate::value_utils::get_nested_value(before, index.field()).cloned();
            let new = crate::value_utils::get_nested_value(after, index.field()).cloned();
            if old == new {
                continue;
            }
            if let Some(old) = old.filter(|v| !v.is_null()) {
                let _ = index.remove(id, &old);
            }
            if let Some(new) = new.filter(|v| !v.is_null()) {
                let _ = index.add(id, &new);
            }
        }
    }

    fn update_indexes_on_delete(&self, id: &str, doc: &Value) {
        let indexes = self.indexes.lock();
        for index in indexes.values() {
            if let Some(value) = crate::value_utils::get_nested_value(doc, index.field()) {
                if !value.is_null() {
                    let _ = index.remove(id, value);
                }
            }
        }
    }

    fn emit(&self, kind: EventKind, doc_id: Option<String>, document: Option<Value>, updated_fields: Vec<String>) {
        self.change_stream.emit(ChangeEvent {
            kind,
            database: self.database.clone(),
            collection: self.name.clone(),
            doc_id,
            document,
            updated_fields,
            timestamp: chrono::Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use serde_json::json;

    fn test_collection() -> (Collection, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(LsmEngine::open(dir.path(), Config::default()).unwrap());
        let collection = Collection::new(engine, ChangeStream::new(), "default", "users");
        (collection, dir)
    }

    #[test]
    fn insert_then_find_by_id_round_trips() {
        let (coll, _dir) = test_collection();
        let doc = coll.insert(json!({"name": "Alice", "age": 30})).unwrap();
        let found = coll.find_by_id(doc.id()).unwrap().unwrap();
        assert_eq!(found.get("name"), Some(&json!("Alice")));
    }

    #[test]
    fn find_filters_by_implicit_equality() {
        let (coll, _dir) = test_collection();
        coll.insert(json!({"city": "NYC"})).unwrap();
        coll.insert(json!({"city": "LA"})).unwrap();
        let result = coll.find(&json!({"city": "NYC"}), None, false).unwrap();
        assert_eq!(result.documents.len(), 1);
    }

    #[test]
    fn update_preserves_created_at_and_emits_changed_fields() {
        let (coll, _dir) = test_collection();
        let doc = coll.insert(json!({"name": "Alice", "age": 30})).unwrap();
        let updated = coll.update(doc.id(), &json!({"age": 31})).unwrap().unwrap();
        assert_eq!(updated.get("age"), Some(&json!(31)));
        assert_eq!(updated.get("_created_at"), doc.get("_created_at"));
    }

    #[test]
    fn delete_removes_document() {
        let (coll, _dir) = test_collection();
        let doc = coll.insert(json!({"name": "Alice"})).unwrap();
        assert!(coll.delete(doc.id()).unwrap());
        assert!(coll.find_by_id(doc.id()).unwrap().is_none());
        assert!(!coll.delete(doc.id()).unwrap());
    }

    #[test]
    fn create_index_then_find_uses_index_path() {
        let (coll, _dir) = test_collection();
        for i in 0..5 {
            coll.insert(json!({"city": if i == 0 { "NYC" } else { "LA" }})).unwrap();
        }
        coll.create_index("city").unwrap();
        let result = coll.find(&json!({"city": "NYC"}), None, false).unwrap();
        assert_eq!(result.documents.len(), 1);
    }

    #[test]
    fn index_stays_correct_after_update_changes_indexed_field() {
        let (coll, _dir) = test_collection();
        let doc = coll.insert(json!({"city": "NYC"})).unwrap();
        coll.create_index("city").unwrap();
        coll.update(doc.id(), &json!({"city": "LA"})).unwrap();
        assert_eq!(coll.find(&json!({"city": "NYC"}), None, false).unwrap().documents.len(), 0);
        assert_eq!(coll.find(&json!({"city": "LA"}), None, false).unwrap().documents.len(), 1);
    }

    #[test]
    fn explain_reports_plan_without_executing() {
        let (coll, _dir) = test_collection();
        coll.insert(json!({"city": "NYC"})).unwrap();
        let result = coll.find(&json!({"city": "NYC"}), None, true).unwrap();
        assert!(result.documents.is_empty());
        assert!(result.explanation.is_some());
    }

    #[test]
    fn aggregate_runs_match_group_sort() {
        let (coll, _dir) = test_collection();
        coll.insert(json!({"region": "east", "amount": 10})).unwrap();
        coll.insert(json!({"region": "east", "amount": 30})).unwrap();
        coll.insert(json!({"region": "west", "amount": 5})).unwrap();

        let result = coll
            .aggregate(&[
                json!({"$match": {"region": "east"}}),
                json!({"$sort": {"amount": -1}}),
                json!({"$limit": 1}),
            ])
            .unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0]["amount"], json!(30));
    }

    #[test]
    fn count_and_delete_many() {
        let (coll, _dir) = test_collection();
        for _ in 0..3 {
            coll.insert(json!({"tag": "a"})).unwrap();
        }
        coll.insert(json!({"tag": "b"})).unwrap();
        assert_eq!(coll.count(&json!({"tag": "a"})).unwrap(), 3);
        assert_eq!(coll.delete_many(&json!({"tag": "a"})).unwrap(), 3);
        assert_eq!(coll.count(&json!({})).unwrap(), 1);
    }
}
