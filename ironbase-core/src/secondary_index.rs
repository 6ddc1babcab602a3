// secondary_index.rs
// Secondary index over the collection's flat keyspace (§4.7): a forward
// mapping (collection, field, value) -> [doc_id, ...], persisted as a JSON
// array under `db:<database>:index:<collection>:<field>:<value>`.
//
// The index only ever grows a picture of "who currently claims to have this
// value"; it is a pre-filter, never a correctness authority — callers always
// re-check the predicate against the loaded document (§4.6.2 step 3).

use std::sync::Arc;

use serde_json::Value;

use crate::engine::LsmEngine;
use crate::error::Result;

/// One secondary index on a single field of one collection.
pub struct SecondaryIndex {
    engine: Arc<LsmEngine>,
    database: String,
    collection: String,
    field: String,
}

fn encode_value_component(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl SecondaryIndex {
    pub fn new(engine: Arc<LsmEngine>, database: &str, collection: &str, field: &str) -> Self {
        SecondaryIndex {
            engine,
            database: database.to_string(),
            collection: collection.to_string(),
            field: field.to_string(),
        }
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    fn key_for(&self, value: &Value) -> Vec<u8> {
        format!(
            "db:{}:index:{}:{}:{}",
            self.database,
            self.collection,
            self.field,
            encode_value_component(value)
        )
        .into_bytes()
    }

    fn read_bucket(&self, key: &[u8]) -> Result<Vec<String>> {
        match self.engine.get(key)? {
            Some(bytes) => {
                let ids: Vec<String> = serde_json::from_slice(&bytes)?;
                Ok(ids)
            }
            None => Ok(Vec::new()),
        }
    }

    fn write_bucket(&self, key: &[u8], ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            self.engine.delete(key)
        } else {
            let bytes = serde_json::to_vec(ids)?;
            self.engine.put(key, &bytes)
        }
    }

    /// Record that `doc_id` now has `value` for this index's field.
    pub fn add(&self, doc_id: &str, value: &Value) -> Result<()> {
        let key = self.key_for(value);
        let mut ids = self.read_bucket(&key)?;
        if !ids.iter().any(|id| id == doc_id) {
            ids.push(doc_id.to_string());
            self.write_bucket(&key, &ids)?;
        }
        Ok(())
    }

    /// Remove `doc_id` from the bucket for `value`. A no-op if absent,
    /// consistent with §4.6's "unconditional" deletion semantics.
    pub fn remove(&self, doc_id: &str, value: &Value) -> Result<()> {
        let key = self.key_for(value);
        let mut ids = self.read_bucket(&key)?;
        let before = ids.len();
        ids.retain(|id| id != doc_id);
        if ids.len() != before {
            self.write_bucket(&key, &ids)?;
        }
        Ok(())
    }

    pub fn lookup(&self, value: &Value) -> Result<Vec<String>> {
        self.read_bucket(&self.key_for(value))
    }

    /// Range lookup over the index keyspace. Bucket values are compared as
    /// the encoded key component, so it is accurate for strings and for
    /// numbers of uniform digit width; mixed-width numeric ranges are a
    /// known limitation of the flat-key scheme (documented, not solved here).
    pub fn range_lookup(&self, start: &Value, end: &Value) -> Result<Vec<String>> {
        let start_key = self.key_for(start);
        let end_key = self.key_for(end);
        let pairs = self.engine.range_scan(&start_key, &end_key)?;
        let mut out = Vec::new();
        for (_, bytes) in pairs {
            let ids: Vec<String> = serde_json::from_slice(&bytes)?;
            out.extend(ids);
        }
        Ok(out)
    }

    /// Populate this index from scratch by scanning every live document in
    /// the collection and indexing `field` where present and non-null.
    pub fn rebuild(&self, documents: impl IntoIterator<Item = (String, Value)>) -> Result<()> {
        for (doc_id, doc) in documents {
            if let Some(value) = crate::value_utils::get_nested_value(&doc, &self.field) {
                if !value.is_null() {
                    self.add(&doc_id, value)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use serde_json::json;

    fn test_engine() -> (Arc<LsmEngine>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let engine = LsmEngine::open(dir.path(), Config::default()).unwrap();
        (Arc::new(engine), dir)
    }

    #[test]
    fn add_then_lookup_finds_doc() {
        let (engine, _dir) = test_engine();
        let idx = SecondaryIndex::new(engine, "default", "users", "city");
        idx.add("doc1", &json!("NYC")).unwrap();
        idx.add("doc2", &json!("NYC")).unwrap();
        idx.add("doc3", &json!("LA")).unwrap();

        let mut ids = idx.lookup(&json!("NYC")).unwrap();
        ids.sort();
        assert_eq!(ids, vec!["doc1".to_string(), "doc2".to_string()]);
    }

    #[test]
    fn remove_drops_doc_from_bucket() {
        let (engine, _dir) = test_engine();
        let idx = SecondaryIndex::new(engine, "default", "users", "city");
        idx.add("doc1", &json!("NYC")).unwrap();
        idx.add("doc2", &json!("NYC")).unwrap();
        idx.remove("doc1", &json!("NYC")).unwrap();
        assert_eq!(idx.lookup(&json!("NYC")).unwrap(), vec!["doc2".to_string()]);
    }

    #[test]
    fn remove_last_entry_deletes_bucket_key() {
        let (engine, _dir) = test_engine();
        let idx = SecondaryIndex::new(engine, "default", "users", "city");
        idx.add("doc1", &json!("NYC")).unwrap();
        idx.remove("doc1", &json!("NYC")).unwrap();
        assert!(idx.lookup(&json!("NYC")).unwrap().is_empty());
        assert!(engine.get(&idx.key_for(&json!("NYC"))).unwrap().is_none());
    }

    #[test]
    fn rebuild_indexes_existing_documents() {
        let (engine, _dir) = test_engine();
        let idx = SecondaryIndex::new(engine, "default", "users", "city");
        idx.rebuild(vec![
            ("doc1".to_string(), json!({"city": "NYC"})),
            ("doc2".to_string(), json!({"city": "LA"})),
            ("doc3".to_string(), json!({"other": "field"})),
        ])
        .unwrap();
        assert_eq!(idx.lookup(&json!("NYC")).unwrap(), vec!["doc1".to_string()]);
        assert_eq!(idx.lookup(&json!("LA")).unwrap(), vec!["doc2".to_string()]);
    }
}
