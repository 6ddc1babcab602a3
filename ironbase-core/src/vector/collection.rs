// vector/collection.rs
// Vector Collection (§4.9): a `Collection` paired with an HNSW index over a
// fixed-dimension vector stored alongside each document.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use crate::collection::Collection;
use crate::engine::LsmEngine;
use crate::error::{Error, Result};

use super::distance::DistanceMetric;
use super::hnsw::{Hnsw, HnswParams};
use super::persistence::{decode_vector, encode_vector, load_snapshot, save_snapshot_bytes};

fn vector_key(database: &str, collection: &str, id: &str) -> Vec<u8> {
    format!("db:{database}:vector:{collection}:{id}").into_bytes()
}

fn vector_prefix(database: &str, collection: &str) -> Vec<u8> {
    format!("db:{database}:vector:{collection}:").into_bytes()
}

fn prefix_upper_bound(prefix: &[u8]) -> Vec<u8> {
    let mut end = prefix.to_vec();
    end.push(0xFF);
    end
}

pub struct VectorCollection {
    collection: Arc<Collection>,
    engine: Arc<LsmEngine>,
    hnsw: RwLock<Hnsw>,
    dimension: AtomicUsize,
    inserts_since_snapshot: AtomicU64,
    snapshot_interval: u64,
    snapshot_base: PathBuf,
}

pub struct VectorSearchHit {
    pub doc_id: String,
    pub similarity: f32,
    pub document: Value,
}

impl VectorCollection {
    /// Open (or create) the index for `collection`. Loads a snapshot if one
    /// exists; otherwise starts empty and infers dimension from the first
    /// insert.
    pub fn open(collection: Arc<Collection>, params: HnswParams) -> Result<Self> {
        let engine = Arc::clone(collection.engine());
        let snapshot_base = engine
            .data_dir()
            .join(format!("vector_index_{}", collection.name()));

        let snapshot_interval = engine.config().vector_snapshot_interval as u64;
        let hnsw = load_snapshot(&snapshot_base)?.unwrap_or_else(|| Hnsw::new(params));
        let inferred_dimension = Self::infer_dimension_from_existing(&engine, collection.database(), collection.name())?;

        Ok(VectorCollection {
            collection,
            engine,
            hnsw: RwLock::new(hnsw),
            dimension: AtomicUsize::new(inferred_dimension.unwrap_or(0)),
            inserts_since_snapshot: AtomicU64::new(0),
            snapshot_interval,
            snapshot_base,
        })
    }

    fn infer_dimension_from_existing(engine: &LsmEngine, database: &str, collection: &str) -> Result<Option<usize>> {
        let prefix = vector_prefix(database, collection);
        let end = prefix_upper_bound(&prefix);
        let pairs = engine.range_scan(&prefix, &end)?;
        match pairs.first() {
            Some((_, bytes)) => Ok(Some(decode_vector(bytes)?.len())),
            None => Ok(None),
        }
    }

    pub fn dimension(&self) -> Option<usize> {
        let d = self.dimension.load(Ordering::Relaxed);
        if d == 0 {
            None
        } else {
            Some(d)
        }
    }

    fn check_or_establish_dimension(&self, vector: &[f32]) -> Result<()> {
        let current = self.dimension.load(Ordering::Relaxed);
        if current == 0 {
            self.dimension.store(vector.len(), Ordering::Relaxed);
            return Ok(());
        }
        if vector.len() != current {
            return Err(Error::validation(format!(
                "vector has dimension {}, collection is fixed at {}",
                vector.len(),
                current
            )));
        }
        Ok(())
    }

    fn vkey(&self, id: &str) -> Vec<u8> {
        vector_key(self.collection.database(), self.collection.name(), id)
    }

    /// Validates dimension, inserts the document, persists the vector, and
    /// adds it to the HNSW graph. A dimension mismatch is fatal to this
    /// single call only; no document or index state is touched.
    pub fn insert(&self, data: Value, vector: Vec<f32>) -> Result<String> {
        self.check_or_establish_dimension(&vector)?;
        let doc = self.collection.insert(data)?;
        let id = doc.id().to_string();
        self.engine.put(&self.vkey(&id), &encode_vector(&vector))?;
        self.hnsw.write().insert(id.clone(), vector);
        self.maybe_snapshot();
        Ok(id)
    }

    /// Validates every item's dimension up front (so a single bad vector
    /// never partially writes the batch), then builds the document-key and
    /// vector-key writes for every surviving item and hands both to one
    /// `engine::put_batch` call, mirroring `Collection::insert_many`.
    pub fn insert_batch(&self, items: Vec<(Value, Vec<f32>)>) -> Result<Vec<std::result::Result<String, String>>> {
        let mut results = Vec::with_capacity(items.len());
        let mut valid_data = Vec::new();
        let mut valid_vectors = Vec::new();
        for (data, vector) in items {
            if let Err(e) = self.check_or_establish_dimension(&vector) {
                results.push(Err(e.to_string()));
                continue;
            }
            if !data.is_object() {
                results.push(Err("document must be a JSON object".to_string()));
                continue;
            }
            valid_data.push(data);
            valid_vectors.push(vector);
        }

        if valid_data.is_empty() {
            self.maybe_snapshot();
            return Ok(results);
        }

        let (docs, mut batch) = self.collection.prepare_inserts(valid_data)?;
        for (doc, vector) in docs.iter().zip(valid_vectors.iter()) {
            batch.push((self.vkey(doc.id()), encode_vector(vector)));
        }
        self.engine.put_batch(&batch)?;
        self.collection.commit_prepared_inserts(&docs);

        {
            let mut hnsw = self.hnsw.write();
            for (doc, vector) in docs.iter().zip(valid_vectors.into_iter()) {
                hnsw.insert(doc.id().to_string(), vector);
            }
        }
        for doc in &docs {
            results.push(Ok(doc.id().to_string()));
        }

        self.maybe_snapshot();
        Ok(results)
    }

    pub fn delete(&self, doc_id: &str) -> Result<bool> {
        let existed = self.collection.delete(doc_id)?;
        if existed {
            self.hnsw.write().delete(doc_id);
        }
        Ok(existed)
    }

    /// Returns up to `k` hits ordered by descending similarity. `filter`,
    /// if given, drops candidates whose document does not match it (an
    /// over-fetch is not performed; quality tuning is left to the caller via
    /// `k`).
    pub fn search(&self, query: &[f32], k: usize, filter: Option<&Value>) -> Result<Vec<VectorSearchHit>> {
        if let Some(dim) = self.dimension() {
            if query.len() != dim {
                return Err(Error::validation(format!(
                    "query vector has dimension {}, collection is fixed at {}",
                    query.len(),
                    dim
                )));
            }
        }
        let raw_hits = self.hnsw.read().search(query, k);
        let hnsw_metric = self.metric();

        let mut out = Vec::with_capacity(raw_hits.len());
        for (doc_id, distance) in raw_hits {
            let document = match self.collection.find_by_id(&doc_id)? {
                Some(doc) => doc.into_value(),
                None => continue,
            };
            if let Some(f) = filter {
                if !crate::query::matches_filter(&document, f) {
                    continue;
                }
            }
            out.push(VectorSearchHit {
                doc_id,
                similarity: hnsw_metric.similarity(distance),
                document,
            });
        }
        Ok(out)
    }

    fn metric(&self) -> DistanceMetric {
        self.hnsw.read().params().metric
    }

    /// Drop the current in-memory index, rebuild from every stored vector
    /// key with (possibly new) parameters, and snapshot the result.
    pub fn build_hnsw_index(&self, m: Option<usize>, ef_construction: Option<usize>) -> Result<usize> {
        let old_params = self.hnsw.read().params().clone();
        let params = HnswParams {
            m: m.unwrap_or(old_params.m),
            m0: m.map(|m| m * 2).unwrap_or(old_params.m0),
            ef_construction: ef_construction.unwrap_or(old_params.ef_construction),
            metric: old_params.metric,
        };

        let prefix = vector_prefix(self.collection.database(), self.collection.name());
        let end = prefix_upper_bound(&prefix);
        let pairs = self.engine.range_scan(&prefix, &end)?;

        let mut fresh = Hnsw::new(params);
        let mut count = 0;
        for (key, bytes) in &pairs {
            let id = String::from_utf8_lossy(key).rsplit(':').next().unwrap_or("").to_string();
            let vector = decode_vector(bytes)?;
            fresh.insert(id, vector);
            count += 1;
        }

        *self.hnsw.write() = fresh;
        self.snapshot_now()?;
        Ok(count)
    }

    fn maybe_snapshot(&self) {
        let n = self.inserts_since_snapshot.fetch_add(1, Ordering::Relaxed) + 1;
        if n >= self.snapshot_interval {
            self.inserts_since_snapshot.store(0, Ordering::Relaxed);
            let bytes = match bincode::serialize(&*self.hnsw.read()) {
                Ok(b) => b,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to serialize hnsw snapshot, skipping");
                    return;
                }
            };
            let path = self.snapshot_base.clone();
            std::thread::spawn(move || {
                if let Err(e) = save_snapshot_bytes(&path, &bytes) {
                    tracing::warn!(error = %e, path = ?path, "background hnsw snapshot save failed");
                }
            });
        }
    }

    fn snapshot_now(&self) -> Result<()> {
        let bytes = bincode::serialize(&*self.hnsw.read())?;
        save_snapshot_bytes(&self.snapshot_base, &bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change_stream::ChangeStream;
    use crate::config::Config;
    use serde_json::json;

    fn test_vector_collection() -> (VectorCollection, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(LsmEngine::open(dir.path(), Config::default()).unwrap());
        let collection = Arc::new(Collection::new(engine, ChangeStream::new(), "default", "docs"));
        let params = HnswParams {
            m: 8,
            m0: 16,
            ef_construction: 32,
            metric: DistanceMetric::Cosine,
        };
        let vc = VectorCollection::open(collection, params).unwrap();
        (vc, dir)
    }

    #[test]
    fn insert_then_search_finds_self() {
        let (vc, _dir) = test_vector_collection();
        let id = vc.insert(json!({"name": "a"}), vec![1.0, 0.0, 0.0]).unwrap();
        let hits = vc.search(&[1.0, 0.0, 0.0], 1, None).unwrap();
        assert_eq!(hits[0].doc_id, id);
    }

    #[test]
    fn dimension_mismatch_is_rejected_without_corrupting_state() {
        let (vc, _dir) = test_vector_collection();
        vc.insert(json!({"name": "a"}), vec![1.0, 0.0, 0.0]).unwrap();
        let err = vc.insert(json!({"name": "b"}), vec![1.0, 0.0]);
        assert!(err.is_err());
        // Collection still has exactly the one good document.
        let hits = vc.search(&[1.0, 0.0, 0.0], 5, None).unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn delete_removes_from_search_results() {
        let (vc, _dir) = test_vector_collection();
        let id = vc.insert(json!({"name": "a"}), vec![1.0, 0.0, 0.0]).unwrap();
        vc.delete(&id).unwrap();
        let hits = vc.search(&[1.0, 0.0, 0.0], 5, None).unwrap();
        assert!(hits.iter().all(|h| h.doc_id != id));
    }

    #[test]
    fn search_applies_metadata_filter() {
        let (vc, _dir) = test_vector_collection();
        vc.insert(json!({"tag": "keep"}), vec![1.0, 0.0, 0.0]).unwrap();
        vc.insert(json!({"tag": "drop"}), vec![0.9, 0.1, 0.0]).unwrap();
        let hits = vc.search(&[1.0, 0.0, 0.0], 5, Some(&json!({"tag": "keep"}))).unwrap();
        assert!(hits.iter().all(|h| h.document.get("tag") == Some(&json!("keep"))));
    }

    #[test]
    fn build_hnsw_index_rebuilds_from_stored_vectors() {
        let (vc, _dir) = test_vector_collection();
        for i in 0..5 {
            vc.insert(json!({"i": i}), vec![i as f32, 0.0, 0.0]).unwrap();
        }
        let count = vc.build_hnsw_index(None, None).unwrap();
        assert_eq!(count, 5);
        let hits = vc.search(&[0.0, 0.0, 0.0], 5, None).unwrap();
        assert_eq!(hits.len(), 5);
    }
}
