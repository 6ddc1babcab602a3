// catalog.rs
// Database/Catalog (§2 item 10, §9): groups collections under a database
// name and lists/drops by key-prefix enumeration. The engine and the
// change-stream multiplexer are process-wide and shared across every
// `Database` handle a `Catalog` hands out, rather than owned per-database.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::change_stream::{ChangeEvent, ChangeStream, EventKind};
use crate::collection::Collection;
use crate::config::Config;
use crate::engine::LsmEngine;
use crate::error::{Error, Result};
use crate::vector::{HnswParams, VectorCollection};

/// Name reserved for the implicit default database; dropping it is rejected.
pub const DEFAULT_DATABASE: &str = "default";

fn validate_name(name: &str) -> Result<()> {
    if name.contains(':') {
        return Err(Error::validation(format!(
            "name {name:?} must not contain the colon character"
        )));
    }
    Ok(())
}

fn database_prefix(database: &str) -> Vec<u8> {
    format!("db:{database}:").into_bytes()
}

fn collection_prefix(database: &str, collection: &str) -> Vec<u8> {
    format!("db:{database}:collection:{collection}:").into_bytes()
}

fn vector_collection_prefix(database: &str, collection: &str) -> Vec<u8> {
    format!("db:{database}:vector:{collection}:").into_bytes()
}

fn index_collection_prefix(database: &str, collection: &str) -> Vec<u8> {
    format!("db:{database}:index:{collection}:").into_bytes()
}

fn prefix_upper_bound(prefix: &[u8]) -> Vec<u8> {
    let mut end = prefix.to_vec();
    end.push(0xFF);
    end
}

/// Owns the one shared engine and change stream for a process, and hands
/// out `Database` handles over it.
pub struct Catalog {
    engine: Arc<LsmEngine>,
    change_stream: ChangeStream,
}

impl Catalog {
    pub fn open(data_dir: impl Into<std::path::PathBuf>, config: Config) -> Result<Self> {
        let engine = Arc::new(LsmEngine::open(data_dir, config)?);
        Ok(Catalog {
            engine,
            change_stream: ChangeStream::new(),
        })
    }

    pub fn change_stream(&self) -> &ChangeStream {
        &self.change_stream
    }

    pub fn engine(&self) -> &Arc<LsmEngine> {
        &self.engine
    }

    pub fn database(&self, name: &str) -> Result<Database> {
        validate_name(name)?;
        Ok(Database::new(Arc::clone(&self.engine), self.change_stream.clone(), name))
    }

    pub fn default_database(&self) -> Database {
        Database::new(Arc::clone(&self.engine), self.change_stream.clone(), DEFAULT_DATABASE)
    }

    /// Enumerate every database name that currently owns at least one key,
    /// by prefix-scanning the whole keyspace. `default` is always listed
    /// even if empty, since it is implicit.
    pub fn list_databases(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self
            .engine
            .range_scan(b"db:", b"db:\xFF")?
            .into_iter()
            .filter_map(|(key, _)| {
                let s = String::from_utf8_lossy(&key);
                s.strip_prefix("db:")?.split(':').next().map(str::to_string)
            })
            .collect();
        names.sort();
        names.dedup();
        if !names.iter().any(|n| n == DEFAULT_DATABASE) {
            names.push(DEFAULT_DATABASE.to_string());
        }
        Ok(names)
    }

    /// Drop every key under `db:<name>:`. Rejects the reserved default
    /// database name.
    pub fn drop_database(&self, name: &str) -> Result<()> {
        if name == DEFAULT_DATABASE {
            return Err(Error::validation("the default database cannot be dropped"));
        }
        let prefix = database_prefix(name);
        let end = prefix_upper_bound(&prefix);
        for (key, _) in self.engine.range_scan(&prefix, &end)? {
            self.engine.delete(&key)?;
        }
        Ok(())
    }
}

/// One named grouping of collections, backed by the shared engine. Caches
/// `Collection`/`VectorCollection` handles so repeated lookups share the
/// same in-memory secondary indexes and HNSW state.
pub struct Database {
    engine: Arc<LsmEngine>,
    change_stream: ChangeStream,
    name: String,
    collections: Mutex<HashMap<String, Arc<Collection>>>,
    vector_collections: Mutex<HashMap<String, Arc<VectorCollection>>>,
}

impl Database {
    fn new(engine: Arc<LsmEngine>, change_stream: ChangeStream, name: &str) -> Self {
        Database {
            engine,
            change_stream,
            name: name.to_string(),
            collections: Mutex::new(HashMap::new()),
            vector_collections: Mutex::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Collections are created implicitly on first access.
    pub fn collection(&self, name: &str) -> Result<Arc<Collection>> {
        validate_name(name)?;
        let mut collections = self.collections.lock();
        if let Some(existing) = collections.get(name) {
            return Ok(Arc::clone(existing));
        }
        let collection = Arc::new(Collection::new(
            Arc::clone(&self.engine),
            self.change_stream.clone(),
            &self.name,
            name,
        ));
        collections.insert(name.to_string(), Arc::clone(&collection));
        Ok(collection)
    }

    /// Opens (creating if absent) a vector collection backed by `collection`.
    /// `params` is only used the first time this collection's HNSW index is
    /// built in this process; later calls reuse the cached index.
    pub fn vector_collection(&self, name: &str, params: HnswParams) -> Result<Arc<VectorCollection>> {
        let mut vector_collections = self.vector_collections.lock();
        if let Some(existing) = vector_collections.get(name) {
            return Ok(Arc::clone(existing));
        }
        let collection = self.collection(name)?;
        let vc = Arc::new(VectorCollection::open(collection, params)?);
        vector_collections.insert(name.to_string(), Arc::clone(&vc));
        Ok(vc)
    }

    pub fn list_collections(&self) -> Result<Vec<String>> {
        let prefix = format!("db:{}:collection:", self.name).into_bytes();
        let end = prefix_upper_bound(&prefix);
        let prefix_str = String::from_utf8_lossy(&prefix).into_owned();
        let mut names: Vec<String> = self
            .engine
            .range_scan(&prefix, &end)?
            .into_iter()
            .filter_map(|(key, _)| {
                let s = String::from_utf8_lossy(&key);
                let rest = s.strip_prefix(&prefix_str)?;
                rest.split(':').next().map(str::to_string)
            })
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    /// Drop every document, index, and vector key belonging to `collection`,
    /// evict any cached handle, and emit a `DROP_COLLECTION` event.
    pub fn drop_collection(&self, name: &str) -> Result<()> {
        for prefix in [
            collection_prefix(&self.name, name),
            vector_collection_prefix(&self.name, name),
            index_collection_prefix(&self.name, name),
        ] {
            let end = prefix_upper_bound(&prefix);
            for (key, _) in self.engine.range_scan(&prefix, &end)? {
                self.engine.delete(&key)?;
            }
        }
        self.collections.lock().remove(name);
        self.vector_collections.lock().remove(name);
        self.change_stream.emit(ChangeEvent {
            kind: EventKind::DropCollection,
            database: self.name.clone(),
            collection: name.to_string(),
            doc_id: None,
            document: None,
            updated_fields: Vec::new(),
            timestamp: chrono::Utc::now(),
        });
        Ok(())
    }
}
