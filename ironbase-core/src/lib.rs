// ironbase-core/src/lib.rs
// Embeddable document database core: LSM-tree key-value engine, a
// document/collection layer with secondary indexes and a query planner, an
// HNSW vector index, and a process-wide change stream.

#![allow(clippy::too_many_arguments)]
#![allow(clippy::should_implement_trait)]
#![allow(clippy::field_reassign_with_default)]
#![allow(clippy::result_large_err)]

pub mod cache;
pub mod catalog;
pub mod change_stream;
pub mod collection;
pub mod config;
pub mod document;
pub mod engine;
pub mod error;
pub mod memtable;
pub mod pipeline;
pub mod query;
pub mod secondary_index;
pub mod sstable;
pub mod value_utils;
pub mod vector;
pub mod wal;

pub use catalog::{Catalog, Database, DEFAULT_DATABASE};
pub use change_stream::{ChangeEvent, ChangeStream, ChangeWatcher, EventKind};
pub use collection::{Collection, FindResult};
pub use config::Config;
pub use document::Document;
pub use engine::{EngineStats, LsmEngine};
pub use error::{Error, Result};
pub use query::{Explanation, Plan};
pub use secondary_index::SecondaryIndex;
pub use vector::{DistanceMetric, Hnsw, HnswParams, HnswStats, VectorCollection};
