// vector/mod.rs
// Vector search (§4.8-4.9): an HNSW index layered over a regular
// collection's documents.

pub mod collection;
pub mod distance;
pub mod hnsw;
pub mod persistence;

pub use collection::VectorCollection;
pub use distance::DistanceMetric;
pub use hnsw::{Hnsw, HnswParams, HnswStats};
