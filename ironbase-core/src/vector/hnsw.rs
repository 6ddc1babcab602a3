// vector/hnsw.rs
// Hierarchical Navigable Small World graph (§4.8). In-memory multi-layer
// proximity graph keyed by an internal dense id, with a doc_id <-> internal
// id mapping at the edge so the rest of the system never has to think in
// internal ids. There is no Rust equivalent of `hnswlib` in the example
// corpus, so this is a from-scratch implementation of the algorithm
// description rather than a binding.

use std::collections::{BinaryHeap, HashMap, HashSet};

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::distance::DistanceMetric;

#[derive(Debug, Clone, Copy, PartialEq)]
struct OrderedDist(f32);

impl Eq for OrderedDist {}
impl Ord for OrderedDist {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.partial_cmp(&other.0).unwrap_or(std::cmp::Ordering::Equal)
    }
}
impl PartialOrd for OrderedDist {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Min-heap entry (nearest first).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct MinEntry(std::cmp::Reverse<OrderedDist>, usize);

/// Max-heap entry (farthest first) for bounding the result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct MaxEntry(OrderedDist, usize);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HnswParams {
    pub m: usize,
    pub m0: usize,
    pub ef_construction: usize,
    pub metric: DistanceMetric,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HnswStats {
    pub vector_count: usize,
    pub live_count: usize,
    pub max_layer: usize,
    pub m: usize,
    pub ef_construction: usize,
    pub metric: DistanceMetric,
}

/// Internal-id-keyed graph state. Serializable as-is for snapshotting;
/// `id_to_doc` is what the "mappings file from internal id to doc_id" in the
/// persisted-state layout refers to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hnsw {
    params: HnswParams,
    layers: Vec<HashMap<usize, Vec<usize>>>,
    vectors: Vec<Vec<f32>>,
    id_to_doc: Vec<String>,
    #[serde(skip)]
    doc_to_id: HashMap<String, usize>,
    deleted: HashSet<usize>,
    entry_point: Option<usize>,
    max_layer: usize,
}

impl Hnsw {
    pub fn new(params: HnswParams) -> Self {
        Hnsw {
            params,
            layers: vec![HashMap::new()],
            vectors: Vec::new(),
            id_to_doc: Vec::new(),
            doc_to_id: HashMap::new(),
            deleted: HashSet::new(),
            entry_point: None,
            max_layer: 0,
        }
    }

    pub fn params(&self) -> &HnswParams {
        &self.params
    }

    pub fn stats(&self) -> HnswStats {
        HnswStats {
            vector_count: self.vectors.len(),
            live_count: self.vectors.len() - self.deleted.len(),
            max_layer: self.max_layer,
            m: self.params.m,
            ef_construction: self.params.ef_construction,
            metric: self.params.metric,
        }
    }

    /// Rebuild the `doc_id -> internal id` lookup after deserializing from a
    /// snapshot (it is not itself persisted).
    pub fn rebuild_doc_index(&mut self) {
        self.doc_to_id = self
            .id_to_doc
            .iter()
            .enumerate()
            .filter(|(id, _)| !self.deleted.contains(id))
            .map(|(id, doc)| (doc.clone(), id))
            .collect();
    }

    fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        self.params.metric.distance(a, b)
    }

    /// Insert or replace (delete-then-reinsert) a vector under `doc_id`.
    pub fn insert(&mut self, doc_id: String, vector: Vec<f32>) {
        if self.doc_to_id.contains_key(&doc_id) {
            self.delete(&doc_id);
        }

        let id = self.vectors.len();
        self.vectors.push(vector.clone());
        self.id_to_doc.push(doc_id.clone());
        self.doc_to_id.insert(doc_id, id);

        if self.entry_point.is_none() {
            self.entry_point = Some(id);
            self.layers[0].entry(id).or_default();
            return;
        }

        let level = self.draw_level();
        while self.layers.len() <= level {
            self.layers.push(HashMap::new());
        }

        let mut current = self.entry_point.unwrap();
        for layer in (level + 1..=self.max_layer).rev() {
            let nearest = self.search_layer(&vector, &[current], 1, layer);
            if let Some((best, _)) = nearest.first() {
                current = *best;
            }
        }

        let mut entry_points = vec![current];
        for layer in (0..=level.min(self.max_layer)).rev() {
            let candidates = self.search_layer(&vector, &entry_points, self.params.ef_construction, layer);
            let limit = if layer == 0 { self.params.m0 } else { self.params.m };
            let neighbors: Vec<usize> = candidates.iter().take(limit).map(|(n, _)| *n).collect();

            self.layers[layer].entry(id).or_default().extend(neighbors.iter().copied());
            for &n in &neighbors {
                let entry = self.layers[layer].entry(n).or_default();
                entry.push(id);
                if entry.len() > limit {
                    self.prune_neighbor_list(layer, n, limit);
                }
            }

            entry_points = candidates.into_iter().map(|(n, _)| n).collect();
            if entry_points.is_empty() {
                entry_points = vec![current];
            }
        }

        if level > self.max_layer {
            self.max_layer = level;
            self.entry_point = Some(id);
        }
    }

    fn prune_neighbor_list(&mut self, layer: usize, node: usize, limit: usize) {
        let vector = self.vectors[node].clone();
        let entry = self.layers[layer].get_mut(&node).unwrap();
        let mut scored: Vec<(usize, f32)> = entry
            .iter()
            .copied()
            .map(|n| (n, self.params.metric.distance(&vector, &self.vectors[n])))
            .collect();
        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        *entry = scored.into_iter().map(|(n, _)| n).collect();
    }

    fn draw_level(&self) -> usize {
        let u: f64 = rand::thread_rng().gen_range(f64::EPSILON..1.0);
        let m_l = 1.0 / std::f64::consts::LN_2;
        let level = (-u.ln() * m_l).floor() as usize;
        level.min(self.max_layer + 1)
    }

    /// Beam search within a single layer: maintain a min-heap of candidates
    /// to expand and a bounded (size `num_to_return`) farthest-first result
    /// set, terminating once the best unexpanded candidate is farther than
    /// the worst retained result.
    fn search_layer(
        &self,
        query: &[f32],
        entry_points: &[usize],
        num_to_return: usize,
        layer: usize,
    ) -> Vec<(usize, f32)> {
        let mut visited: HashSet<usize> = entry_points.iter().copied().collect();
        let mut candidates: BinaryHeap<MinEntry> = BinaryHeap::new();
        let mut results: BinaryHeap<MaxEntry> = BinaryHeap::new();

        for &ep in entry_points {
            if self.deleted.contains(&ep) {
                continue;
            }
            let d = self.distance(query, &self.vectors[ep]);
            candidates.push(MinEntry(std::cmp::Reverse(OrderedDist(d)), ep));
            results.push(MaxEntry(OrderedDist(d), ep));
        }

        while let Some(MinEntry(std::cmp::Reverse(OrderedDist(cand_dist)), cand)) = candidates.pop() {
            if let Some(MaxEntry(OrderedDist(worst), _)) = results.peek() {
                if results.len() >= num_to_return && cand_dist > *worst {
                    break;
                }
            }

            let Some(neighbors) = self.layers[layer].get(&cand) else {
                continue;
            };
            for &n in neighbors {
                if !visited.insert(n) || self.deleted.contains(&n) {
                    continue;
                }
                let d = self.distance(query, &self.vectors[n]);
                let should_add = results.len() < num_to_return
                    || results.peek().map(|MaxEntry(OrderedDist(w), _)| d < *w).unwrap_or(true);
                if should_add {
                    candidates.push(MinEntry(std::cmp::Reverse(OrderedDist(d)), n));
                    results.push(MaxEntry(OrderedDist(d), n));
                    if results.len() > num_to_return {
                        results.pop();
                    }
                }
            }
        }

        let mut out: Vec<(usize, f32)> = results.into_iter().map(|MaxEntry(OrderedDist(d), id)| (id, d)).collect();
        out.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        out
    }

    /// Top-`k` nearest neighbors of `query`, ascending by distance.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(String, f32)> {
        let Some(mut current) = self.entry_point else {
            return Vec::new();
        };
        if self.deleted.contains(&current) {
            // Entry point was deleted without a replacement being picked
            // (shouldn't normally happen; `delete` always repicks one).
            return Vec::new();
        }

        for layer in (1..=self.max_layer).rev() {
            let nearest = self.search_layer(query, &[current], 1, layer);
            if let Some((best, _)) = nearest.first() {
                current = *best;
            }
        }

        let ef = self.params.ef_construction.max(k);
        let found = self.search_layer(query, &[current], ef, 0);
        found
            .into_iter()
            .take(k)
            .map(|(id, d)| (self.id_to_doc[id].clone(), d))
            .collect()
    }

    /// Logical delete: unbind the doc_id from the caller-visible map. The
    /// graph itself degrades gracefully until the next full rebuild (pure
    /// HNSW has no sound incremental delete).
    pub fn delete(&mut self, doc_id: &str) -> bool {
        let Some(&id) = self.doc_to_id.get(doc_id) else {
            return false;
        };
        self.doc_to_id.remove(doc_id);
        self.deleted.insert(id);

        if self.entry_point == Some(id) {
            self.entry_point = (0..self.vectors.len()).find(|i| !self.deleted.contains(i));
        }
        true
    }

    pub fn contains(&self, doc_id: &str) -> bool {
        self.doc_to_id.contains_key(doc_id)
    }

    pub fn len(&self) -> usize {
        self.doc_to_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doc_to_id.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> HnswParams {
        HnswParams {
            m: 8,
            m0: 16,
            ef_construction: 64,
            metric: DistanceMetric::Euclidean,
        }
    }

    #[test]
    fn insert_then_search_finds_self() {
        let mut hnsw = Hnsw::new(params());
        hnsw.insert("a".into(), vec![1.0, 0.0]);
        hnsw.insert("b".into(), vec![0.0, 1.0]);
        hnsw.insert("c".into(), vec![10.0, 10.0]);

        let results = hnsw.search(&[1.0, 0.0], 1);
        assert_eq!(results[0].0, "a");
    }

    #[test]
    fn search_returns_non_decreasing_distances() {
        let mut hnsw = Hnsw::new(params());
        for i in 0..50 {
            hnsw.insert(format!("id{i}"), vec![i as f32, 0.0]);
        }
        let results = hnsw.search(&[25.0, 0.0], 10);
        let distances: Vec<f32> = results.iter().map(|(_, d)| *d).collect();
        for w in distances.windows(2) {
            assert!(w[0] <= w[1] + 1e-6);
        }
    }

    #[test]
    fn delete_removes_from_results() {
        let mut hnsw = Hnsw::new(params());
        hnsw.insert("a".into(), vec![1.0, 0.0]);
        hnsw.insert("b".into(), vec![0.0, 1.0]);
        assert!(hnsw.delete("a"));
        assert!(!hnsw.contains("a"));
        let results = hnsw.search(&[1.0, 0.0], 5);
        assert!(results.iter().all(|(id, _)| id != "a"));
    }

    #[test]
    fn brute_force_recall_is_high_on_random_vectors() {
        let mut hnsw = Hnsw::new(HnswParams {
            m: 16,
            m0: 32,
            ef_construction: 200,
            metric: DistanceMetric::Cosine,
        });
        let mut rng = rand::thread_rng();
        let mut vectors = Vec::new();
        for i in 0..300 {
            let v: Vec<f32> = (0..16).map(|_| rng.gen_range(-1.0..1.0)).collect();
            hnsw.insert(format!("id{i}"), v.clone());
            vectors.push((format!("id{i}"), v));
        }

        let query = &vectors[0].1;
        let hnsw_top = hnsw.search(query, 10);
        let hnsw_ids: HashSet<&str> = hnsw_top.iter().map(|(id, _)| id.as_str()).collect();

        let mut brute: Vec<(String, f32)> = vectors
            .iter()
            .map(|(id, v)| (id.clone(), DistanceMetric::Cosine.distance(query, v)))
            .collect();
        brute.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
        let brute_ids: HashSet<&str> = brute.iter().take(10).map(|(id, _)| id.as_str()).collect();

        let overlap = hnsw_ids.intersection(&brute_ids).count();
        assert!(overlap >= 7, "expected high recall, got {overlap}/10 overlap");
    }
}
