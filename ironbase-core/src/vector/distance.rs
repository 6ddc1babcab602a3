// vector/distance.rs
// Distance metrics and the similarity mapping reported to callers (§4.8).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DistanceMetric {
    Cosine,
    Euclidean,
    DotProduct,
}

impl DistanceMetric {
    pub fn distance(self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            DistanceMetric::Cosine => cosine_distance(a, b),
            DistanceMetric::Euclidean => euclidean_distance(a, b),
            DistanceMetric::DotProduct => -dot(a, b),
        }
    }

    /// Map a raw distance to a caller-facing similarity in (roughly) [0, 1].
    pub fn similarity(self, distance: f32) -> f32 {
        match self {
            DistanceMetric::Cosine => 1.0 - distance,
            DistanceMetric::Euclidean => 1.0 / (1.0 + distance),
            // Dot-product distance is unbounded in both directions, so there
            // is no closed-form [0, 1] normalization; a logistic squash on
            // the underlying dot product is the mapping used here.
            DistanceMetric::DotProduct => 1.0 / (1.0 + distance.exp()),
        }
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn norm(a: &[f32]) -> f32 {
    dot(a, a).sqrt()
}

fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let denom = norm(a) * norm(b);
    if denom == 0.0 {
        return 1.0;
    }
    1.0 - (dot(a, b) / denom)
}

fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_identical_vectors_is_zero_distance() {
        let v = vec![1.0, 2.0, 3.0];
        let d = DistanceMetric::Cosine.distance(&v, &v);
        assert!(d.abs() < 1e-5);
    }

    #[test]
    fn euclidean_matches_known_value() {
        let a = vec![0.0, 0.0];
        let b = vec![3.0, 4.0];
        assert!((DistanceMetric::Euclidean.distance(&a, &b) - 5.0).abs() < 1e-5);
    }

    #[test]
    fn dot_product_distance_is_negative_dot() {
        let a = vec![1.0, 0.0];
        let b = vec![2.0, 0.0];
        assert!((DistanceMetric::DotProduct.distance(&a, &b) - (-2.0)).abs() < 1e-5);
    }

    #[test]
    fn similarity_is_monotonic_in_distance_for_euclidean() {
        let near = DistanceMetric::Euclidean.similarity(0.1);
        let far = DistanceMetric::Euclidean.similarity(5.0);
        assert!(near > far);
    }
}
