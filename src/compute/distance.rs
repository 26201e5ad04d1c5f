/*
 * Copyright 2024 Vijaykumar Singh
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

//! Distance computation for vector indexes
//!
//! Every metric is expressed as a distance: lower values are closer.
//! - L2: Euclidean distance
//! - InnerProduct: `1 - <a, b>`
//! - Cosine: `1 - cos(a, b)`

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    /// Euclidean distance (L2 norm)
    L2,
    /// Inner product, reported as `1 - dot`
    InnerProduct,
    /// Cosine distance (1 - cosine similarity)
    Cosine,
}

impl MetricType {
    #[inline]
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        debug_assert_eq!(a.len(), b.len());
        match self {
            MetricType::L2 => l2_squared(a, b).sqrt(),
            MetricType::InnerProduct => 1.0 - dot_product(a, b),
            MetricType::Cosine => 1.0 - cosine_similarity(a, b),
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricType::L2 => write!(f, "L2"),
            MetricType::InnerProduct => write!(f, "InnerProduct"),
            MetricType::Cosine => write!(f, "Cosine"),
        }
    }
}

#[inline]
pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[inline]
pub fn l2_squared(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot = dot_product(a, b);
    let norm_a = dot_product(a, a).sqrt();
    let norm_b = dot_product(b, b).sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// Total order on distances; NaN ranks after every number and ties are
/// broken by id so rankings are deterministic
pub fn compare_ranked(a: (f32, u64), b: (f32, u64)) -> Ordering {
    let by_distance = match (a.0.is_nan(), b.0.is_nan()) {
        (false, false) => a.0.total_cmp(&b.0),
        (a_nan, b_nan) => a_nan.cmp(&b_nan),
    };
    by_distance.then_with(|| a.1.cmp(&b.1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nan_distances_rank_last() {
        let neg_nan = -f32::NAN;
        let mut ranked = vec![(f32::NAN, 1), (2.0, 2), (neg_nan, 0), (f32::INFINITY, 3), (0.5, 4)];
        ranked.sort_by(|a, b| compare_ranked(*a, *b));
        let ids: Vec<u64> = ranked.iter().map(|r| r.1).collect();
        assert_eq!(ids, vec![4, 2, 3, 0, 1]);

        // Consistent in both directions
        assert_eq!(compare_ranked((f32::NAN, 5), (1.0, 9)), Ordering::Greater);
        assert_eq!(compare_ranked((1.0, 9), (f32::NAN, 5)), Ordering::Less);
        assert_eq!(compare_ranked((f32::NAN, 5), (f32::NAN, 5)), Ordering::Equal);
    }

    #[test]
    fn test_cosine_distance() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        let c = vec![2.0, 0.0, 0.0];

        assert!((MetricType::Cosine.distance(&a, &b) - 1.0).abs() < 1e-6); // Orthogonal vectors
        assert!(MetricType::Cosine.distance(&a, &c).abs() < 1e-6); // Same direction
    }

    #[test]
    fn test_euclidean_distance() {
        let a = vec![0.0, 0.0];
        let b = vec![3.0, 4.0];

        assert!((MetricType::L2.distance(&a, &b) - 5.0).abs() < 1e-6); // 3-4-5 triangle
    }

    #[test]
    fn test_inner_product_distance() {
        let a = vec![1.0, 2.0, 3.0];
        let b = vec![4.0, 5.0, 6.0];

        // 1 - (1*4 + 2*5 + 3*6)
        assert!((MetricType::InnerProduct.distance(&a, &b) + 31.0).abs() < 1e-6);
    }

    #[test]
    fn test_compare_ranked_breaks_ties_by_id() {
        assert_eq!(compare_ranked((1.0, 2), (1.0, 5)), Ordering::Less);
        assert_eq!(compare_ranked((0.5, 9), (1.0, 1)), Ordering::Less);
    }
}
