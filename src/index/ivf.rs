// Copyright 2025 ProximaDB
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.

//! IVF-Flat: vectors partitioned into inverted lists around k-means
//! centroids, searched by probing the `nprobe` closest lists.
//!
//! Until trained the index keeps vectors in a pending list and answers
//! searches exactly.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use super::{check_query, checked_vectors, IdFilter, TopK, VectorIndex};
use crate::compute::distance::{l2_squared, MetricType};
use crate::core::error::{Result, VectorIndexError};
use crate::core::types::{IndexParameter, VectorId, VectorWithId};

const KMEANS_ITERATIONS: usize = 12;

#[derive(Debug, Default, Serialize, Deserialize)]
struct IvfData {
    centroids: Vec<Vec<f32>>,
    lists: Vec<HashMap<VectorId, Vec<f32>>>,
    /// Which inverted list holds each id
    assignments: HashMap<VectorId, usize>,
    pending: HashMap<VectorId, Vec<f32>>,
    deleted_since_train: usize,
}

impl IvfData {
    fn is_trained(&self) -> bool {
        !self.centroids.is_empty()
    }

    fn nearest_list(&self, vector: &[f32]) -> usize {
        let mut best = 0;
        let mut best_distance = f32::INFINITY;
        for (i, centroid) in self.centroids.iter().enumerate() {
            let d = l2_squared(vector, centroid);
            if d < best_distance {
                best_distance = d;
                best = i;
            }
        }
        best
    }

    fn remove(&mut self, id: VectorId) -> bool {
        if let Some(list) = self.assignments.remove(&id) {
            self.lists[list].remove(&id);
            return true;
        }
        self.pending.remove(&id).is_some()
    }

    fn insert(&mut self, id: VectorId, vector: Vec<f32>) {
        self.remove(id);
        if self.is_trained() {
            let list = self.nearest_list(&vector);
            self.lists[list].insert(id, vector);
            self.assignments.insert(id, list);
        } else {
            self.pending.insert(id, vector);
        }
    }

    fn len(&self) -> usize {
        self.assignments.len() + self.pending.len()
    }
}

pub struct IvfFlatIndex {
    parameter: IndexParameter,
    nlist: usize,
    nprobe: usize,
    data: RwLock<IvfData>,
}

impl IvfFlatIndex {
    pub fn new(parameter: IndexParameter) -> Self {
        let (nlist, nprobe) = match &parameter {
            IndexParameter::IvfFlat { nlist, nprobe, .. } => (*nlist, *nprobe),
            IndexParameter::Flat { .. } => (1, 1),
        };
        Self {
            parameter,
            nlist: nlist.max(1),
            nprobe: nprobe.max(1),
            data: RwLock::new(IvfData::default()),
        }
    }

    pub fn deserialize(parameter: IndexParameter, bytes: &[u8]) -> Result<Self> {
        let data: IvfData = bincode::deserialize(bytes)
            .map_err(|e| VectorIndexError::Corrupt(format!("ivf index payload: {}", e)))?;
        if data.centroids.len() != data.lists.len()
            || data.assignments.values().any(|&list| list >= data.lists.len())
        {
            return Err(VectorIndexError::Corrupt(
                "ivf index lists do not match centroids".to_string(),
            ));
        }
        let index = Self::new(parameter);
        *index.data.write() = data;
        Ok(index)
    }

    /// Farthest-point seeding starting from the first sample
    fn seed_centroids(sample: &[Vec<f32>], k: usize) -> Vec<Vec<f32>> {
        let mut centroids = vec![sample[0].clone()];
        let mut nearest: Vec<f32> = sample.iter().map(|v| l2_squared(v, &sample[0])).collect();
        while centroids.len() < k {
            let (next, distance) = nearest
                .iter()
                .enumerate()
                .fold((0, -1.0f32), |best, (i, &d)| if d > best.1 { (i, d) } else { best });
            if distance <= 0.0 {
                break;
            }
            let seed = sample[next].clone();
            for (d, v) in nearest.iter_mut().zip(sample) {
                *d = d.min(l2_squared(v, &seed));
            }
            centroids.push(seed);
        }
        centroids
    }

    /// Deterministic k-means over the training sample
    fn kmeans(&self, sample: &[Vec<f32>]) -> Vec<Vec<f32>> {
        let dimension = self.dimension();
        let mut centroids = Self::seed_centroids(sample, self.nlist.min(sample.len()));
        let k = centroids.len();

        for _ in 0..KMEANS_ITERATIONS {
            let mut sums = vec![vec![0.0f32; dimension]; k];
            let mut counts = vec![0usize; k];
            for vector in sample {
                let nearest = centroids
                    .iter()
                    .enumerate()
                    .map(|(i, c)| (i, l2_squared(vector, c)))
                    .min_by(|a, b| a.1.total_cmp(&b.1))
                    .map(|(i, _)| i)
                    .unwrap_or(0);
                counts[nearest] += 1;
                for (s, v) in sums[nearest].iter_mut().zip(vector) {
                    *s += v;
                }
            }

            let mut moved = false;
            for ((centroid, sum), count) in centroids.iter_mut().zip(sums).zip(counts) {
                if count == 0 {
                    continue;
                }
                let mean: Vec<f32> = sum.into_iter().map(|s| s / count as f32).collect();
                if l2_squared(&mean, centroid) > f32::EPSILON {
                    moved = true;
                }
                *centroid = mean;
            }
            if !moved {
                break;
            }
        }
        centroids
    }
}

impl VectorIndex for IvfFlatIndex {
    fn parameter(&self) -> &IndexParameter {
        &self.parameter
    }

    fn index_type(&self) -> &'static str {
        "ivf_flat"
    }

    fn need_train(&self) -> bool {
        !self.data.read().is_trained()
    }

    fn train(&self, sample: &[Vec<f32>]) -> Result<()> {
        let dimension = self.dimension();
        if let Some(bad) = sample.iter().find(|v| v.len() != dimension) {
            return Err(VectorIndexError::InvalidArgument(format!(
                "train vector has dimension {}, index expects {}",
                bad.len(),
                dimension
            )));
        }

        let mut data = self.data.write();
        let sample: Vec<Vec<f32>> = if sample.is_empty() {
            data.pending.values().cloned().collect()
        } else {
            sample.to_vec()
        };
        if sample.is_empty() {
            return Ok(());
        }

        let centroids = self.kmeans(&sample);
        let mut existing: Vec<(VectorId, Vec<f32>)> = data.pending.drain().collect();
        for list in data.lists.drain(..) {
            existing.extend(list);
        }
        data.assignments.clear();
        data.lists = vec![HashMap::new(); centroids.len()];
        data.centroids = centroids;
        data.deleted_since_train = 0;
        for (id, vector) in existing {
            data.insert(id, vector);
        }

        debug!(
            "🔧 IVF trained with {} centroids from {} samples",
            data.centroids.len(),
            sample.len()
        );
        Ok(())
    }

    fn upsert(&self, vectors: &[VectorWithId]) -> Result<()> {
        let checked = checked_vectors(self.dimension(), vectors)?;
        let mut data = self.data.write();
        for (id, values) in checked {
            data.insert(id, values.to_vec());
        }
        Ok(())
    }

    fn delete(&self, ids: &[VectorId]) -> Result<()> {
        let mut data = self.data.write();
        for &id in ids {
            if data.remove(id) && data.is_trained() {
                data.deleted_since_train += 1;
            }
        }
        Ok(())
    }

    fn search(
        &self,
        query: &[f32],
        top_n: usize,
        filter: Option<&IdFilter>,
    ) -> Result<Vec<(VectorId, f32)>> {
        check_query(self.dimension(), query)?;
        let metric: MetricType = self.metric();
        let data = self.data.read();
        let mut top = TopK::new(top_n);

        let mut visit = |list: &HashMap<VectorId, Vec<f32>>| {
            for (&id, values) in list {
                if filter.map_or(true, |f| f.allows(id)) {
                    top.push(id, metric.distance(query, values));
                }
            }
        };

        visit(&data.pending);
        if data.is_trained() {
            let mut ranked: Vec<(usize, f32)> = data
                .centroids
                .iter()
                .enumerate()
                .map(|(i, c)| (i, l2_squared(query, c)))
                .collect();
            ranked.sort_by(|a, b| a.1.total_cmp(&b.1));
            for (list, _) in ranked.into_iter().take(self.nprobe) {
                visit(&data.lists[list]);
            }
        }
        Ok(top.into_sorted())
    }

    fn count(&self) -> usize {
        self.data.read().len()
    }

    fn deleted_count(&self) -> usize {
        self.data.read().deleted_since_train
    }

    fn memory_bytes(&self) -> usize {
        let data = self.data.read();
        let vector_bytes = self.dimension() * std::mem::size_of::<f32>();
        data.len() * (vector_bytes + 16) + data.centroids.len() * vector_bytes
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(&*self.data.read())?)
    }
}
