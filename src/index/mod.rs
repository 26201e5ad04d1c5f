// Copyright 2025 ProximaDB
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.

//! Region vector index: the pluggable ANN capability and the lifecycle
//! machinery (handle, build/load/save/rebuild, scheduler, manager) around it.

pub mod flat;
pub mod handle;
pub mod ivf;
pub mod lifecycle;
pub mod manager;
pub mod scheduler;

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::sync::Arc;

use crate::compute::distance::{compare_ranked, MetricType};
use crate::core::error::{Result, VectorIndexError};
use crate::core::types::{IndexParameter, VectorId, VectorWithId};

pub use flat::FlatIndex;
pub use handle::{IndexInstance, IndexState, LifecycleGuard, LifecycleOp, VectorIndexHandle};
pub use ivf::IvfFlatIndex;
pub use lifecycle::VectorIndexLifecycle;
pub use manager::{ScrubDecision, VectorIndexManager};
pub use scheduler::{JobOutcome, LifecycleJob, RunningCounts, VectorIndexScheduler};

/// Restricts a search to ids inside `[min_id, max_id)` and, optionally, to an
/// explicit candidate set
#[derive(Debug, Clone)]
pub struct IdFilter {
    pub min_id: VectorId,
    pub max_id: VectorId,
    pub ids: Option<Arc<HashSet<VectorId>>>,
}

impl IdFilter {
    pub fn range(min_id: VectorId, max_id: VectorId) -> Self {
        Self {
            min_id,
            max_id,
            ids: None,
        }
    }

    pub fn with_ids(mut self, ids: HashSet<VectorId>) -> Self {
        self.ids = Some(Arc::new(ids));
        self
    }

    #[inline]
    pub fn allows(&self, id: VectorId) -> bool {
        id >= self.min_id
            && id < self.max_id
            && self.ids.as_ref().map_or(true, |ids| ids.contains(&id))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexMetrics {
    pub index_type: String,
    pub dimension: usize,
    pub count: usize,
    /// Deletions applied since the index structure was last trained or built
    pub deleted_count: usize,
    pub memory_bytes: usize,
    pub trained: bool,
}

/// ANN index capability.
///
/// Implementations synchronize internally: searches take `&self` and may run
/// concurrently with the write path applying upserts and deletes.
pub trait VectorIndex: Send + Sync {
    fn parameter(&self) -> &IndexParameter;

    fn index_type(&self) -> &'static str;

    fn dimension(&self) -> usize {
        self.parameter().dimension()
    }

    fn metric(&self) -> MetricType {
        self.parameter().metric()
    }

    /// Whether `train` must run before the index produces ANN results
    fn need_train(&self) -> bool {
        false
    }

    fn train(&self, _sample: &[Vec<f32>]) -> Result<()> {
        Ok(())
    }

    /// Whether `search` honors an `IdFilter` natively
    fn supports_filter(&self) -> bool {
        true
    }

    fn upsert(&self, vectors: &[VectorWithId]) -> Result<()>;

    fn delete(&self, ids: &[VectorId]) -> Result<()>;

    /// Up to `top_n` nearest neighbours as `(id, distance)`, closest first
    fn search(
        &self,
        query: &[f32],
        top_n: usize,
        filter: Option<&IdFilter>,
    ) -> Result<Vec<(VectorId, f32)>>;

    fn count(&self) -> usize;

    fn deleted_count(&self) -> usize {
        0
    }

    fn memory_bytes(&self) -> usize;

    fn serialize(&self) -> Result<Vec<u8>>;

    fn metrics(&self) -> IndexMetrics {
        IndexMetrics {
            index_type: self.index_type().to_string(),
            dimension: self.dimension(),
            count: self.count(),
            deleted_count: self.deleted_count(),
            memory_bytes: self.memory_bytes(),
            trained: !self.need_train(),
        }
    }
}

/// Creates and restores index instances from region index parameters
pub trait IndexFactory: Send + Sync {
    fn create(&self, parameter: &IndexParameter) -> Result<Box<dyn VectorIndex>>;

    fn deserialize(&self, parameter: &IndexParameter, data: &[u8]) -> Result<Box<dyn VectorIndex>>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinIndexFactory;

impl IndexFactory for BuiltinIndexFactory {
    fn create(&self, parameter: &IndexParameter) -> Result<Box<dyn VectorIndex>> {
        validate_parameter(parameter)?;
        Ok(match parameter {
            IndexParameter::Flat { .. } => Box::new(FlatIndex::new(parameter.clone())),
            IndexParameter::IvfFlat { .. } => Box::new(IvfFlatIndex::new(parameter.clone())),
        })
    }

    fn deserialize(&self, parameter: &IndexParameter, data: &[u8]) -> Result<Box<dyn VectorIndex>> {
        validate_parameter(parameter)?;
        Ok(match parameter {
            IndexParameter::Flat { .. } => Box::new(FlatIndex::deserialize(parameter.clone(), data)?),
            IndexParameter::IvfFlat { .. } => {
                Box::new(IvfFlatIndex::deserialize(parameter.clone(), data)?)
            }
        })
    }
}

fn validate_parameter(parameter: &IndexParameter) -> Result<()> {
    if parameter.dimension() == 0 {
        return Err(VectorIndexError::InvalidArgument(
            "index dimension must be greater than zero".to_string(),
        ));
    }
    if let IndexParameter::IvfFlat { nlist, nprobe, .. } = parameter {
        if *nlist == 0 || *nprobe == 0 {
            return Err(VectorIndexError::InvalidArgument(
                "ivf nlist and nprobe must be greater than zero".to_string(),
            ));
        }
    }
    Ok(())
}

/// Checks an upsert batch against the index dimension and returns the vectors
pub(crate) fn checked_vectors<'a>(
    dimension: usize,
    vectors: &'a [VectorWithId],
) -> Result<Vec<(VectorId, &'a [f32])>> {
    vectors
        .iter()
        .map(|v| match &v.vector {
            Some(values) if values.len() == dimension => Ok((v.id, values.as_slice())),
            Some(values) => Err(VectorIndexError::InvalidArgument(format!(
                "vector {} has dimension {}, index expects {}",
                v.id,
                values.len(),
                dimension
            ))),
            None => Err(VectorIndexError::InvalidArgument(format!(
                "vector {} carries no vector data",
                v.id
            ))),
        })
        .collect()
}

pub(crate) fn check_query(dimension: usize, query: &[f32]) -> Result<()> {
    if query.len() != dimension {
        return Err(VectorIndexError::InvalidArgument(format!(
            "query has dimension {}, index expects {}",
            query.len(),
            dimension
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy)]
struct Ranked(f32, VectorId);

impl PartialEq for Ranked {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Ranked {}

impl PartialOrd for Ranked {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ranked {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_ranked((self.0, self.1), (other.0, other.1))
    }
}

/// Bounded collector keeping the `k` closest candidates
pub(crate) struct TopK {
    k: usize,
    heap: BinaryHeap<Ranked>,
}

impl TopK {
    pub(crate) fn new(k: usize) -> Self {
        Self {
            k,
            heap: BinaryHeap::with_capacity(k.min(4096) + 1),
        }
    }

    pub(crate) fn push(&mut self, id: VectorId, distance: f32) {
        if self.k == 0 {
            return;
        }
        let candidate = Ranked(distance, id);
        if self.heap.len() < self.k {
            self.heap.push(candidate);
        } else if let Some(worst) = self.heap.peek() {
            if candidate < *worst {
                self.heap.pop();
                self.heap.push(candidate);
            }
        }
    }

    pub(crate) fn into_sorted(self) -> Vec<(VectorId, f32)> {
        self.heap
            .into_sorted_vec()
            .into_iter()
            .map(|Ranked(distance, id)| (id, distance))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topk_keeps_closest() {
        let mut top = TopK::new(3);
        for (id, d) in [(1, 0.9), (2, 0.1), (3, 0.5), (4, 0.3), (5, 0.7)] {
            top.push(id, d);
        }
        let ids: Vec<_> = top.into_sorted().into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![2, 4, 3]);
    }

    #[test]
    fn test_id_filter_range_and_set() {
        let filter = IdFilter::range(10, 20).with_ids([5, 12, 19, 20].into_iter().collect());
        assert!(!filter.allows(5));
        assert!(filter.allows(12));
        assert!(!filter.allows(13));
        assert!(!filter.allows(20));
    }

    #[test]
    fn test_factory_rejects_zero_dimension() {
        let parameter = IndexParameter::Flat { dimension: 0, metric: MetricType::L2 };
        assert!(BuiltinIndexFactory.create(&parameter).is_err());
    }
}
