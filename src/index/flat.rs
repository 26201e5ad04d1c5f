// Copyright 2025 ProximaDB
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.

//! Exact brute-force index

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::{check_query, checked_vectors, IdFilter, TopK, VectorIndex};
use crate::core::error::{Result, VectorIndexError};
use crate::core::types::{IndexParameter, VectorId, VectorWithId};

#[derive(Debug, Default, Serialize, Deserialize)]
struct FlatData {
    vectors: HashMap<VectorId, Vec<f32>>,
}

pub struct FlatIndex {
    parameter: IndexParameter,
    data: RwLock<FlatData>,
}

impl FlatIndex {
    pub fn new(parameter: IndexParameter) -> Self {
        Self {
            parameter,
            data: RwLock::new(FlatData::default()),
        }
    }

    pub fn deserialize(parameter: IndexParameter, bytes: &[u8]) -> Result<Self> {
        let data: FlatData = bincode::deserialize(bytes)
            .map_err(|e| VectorIndexError::Corrupt(format!("flat index payload: {}", e)))?;
        let dimension = parameter.dimension();
        if let Some((id, v)) = data.vectors.iter().find(|(_, v)| v.len() != dimension) {
            return Err(VectorIndexError::Corrupt(format!(
                "flat index vector {} has dimension {}, expected {}",
                id,
                v.len(),
                dimension
            )));
        }
        Ok(Self {
            parameter,
            data: RwLock::new(data),
        })
    }
}

impl VectorIndex for FlatIndex {
    fn parameter(&self) -> &IndexParameter {
        &self.parameter
    }

    fn index_type(&self) -> &'static str {
        "flat"
    }

    fn upsert(&self, vectors: &[VectorWithId]) -> Result<()> {
        let checked = checked_vectors(self.dimension(), vectors)?;
        let mut data = self.data.write();
        for (id, values) in checked {
            data.vectors.insert(id, values.to_vec());
        }
        Ok(())
    }

    fn delete(&self, ids: &[VectorId]) -> Result<()> {
        let mut data = self.data.write();
        for id in ids {
            data.vectors.remove(id);
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
        let metric = self.metric();
        let data = self.data.read();

        let mut top = TopK::new(top_n);
        for (&id, values) in &data.vectors {
            if filter.map_or(true, |f| f.allows(id)) {
                top.push(id, metric.distance(query, values));
            }
        }
        Ok(top.into_sorted())
    }

    fn count(&self) -> usize {
        self.data.read().vectors.len()
    }

    fn memory_bytes(&self) -> usize {
        let data = self.data.read();
        data.vectors.len() * (self.dimension() * std::mem::size_of::<f32>() + 8)
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(&*self.data.read())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::distance::MetricType;

    fn index() -> FlatIndex {
        FlatIndex::new(IndexParameter::Flat { dimension: 2, metric: MetricType::L2 })
    }

    #[test]
    fn test_search_orders_by_distance() {
        let index = index();
        index
            .upsert(&[
                VectorWithId::new(1, vec![0.0, 0.0]),
                VectorWithId::new(2, vec![3.0, 4.0]),
                VectorWithId::new(3, vec![1.0, 0.0]),
            ])
            .unwrap();

        let hits = index.search(&[0.0, 0.0], 2, None).unwrap();
        assert_eq!(hits, vec![(1, 0.0), (3, 1.0)]);
    }

    #[test]
    fn test_filter_and_delete() {
        let index = index();
        let vectors: Vec<_> = (0..10).map(|i| VectorWithId::new(i, vec![i as f32, 0.0])).collect();
        index.upsert(&vectors).unwrap();
        index.delete(&[5]).unwrap();

        let filter = IdFilter::range(4, 8);
        let ids: Vec<_> = index
            .search(&[0.0, 0.0], 10, Some(&filter))
            .unwrap()
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(ids, vec![4, 6, 7]);
        assert_eq!(index.count(), 9);
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let index = index();
        let err = index.upsert(&[VectorWithId::new(1, vec![1.0])]).unwrap_err();
        assert!(matches!(err, VectorIndexError::InvalidArgument(_)));
        assert!(index.search(&[1.0, 2.0, 3.0], 1, None).is_err());
    }

    #[test]
    fn test_serialize_restores_contents() {
        let index = index();
        index.upsert(&[VectorWithId::new(42, vec![1.0, 1.0])]).unwrap();

        let restored = FlatIndex::deserialize(index.parameter().clone(), &index.serialize().unwrap()).unwrap();
        assert_eq!(restored.search(&[1.0, 1.0], 1, None).unwrap(), vec![(42, 0.0)]);
    }
}
