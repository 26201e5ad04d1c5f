// Copyright 2025 ProximaDB
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.

//! Region metadata consumed by the index manager and the reader

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::types::{IndexParameter, PartitionId, RegionId};
use crate::storage::codec::VectorCodec;

/// Half-open key range `[start_key, end_key)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRange {
    pub start_key: Vec<u8>,
    pub end_key: Vec<u8>,
}

impl KeyRange {
    pub fn new(start_key: Vec<u8>, end_key: Vec<u8>) -> Self {
        Self { start_key, end_key }
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        key >= self.start_key.as_slice() && key < self.end_key.as_slice()
    }

    pub fn is_empty(&self) -> bool {
        self.start_key >= self.end_key
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionInfo {
    pub id: RegionId,
    pub partition_id: PartitionId,
    pub range: KeyRange,
    pub index_parameter: Option<IndexParameter>,
}

impl RegionInfo {
    /// Region covering vector ids `[start_id, end_id)` of one partition
    pub fn for_id_range(
        id: RegionId,
        partition_id: PartitionId,
        start_id: u64,
        end_id: u64,
        index_parameter: Option<IndexParameter>,
    ) -> Self {
        Self {
            id,
            partition_id,
            range: KeyRange::new(
                VectorCodec::encode_vector_key(partition_id, start_id),
                VectorCodec::encode_vector_key(partition_id, end_id),
            ),
            index_parameter,
        }
    }

    pub fn needs_index(&self) -> bool {
        self.index_parameter.is_some()
    }

    /// Vector ids covered by this region as `[min, max)`
    pub fn id_range(&self) -> (u64, u64) {
        VectorCodec::id_range(self.partition_id, &self.range)
    }
}

pub trait RegionMetaReader: Send + Sync {
    fn regions(&self) -> Vec<Arc<RegionInfo>>;

    fn region(&self, region_id: RegionId) -> Option<Arc<RegionInfo>>;
}

/// In-process region metadata table
#[derive(Debug, Default)]
pub struct MemoryRegionMeta {
    regions: DashMap<RegionId, Arc<RegionInfo>>,
}

impl MemoryRegionMeta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, region: RegionInfo) -> Arc<RegionInfo> {
        let region = Arc::new(region);
        self.regions.insert(region.id, region.clone());
        region
    }

    pub fn remove(&self, region_id: RegionId) -> Option<Arc<RegionInfo>> {
        self.regions.remove(&region_id).map(|(_, region)| region)
    }
}

impl RegionMetaReader for MemoryRegionMeta {
    fn regions(&self) -> Vec<Arc<RegionInfo>> {
        let mut regions: Vec<_> = self.regions.iter().map(|r| r.value().clone()).collect();
        regions.sort_by_key(|r| r.id);
        regions
    }

    fn region(&self, region_id: RegionId) -> Option<Arc<RegionInfo>> {
        self.regions.get(&region_id).map(|r| r.value().clone())
    }
}
