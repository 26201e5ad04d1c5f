// Copyright 2025 ProximaDB
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::compute::distance::MetricType;

pub type VectorId = u64;
pub type RegionId = u64;
pub type PartitionId = u64;
pub type LogId = u64;

/// Scalar fields stored next to a vector, keyed by field name
pub type ScalarData = BTreeMap<String, serde_json::Value>;

/// Wide table row joined to a vector by id
pub type TableData = BTreeMap<String, serde_json::Value>;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct VectorWithId {
    pub id: VectorId,

    /// Raw vector values, omitted when the caller asked for ids only
    pub vector: Option<Vec<f32>>,

    pub scalar_data: Option<ScalarData>,

    pub table_data: Option<TableData>,
}

impl VectorWithId {
    pub fn new(id: VectorId, vector: Vec<f32>) -> Self {
        Self {
            id,
            vector: Some(vector),
            scalar_data: None,
            table_data: None,
        }
    }

    pub fn with_scalar(mut self, scalar_data: ScalarData) -> Self {
        self.scalar_data = Some(scalar_data);
        self
    }

    pub fn with_table(mut self, table_data: TableData) -> Self {
        self.table_data = Some(table_data);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VectorWithDistance {
    pub vector_with_id: VectorWithId,
    pub distance: f32,
    pub metric: MetricType,
}

impl VectorWithDistance {
    pub fn id(&self) -> VectorId {
        self.vector_with_id.id
    }
}

/// Index parameters stored in region metadata.
///
/// A region without index parameters never holds a vector index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IndexParameter {
    /// Exact brute-force search
    Flat { dimension: usize, metric: MetricType },

    /// Inverted file over k-means centroids, requires training
    IvfFlat {
        dimension: usize,
        metric: MetricType,
        nlist: usize,
        nprobe: usize,
    },
}

impl IndexParameter {
    pub fn dimension(&self) -> usize {
        match self {
            IndexParameter::Flat { dimension, .. } | IndexParameter::IvfFlat { dimension, .. } => {
                *dimension
            }
        }
    }

    pub fn metric(&self) -> MetricType {
        match self {
            IndexParameter::Flat { metric, .. } | IndexParameter::IvfFlat { metric, .. } => *metric,
        }
    }
}

impl fmt::Display for IndexParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexParameter::Flat { dimension, metric } => {
                write!(f, "Flat(dim={}, metric={})", dimension, metric)
            }
            IndexParameter::IvfFlat {
                dimension,
                metric,
                nlist,
                nprobe,
            } => write!(
                f,
                "IvfFlat(dim={}, metric={}, nlist={}, nprobe={})",
                dimension, metric, nlist, nprobe
            ),
        }
    }
}

/// A committed vector mutation as recorded in the write-ahead log
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum WalMutation {
    Upsert(Vec<VectorWithId>),
    Delete(Vec<VectorId>),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogEntry {
    pub log_id: LogId,
    pub mutation: WalMutation,
}
