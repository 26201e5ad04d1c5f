// Copyright 2025 ProximaDB
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.

//! Storage engine contract used by index builds and the vector reader.
//!
//! Reads always go through an [`EngineSnapshot`] so that a build or a query
//! observes one consistent point in time. [`MemoryEngine`] is the in-process
//! implementation used by the CLI and the test suites.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use super::codec::VectorCodec;
use crate::core::error::Result;
use crate::core::region::{KeyRange, RegionInfo};
use crate::core::types::{LogId, RegionId, WalMutation};

pub type KeyValue = (Vec<u8>, Vec<u8>);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ColumnFamily {
    /// Raw vector values
    Vector,
    /// Scalar fields attached to vectors
    Scalar,
    /// Wide table rows joined to vectors
    Table,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RangeStats {
    pub count: u64,
    pub bytes: u64,
}

#[async_trait]
pub trait StorageEngine: Send + Sync {
    fn engine_name(&self) -> &'static str;

    /// Point-in-time read view across all column families
    async fn snapshot(&self) -> Result<Arc<dyn EngineSnapshot>>;
}

#[async_trait]
pub trait EngineSnapshot: Send + Sync {
    /// Last log id whose mutation is visible in this snapshot for `region_id`
    fn applied_log_id(&self, region_id: RegionId) -> LogId;

    async fn get(&self, cf: ColumnFamily, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Ordered scan of `range`, at most `limit` entries
    async fn scan(
        &self,
        cf: ColumnFamily,
        range: &KeyRange,
        limit: usize,
        reverse: bool,
    ) -> Result<Vec<KeyValue>>;

    /// Exact entry count and byte size of `range`, computed by enumeration
    async fn range_stats(&self, cf: ColumnFamily, range: &KeyRange) -> Result<RangeStats> {
        const PAGE: usize = 4096;
        let mut stats = RangeStats::default();
        let mut cursor = range.clone();
        loop {
            let page = self.scan(cf, &cursor, PAGE, false).await?;
            for (key, value) in &page {
                stats.count += 1;
                stats.bytes += (key.len() + value.len()) as u64;
            }
            match page.last() {
                Some((last_key, _)) if page.len() == PAGE => {
                    let mut next = last_key.clone();
                    next.push(0);
                    cursor.start_key = next;
                }
                _ => break,
            }
        }
        Ok(stats)
    }
}

#[derive(Debug, Clone, Default)]
struct EngineState {
    column_families: HashMap<ColumnFamily, BTreeMap<Vec<u8>, Vec<u8>>>,
    applied_log_ids: HashMap<RegionId, LogId>,
}

/// Copy-on-write in-memory engine.
///
/// Writers clone the state only when a snapshot still references it, so
/// snapshots stay isolated from later writes.
#[derive(Debug, Default)]
pub struct MemoryEngine {
    state: RwLock<Arc<EngineState>>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a committed mutation for `region` at `log_id`
    pub fn apply(&self, region: &RegionInfo, log_id: LogId, mutation: &WalMutation) -> Result<()> {
        let mut guard = self.state.write();
        let state = Arc::make_mut(&mut guard);

        match mutation {
            WalMutation::Upsert(vectors) => {
                for vector in vectors {
                    let key = VectorCodec::encode_vector_key(region.partition_id, vector.id);
                    if let Some(values) = &vector.vector {
                        state
                            .column_families
                            .entry(ColumnFamily::Vector)
                            .or_default()
                            .insert(key.clone(), VectorCodec::encode_vector(values)?);
                    }
                    if let Some(scalar) = &vector.scalar_data {
                        state
                            .column_families
                            .entry(ColumnFamily::Scalar)
                            .or_default()
                            .insert(key.clone(), VectorCodec::encode_scalar(scalar)?);
                    }
                    if let Some(table) = &vector.table_data {
                        state
                            .column_families
                            .entry(ColumnFamily::Table)
                            .or_default()
                            .insert(key, VectorCodec::encode_table(table)?);
                    }
                }
            }
            WalMutation::Delete(ids) => {
                for id in ids {
                    let key = VectorCodec::encode_vector_key(region.partition_id, *id);
                    for cf in state.column_families.values_mut() {
                        cf.remove(&key);
                    }
                }
            }
        }

        let applied = state.applied_log_ids.entry(region.id).or_insert(0);
        *applied = (*applied).max(log_id);
        Ok(())
    }

    /// Write a raw value, bypassing the log. Used to seed fixtures.
    pub fn put_raw(&self, cf: ColumnFamily, key: Vec<u8>, value: Vec<u8>) {
        let mut guard = self.state.write();
        Arc::make_mut(&mut guard)
            .column_families
            .entry(cf)
            .or_default()
            .insert(key, value);
    }
}

#[async_trait]
impl StorageEngine for MemoryEngine {
    fn engine_name(&self) -> &'static str {
        "memory"
    }

    async fn snapshot(&self) -> Result<Arc<dyn EngineSnapshot>> {
        let state = self.state.read().clone();
        Ok(Arc::new(MemorySnapshot { state }))
    }
}

struct MemorySnapshot {
    state: Arc<EngineState>,
}

#[async_trait]
impl EngineSnapshot for MemorySnapshot {
    fn applied_log_id(&self, region_id: RegionId) -> LogId {
        self.state
            .applied_log_ids
            .get(&region_id)
            .copied()
            .unwrap_or(0)
    }

    async fn get(&self, cf: ColumnFamily, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self
            .state
            .column_families
            .get(&cf)
            .and_then(|data| data.get(key).cloned()))
    }

    async fn scan(
        &self,
        cf: ColumnFamily,
        range: &KeyRange,
        limit: usize,
        reverse: bool,
    ) -> Result<Vec<KeyValue>> {
        let data = match self.state.column_families.get(&cf) {
            Some(data) if !range.is_empty() => data,
            _ => return Ok(Vec::new()),
        };

        let entries = data.range(range.start_key.clone()..range.end_key.clone());
        let collected = if reverse {
            entries
                .rev()
                .take(limit)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        } else {
            entries
                .take(limit)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        };
        Ok(collected)
    }
}
