// Copyright 2025 ProximaDB
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.

//! Write-ahead log contract consumed by index replay

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

use crate::core::error::{Result, VectorIndexError};
use crate::core::types::{LogEntry, LogId, RegionId, WalMutation};

#[async_trait]
pub trait LogStorage: Send + Sync {
    /// Oldest log id still retained for the region, 0 when the log is empty
    async fn first_log_id(&self, region_id: RegionId) -> Result<LogId>;

    /// Newest committed log id for the region, 0 when the log is empty
    async fn last_log_id(&self, region_id: RegionId) -> Result<LogId>;

    /// Entries with `start_exclusive < log_id <= end_inclusive`, ascending by log id.
    ///
    /// Fails with `Corrupt` when a stored record fails its integrity check.
    async fn read_range(
        &self,
        region_id: RegionId,
        start_exclusive: LogId,
        end_inclusive: LogId,
    ) -> Result<Vec<LogEntry>>;
}

#[derive(Debug, Clone)]
struct StoredRecord {
    checksum: u32,
    payload: Vec<u8>,
}

impl StoredRecord {
    /// JSON payload: scalar and table values are self-describing
    fn encode(mutation: &WalMutation) -> Result<Self> {
        let payload = serde_json::to_vec(mutation)?;
        Ok(Self {
            checksum: crc32fast::hash(&payload),
            payload,
        })
    }

    fn decode(&self, log_id: LogId) -> Result<WalMutation> {
        if crc32fast::hash(&self.payload) != self.checksum {
            return Err(VectorIndexError::Corrupt(format!(
                "checksum mismatch for log id {}",
                log_id
            )));
        }
        serde_json::from_slice(&self.payload)
            .map_err(|e| VectorIndexError::Corrupt(format!("log id {}: {}", log_id, e)))
    }
}

/// In-process log with per-record CRC32 checksums
#[derive(Debug, Default)]
pub struct MemoryLogStorage {
    regions: RwLock<HashMap<RegionId, BTreeMap<LogId, StoredRecord>>>,
}

impl MemoryLogStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record; log ids must strictly increase per region
    pub fn append(&self, region_id: RegionId, log_id: LogId, mutation: &WalMutation) -> Result<()> {
        let record = StoredRecord::encode(mutation)?;
        let mut regions = self.regions.write();
        let log = regions.entry(region_id).or_default();
        if let Some((&last, _)) = log.last_key_value() {
            if log_id <= last {
                return Err(VectorIndexError::InvalidArgument(format!(
                    "log id {} does not follow {} for region {}",
                    log_id, last, region_id
                )));
            }
        }
        log.insert(log_id, record);
        Ok(())
    }

    /// Drop every record with `log_id <= up_to`
    pub fn truncate_prefix(&self, region_id: RegionId, up_to: LogId) {
        if let Some(log) = self.regions.write().get_mut(&region_id) {
            *log = log.split_off(&up_to.saturating_add(1));
        }
    }
}

#[async_trait]
impl LogStorage for MemoryLogStorage {
    async fn first_log_id(&self, region_id: RegionId) -> Result<LogId> {
        Ok(self
            .regions
            .read()
            .get(&region_id)
            .and_then(|log| log.first_key_value().map(|(id, _)| *id))
            .unwrap_or(0))
    }

    async fn last_log_id(&self, region_id: RegionId) -> Result<LogId> {
        Ok(self
            .regions
            .read()
            .get(&region_id)
            .and_then(|log| log.last_key_value().map(|(id, _)| *id))
            .unwrap_or(0))
    }

    async fn read_range(
        &self,
        region_id: RegionId,
        start_exclusive: LogId,
        end_inclusive: LogId,
    ) -> Result<Vec<LogEntry>> {
        if end_inclusive <= start_exclusive {
            return Ok(Vec::new());
        }
        let regions = self.regions.read();
        let Some(log) = regions.get(&region_id) else {
            return Ok(Vec::new());
        };

        log.range(start_exclusive + 1..=end_inclusive)
            .map(|(&log_id, record)| -> Result<LogEntry> {
                Ok(LogEntry {
                    log_id,
                    mutation: record.decode(log_id)?,
                })
            })
            .collect()
    }
}
