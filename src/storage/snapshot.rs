// Copyright 2025 ProximaDB
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.

//! Vector index snapshot persistence.
//!
//! Layout under the store root:
//!
//! ```text
//! <root>/<region_id>/snapshot_<log_id:020>_<created_nanos:020>/
//!     index.bin   serialized index
//!     meta.json   watermark, index parameter, CRC32 of index.bin
//! ```
//!
//! A snapshot is written into a `.tmp_` sibling directory, fsynced, then
//! renamed into place, so a visible snapshot directory always holds both its
//! data and the watermark describing it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::core::error::{Result, VectorIndexError};
use crate::core::types::{IndexParameter, LogId, RegionId};

const SNAPSHOT_PREFIX: &str = "snapshot_";
const TEMP_PREFIX: &str = ".tmp_";
const DATA_FILE: &str = "index.bin";
const META_FILE: &str = "meta.json";
const FORMAT_VERSION: u8 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SnapshotMeta {
    pub snapshot_id: String,
    pub region_id: RegionId,
    /// Watermark: the index reflects every committed write up to this log id
    pub log_id: LogId,
    pub index_parameter: IndexParameter,
    pub checksum: u32,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
    pub format_version: u8,
}

#[derive(Debug, Clone)]
pub struct SnapshotData {
    pub meta: SnapshotMeta,
    pub data: Vec<u8>,
}

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Persist `data` tagged with watermark `log_id`
    async fn save(
        &self,
        region_id: RegionId,
        log_id: LogId,
        index_parameter: &IndexParameter,
        data: &[u8],
    ) -> Result<SnapshotMeta>;

    /// Newest snapshot that passes its integrity checks, if any
    async fn load_latest(&self, region_id: RegionId) -> Result<Option<SnapshotData>>;

    /// Snapshot manifests for the region, newest first
    async fn list(&self, region_id: RegionId) -> Result<Vec<SnapshotMeta>>;

    /// Keep the newest `keep` snapshots and delete the rest; returns deleted count
    async fn purge(&self, region_id: RegionId, keep: usize) -> Result<usize>;

    async fn delete_all(&self, region_id: RegionId) -> Result<()>;
}

/// Snapshot store on the local filesystem
#[derive(Debug, Clone)]
pub struct LocalSnapshotStore {
    root: PathBuf,
}

impl LocalSnapshotStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn region_dir(&self, region_id: RegionId) -> PathBuf {
        self.root.join(region_id.to_string())
    }

    /// Snapshot directory names, newest first
    async fn snapshot_dirs(&self, region_id: RegionId) -> Result<Vec<PathBuf>> {
        let region_dir = self.region_dir(region_id);
        let mut entries = match fs::read_dir(&region_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with(SNAPSHOT_PREFIX) {
                names.push(name);
            }
        }
        names.sort_unstable_by(|a, b| b.cmp(a));
        Ok(names.into_iter().map(|n| region_dir.join(n)).collect())
    }

    async fn read_meta(dir: &Path) -> Result<SnapshotMeta> {
        let raw = fs::read(dir.join(META_FILE)).await?;
        serde_json::from_slice(&raw)
            .map_err(|e| VectorIndexError::Corrupt(format!("{}: bad manifest: {}", dir.display(), e)))
    }

    async fn read_verified(dir: &Path) -> Result<SnapshotData> {
        let meta = Self::read_meta(dir).await?;
        if meta.format_version != FORMAT_VERSION {
            return Err(VectorIndexError::Corrupt(format!(
                "{}: unsupported format version {}",
                dir.display(),
                meta.format_version
            )));
        }

        let data = fs::read(dir.join(DATA_FILE)).await?;
        if data.len() as u64 != meta.size_bytes || crc32fast::hash(&data) != meta.checksum {
            return Err(VectorIndexError::Corrupt(format!(
                "{}: checksum mismatch",
                dir.display()
            )));
        }
        Ok(SnapshotData { meta, data })
    }

    async fn write_synced(path: &Path, bytes: &[u8]) -> Result<()> {
        let mut file = fs::File::create(path).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        Ok(())
    }

    async fn sync_dir(path: &Path) -> Result<()> {
        fs::File::open(path).await?.sync_all().await?;
        Ok(())
    }
}

#[async_trait]
impl SnapshotStore for LocalSnapshotStore {
    async fn save(
        &self,
        region_id: RegionId,
        log_id: LogId,
        index_parameter: &IndexParameter,
        data: &[u8],
    ) -> Result<SnapshotMeta> {
        let created_at = Utc::now();
        let nanos = created_at.timestamp_nanos_opt().unwrap_or_default().max(0);
        let snapshot_id = format!("{}{:020}_{:020}", SNAPSHOT_PREFIX, log_id, nanos);

        let region_dir = self.region_dir(region_id);
        fs::create_dir_all(&region_dir).await?;
        let temp_dir = region_dir.join(format!("{}{}", TEMP_PREFIX, snapshot_id));
        let final_dir = region_dir.join(&snapshot_id);
        fs::create_dir_all(&temp_dir).await?;

        let meta = SnapshotMeta {
            snapshot_id: snapshot_id.clone(),
            region_id,
            log_id,
            index_parameter: index_parameter.clone(),
            checksum: crc32fast::hash(data),
            size_bytes: data.len() as u64,
            created_at,
            format_version: FORMAT_VERSION,
        };

        let written = async {
            Self::write_synced(&temp_dir.join(DATA_FILE), data).await?;
            Self::write_synced(&temp_dir.join(META_FILE), &serde_json::to_vec_pretty(&meta)?).await?;
            Self::sync_dir(&temp_dir).await?;
            fs::rename(&temp_dir, &final_dir).await?;
            Self::sync_dir(&region_dir).await
        }
        .await;

        if let Err(e) = written {
            let _ = fs::remove_dir_all(&temp_dir).await;
            return Err(e);
        }

        debug!(
            "💾 Snapshot {} written for region {} ({} bytes)",
            snapshot_id, region_id, meta.size_bytes
        );
        Ok(meta)
    }

    async fn load_latest(&self, region_id: RegionId) -> Result<Option<SnapshotData>> {
        for dir in self.snapshot_dirs(region_id).await? {
            match Self::read_verified(&dir).await {
                Ok(snapshot) => return Ok(Some(snapshot)),
                Err(e) => {
                    warn!(
                        "⚠️ Skipping invalid snapshot {} for region {}: {}",
                        dir.display(),
                        region_id,
                        e
                    );
                }
            }
        }
        Ok(None)
    }

    async fn list(&self, region_id: RegionId) -> Result<Vec<SnapshotMeta>> {
        let mut metas = Vec::new();
        for dir in self.snapshot_dirs(region_id).await? {
            if let Ok(meta) = Self::read_meta(&dir).await {
                metas.push(meta);
            }
        }
        Ok(metas)
    }

    async fn purge(&self, region_id: RegionId, keep: usize) -> Result<usize> {
        let dirs = self.snapshot_dirs(region_id).await?;
        let mut deleted = 0;
        for dir in dirs.into_iter().skip(keep) {
            fs::remove_dir_all(&dir).await?;
            deleted += 1;
        }
        if deleted > 0 {
            info!("🧹 Purged {} old snapshot(s) for region {}", deleted, region_id);
        }
        Ok(deleted)
    }

    async fn delete_all(&self, region_id: RegionId) -> Result<()> {
        match fs::remove_dir_all(self.region_dir(region_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
