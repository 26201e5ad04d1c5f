// Copyright 2025 ProximaDB
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.

//! Vector index manager: owns every region's handle, drives bootstrap,
//! exposes the lifecycle operations and runs the periodic scrub.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::handle::{IndexState, VectorIndexHandle};
use super::lifecycle::VectorIndexLifecycle;
use super::scheduler::{JobOutcome, LifecycleJob, RunningCounts, VectorIndexScheduler};
use super::IndexFactory;
use crate::core::config::VectorIndexConfig;
use crate::core::error::{Result, VectorIndexError};
use crate::core::region::{RegionInfo, RegionMetaReader};
use crate::core::types::{LogId, RegionId, WalMutation};
use crate::query::reader::VectorReader;
use crate::storage::engine::StorageEngine;
use crate::storage::log::LogStorage;
use crate::storage::snapshot::{SnapshotMeta, SnapshotStore};

/// What one scrub pass decided for one region
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrubDecision {
    pub region_id: RegionId,
    /// Handle has no index; load-or-build relaunched
    pub need_load: bool,
    pub need_rebuild: bool,
    pub need_save: bool,
    /// Whether the resulting job was admitted by the scheduler
    pub launched: bool,
}

pub struct VectorIndexManager {
    config: Arc<VectorIndexConfig>,
    regions: Arc<dyn RegionMetaReader>,
    lifecycle: Arc<VectorIndexLifecycle>,
    scheduler: Arc<VectorIndexScheduler>,
    handles: DashMap<RegionId, Arc<VectorIndexHandle>>,
}

impl VectorIndexManager {
    pub fn new(
        config: VectorIndexConfig,
        engine: Arc<dyn StorageEngine>,
        log: Arc<dyn LogStorage>,
        snapshots: Arc<dyn SnapshotStore>,
        factory: Arc<dyn IndexFactory>,
        regions: Arc<dyn RegionMetaReader>,
    ) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let lifecycle = Arc::new(VectorIndexLifecycle::new(
            engine,
            log,
            snapshots,
            factory,
            config.clone(),
        ));
        let scheduler = Arc::new(VectorIndexScheduler::new(
            lifecycle.clone(),
            config.background.clone(),
        ));
        info!(
            "🔧 Vector index manager created: {} background workers, bootstrap concurrency {}",
            config.background.workers, config.bootstrap.concurrency
        );
        Ok(Self {
            config,
            regions,
            lifecycle,
            scheduler,
            handles: DashMap::new(),
        })
    }

    pub fn config(&self) -> &VectorIndexConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &Arc<VectorIndexScheduler> {
        &self.scheduler
    }

    pub fn running_counts(&self) -> RunningCounts {
        self.scheduler.running_counts()
    }

    /// Regions without index parameters never hold a vector index
    pub fn need_hold_vector_index(region: &RegionInfo) -> bool {
        region.needs_index()
    }

    pub fn get_handle(&self, region_id: RegionId) -> Option<Arc<VectorIndexHandle>> {
        self.handles.get(&region_id).map(|h| h.value().clone())
    }

    pub fn handles(&self) -> Vec<Arc<VectorIndexHandle>> {
        let mut handles: Vec<_> = self.handles.iter().map(|h| h.value().clone()).collect();
        handles.sort_by_key(|h| h.region_id());
        handles
    }

    /// Register a handle for the region; `None` when it holds no index
    pub fn add_region(&self, region: &RegionInfo) -> Option<Arc<VectorIndexHandle>> {
        if !Self::need_hold_vector_index(region) {
            return None;
        }
        let handle = self
            .handles
            .entry(region.id)
            .or_insert_with(|| {
                debug!("Region {} registered for vector index", region.id);
                VectorIndexHandle::new(region.id)
            })
            .clone();
        Some(handle)
    }

    fn region(&self, region_id: RegionId) -> Result<Arc<RegionInfo>> {
        self.regions
            .region(region_id)
            .ok_or_else(|| VectorIndexError::NotFound(format!("region {}", region_id)))
    }

    fn region_and_handle(&self, region_id: RegionId) -> Result<(Arc<RegionInfo>, Arc<VectorIndexHandle>)> {
        let region = self.region(region_id)?;
        let handle = self.add_region(&region).ok_or_else(|| {
            VectorIndexError::InvalidArgument(format!("region {} does not hold a vector index", region_id))
        })?;
        Ok((region, handle))
    }

    /// Register every region needing an index and load or build them all.
    ///
    /// Fails if any region fails; callers must not serve the failed regions.
    pub async fn init(&self) -> Result<()> {
        let started = Instant::now();
        let regions: Vec<_> = self
            .regions
            .regions()
            .into_iter()
            .filter(|r| Self::need_hold_vector_index(r))
            .collect();
        info!("🚀 Bootstrapping vector indexes for {} regions", regions.len());
        self.parallel_load_or_build(regions, self.config.bootstrap.concurrency)
            .await?;
        info!("✅ Vector index bootstrap completed in {:?}", started.elapsed());
        Ok(())
    }

    pub async fn parallel_load_or_build(&self, regions: Vec<Arc<RegionInfo>>, concurrency: usize) -> Result<()> {
        let jobs = regions
            .into_iter()
            .filter_map(|region| self.add_region(&region).map(|handle| (handle, region)))
            .collect();
        self.scheduler.parallel_load_or_build(jobs, concurrency).await
    }

    pub async fn load_or_build_vector_index(&self, region_id: RegionId) -> Result<LogId> {
        let (region, handle) = self.region_and_handle(region_id)?;
        match self.scheduler.run(LifecycleJob::LoadOrBuild { handle, region }).await? {
            JobOutcome::Loaded { watermark } => Ok(watermark),
            other => Err(unexpected(other)),
        }
    }

    pub async fn save_vector_index(&self, region_id: RegionId) -> Result<SnapshotMeta> {
        let handle = self
            .get_handle(region_id)
            .ok_or_else(|| VectorIndexError::NotFound(format!("vector index for region {}", region_id)))?;
        match self.scheduler.run(LifecycleJob::Save { handle }).await? {
            JobOutcome::Saved(meta) => Ok(meta),
            other => Err(unexpected(other)),
        }
    }

    /// Returns whether a rebuild actually ran
    pub async fn rebuild_vector_index(&self, region_id: RegionId, force: bool) -> Result<bool> {
        let (region, handle) = self.region_and_handle(region_id)?;
        match self
            .scheduler
            .run(LifecycleJob::Rebuild { handle, region, force })
            .await?
        {
            JobOutcome::Rebuilt { rebuilt } => Ok(rebuilt),
            other => Err(unexpected(other)),
        }
    }

    pub fn launch_load_or_build(&self, region_id: RegionId) -> Result<JoinHandle<Result<JobOutcome>>> {
        let (region, handle) = self.region_and_handle(region_id)?;
        self.scheduler.enqueue(LifecycleJob::LoadOrBuild { handle, region })
    }

    pub fn launch_save(&self, region_id: RegionId) -> Result<JoinHandle<Result<JobOutcome>>> {
        let handle = self
            .get_handle(region_id)
            .ok_or_else(|| VectorIndexError::NotFound(format!("vector index for region {}", region_id)))?;
        self.scheduler.enqueue(LifecycleJob::Save { handle })
    }

    pub fn launch_rebuild(&self, region_id: RegionId, force: bool) -> Result<JoinHandle<Result<JobOutcome>>> {
        let (region, handle) = self.region_and_handle(region_id)?;
        self.scheduler.enqueue(LifecycleJob::Rebuild { handle, region, force })
    }

    /// Apply a committed mutation to the region's live index
    pub fn apply(&self, region_id: RegionId, log_id: LogId, mutation: &WalMutation) -> Result<bool> {
        match self.get_handle(region_id) {
            Some(handle) => handle.apply(log_id, mutation),
            None => Ok(false),
        }
    }

    /// Range changed (split or merge): results are scoped by the new range
    /// immediately and the index is rebuilt on the next scrub
    pub fn update_region_range(&self, region: &RegionInfo) {
        if let Some(handle) = self.get_handle(region.id) {
            handle.mark_stale();
            info!("🔧 Region {} range updated, vector index marked stale", region.id);
        }
    }

    /// Destroy the region's handle and delete its snapshots
    pub async fn remove_region(&self, region_id: RegionId) -> Result<()> {
        let Some((_, handle)) = self.handles.remove(&region_id) else {
            return Ok(());
        };
        handle.destroy();
        self.lifecycle.snapshots().delete_all(region_id).await?;
        info!("🧹 Region {} vector index removed", region_id);
        Ok(())
    }

    fn decide(&self, handle: &VectorIndexHandle) -> ScrubDecision {
        let scrub = &self.config.scrub;
        let mut decision = ScrubDecision {
            region_id: handle.region_id(),
            ..Default::default()
        };
        let Some(instance) = handle.current() else {
            decision.need_load = handle.state() == IndexState::Uninitialized;
            return decision;
        };

        let deleted = instance.index().deleted_count();
        let too_old = scrub.rebuild_interval_secs > 0
            && handle
                .last_rebuild_elapsed()
                .map_or(true, |age| age >= Duration::from_secs(scrub.rebuild_interval_secs));
        decision.need_rebuild = handle.is_stale() || deleted >= scrub.rebuild_deleted_threshold || too_old;

        let watermark = instance.watermark();
        let saved = handle.last_save_log_id();
        decision.need_save = watermark > saved && watermark - saved >= scrub.save_log_gap;
        decision
    }

    /// One maintenance pass over every held region.
    ///
    /// Work is enqueued through the scheduler; rejected jobs are logged and
    /// retried on the next pass.
    pub async fn scrub_vector_index(&self) -> Vec<ScrubDecision> {
        let started = Instant::now();
        let mut decisions = Vec::new();

        for handle in self.handles() {
            if handle.is_busy() || handle.state() == IndexState::Destroyed {
                continue;
            }
            let Some(region) = self.regions.region(handle.region_id()) else {
                warn!("⚠️ Region {} has a vector index but no metadata", handle.region_id());
                continue;
            };

            let mut decision = self.decide(&handle);
            let job = if decision.need_load {
                Some(LifecycleJob::LoadOrBuild { handle, region })
            } else if decision.need_rebuild || decision.need_save {
                Some(LifecycleJob::Scrub {
                    handle,
                    region,
                    need_rebuild: decision.need_rebuild,
                    need_save: decision.need_save,
                })
            } else {
                None
            };

            if let Some(job) = job {
                match self.scheduler.enqueue(job) {
                    Ok(_) => decision.launched = true,
                    Err(e) => debug!("Scrub job for region {} not launched: {}", decision.region_id, e),
                }
                decisions.push(decision);
            }
        }

        if !decisions.is_empty() {
            info!(
                "🧹 Scrub pass: {} region(s) need maintenance, {} launched in {:?}",
                decisions.len(),
                decisions.iter().filter(|d| d.launched).count(),
                started.elapsed()
            );
        }
        decisions
    }

    /// Run `scrub_vector_index` every `scrub.interval_secs` until cancelled
    pub fn start_scrub_loop(self: &Arc<Self>, token: CancellationToken) -> JoinHandle<()> {
        let manager = self.clone();
        let period = self.config.scrub_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            info!("🔄 Vector index scrub loop started, interval {:?}", period);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        manager.scrub_vector_index().await;
                    }
                }
            }
            info!("🛑 Vector index scrub loop stopped");
        })
    }

    /// A reader pinned to the current engine snapshot and installed index
    pub async fn reader(&self, region_id: RegionId) -> Result<VectorReader> {
        let region = self.region(region_id)?;
        let snapshot = self.lifecycle.engine().snapshot().await?;
        Ok(VectorReader::new(
            region,
            snapshot,
            self.get_handle(region_id),
            self.config.search.clone(),
        ))
    }
}

fn unexpected(outcome: JobOutcome) -> VectorIndexError {
    VectorIndexError::Internal(format!("unexpected job outcome {:?}", outcome))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::distance::MetricType;
    use crate::core::region::MemoryRegionMeta;
    use crate::core::types::{IndexParameter, VectorWithId};
    use crate::index::BuiltinIndexFactory;
    use crate::storage::engine::MemoryEngine;
    use crate::storage::log::MemoryLogStorage;
    use crate::storage::snapshot::LocalSnapshotStore;
    use tempfile::TempDir;

    struct Fixture {
        manager: Arc<VectorIndexManager>,
        meta: Arc<MemoryRegionMeta>,
        engine: Arc<MemoryEngine>,
        log: Arc<MemoryLogStorage>,
        _dir: TempDir,
    }

    fn fixture(config: VectorIndexConfig) -> Fixture {
        let dir = TempDir::new().unwrap();
        let engine = Arc::new(MemoryEngine::new());
        let log = Arc::new(MemoryLogStorage::new());
        let meta = Arc::new(MemoryRegionMeta::new());
        let manager = VectorIndexManager::new(
            config,
            engine.clone(),
            log.clone(),
            Arc::new(LocalSnapshotStore::new(dir.path())),
            Arc::new(BuiltinIndexFactory),
            meta.clone(),
        )
        .unwrap();
        Fixture {
            manager: Arc::new(manager),
            meta,
            engine,
            log,
            _dir: dir,
        }
    }

    fn parameter() -> Option<IndexParameter> {
        Some(IndexParameter::Flat { dimension: 2, metric: MetricType::L2 })
    }

    impl Fixture {
        fn write(&self, region: &RegionInfo, log_id: LogId, mutation: WalMutation) {
            self.engine.apply(region, log_id, &mutation).unwrap();
            self.log.append(region.id, log_id, &mutation).unwrap();
            self.manager.apply(region.id, log_id, &mutation).unwrap();
        }
    }

    #[tokio::test]
    async fn test_init_skips_regions_without_index() {
        let f = fixture(VectorIndexConfig::default());
        f.meta.upsert(RegionInfo::for_id_range(1, 1, 0, 100, parameter()));
        f.meta.upsert(RegionInfo::for_id_range(2, 1, 100, 200, None));

        f.manager.init().await.unwrap();
        assert!(f.manager.get_handle(1).unwrap().is_ready());
        assert!(f.manager.get_handle(2).is_none());
    }

    #[tokio::test]
    async fn test_scrub_requests_save_after_log_gap() {
        let mut config = VectorIndexConfig::default();
        config.scrub.save_log_gap = 3;
        let f = fixture(config);
        let region = f.meta.upsert(RegionInfo::for_id_range(1, 1, 0, 100, parameter()));
        f.manager.init().await.unwrap();

        for log_id in 1..=3 {
            let vectors = vec![VectorWithId::new(log_id, vec![log_id as f32, 0.0])];
            f.write(&region, log_id, WalMutation::Upsert(vectors));
        }

        let decisions = f.manager.scrub_vector_index().await;
        assert_eq!(decisions.len(), 1);
        assert!(decisions[0].need_save && !decisions[0].need_rebuild);
        assert!(decisions[0].launched);
    }

    #[tokio::test]
    async fn test_range_update_triggers_rebuild() {
        let f = fixture(VectorIndexConfig::default());
        let region = f.meta.upsert(RegionInfo::for_id_range(1, 1, 0, 100, parameter()));
        f.manager.init().await.unwrap();
        let vectors = (0..100).map(|i| VectorWithId::new(i, vec![i as f32, 0.0])).collect();
        f.write(&region, 1, WalMutation::Upsert(vectors));

        let split = f.meta.upsert(RegionInfo::for_id_range(1, 1, 0, 50, parameter()));
        f.manager.update_region_range(&split);
        let handle = f.manager.get_handle(1).unwrap();
        assert_eq!(handle.state(), IndexState::Stale);

        let reader = f.manager.reader(1).await.unwrap();
        let result = reader
            .batch_search(&[vec![99.0, 0.0]], &crate::query::SearchParameter::top_n(1))
            .await
            .unwrap();
        assert_eq!(result.results[0][0].id(), 49);

        let decisions = f.manager.scrub_vector_index().await;
        assert!(decisions[0].need_rebuild && decisions[0].launched);

        for _ in 0..200 {
            if !handle.is_busy() && !handle.is_stale() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(handle.state(), IndexState::Ready);
        assert_eq!(handle.current().unwrap().index().count(), 50);
    }

    #[tokio::test]
    async fn test_remove_region_destroys_handle() {
        let f = fixture(VectorIndexConfig::default());
        f.meta.upsert(RegionInfo::for_id_range(1, 1, 0, 100, parameter()));
        f.manager.init().await.unwrap();
        f.manager.save_vector_index(1).await.unwrap();

        let handle = f.manager.get_handle(1).unwrap();
        f.manager.remove_region(1).await.unwrap();
        assert_eq!(handle.state(), IndexState::Destroyed);
        assert!(f.manager.get_handle(1).is_none());
        assert!(f.manager.lifecycle.snapshots().load_latest(1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_scrub_loop_stops_on_cancel() {
        let mut config = VectorIndexConfig::default();
        config.scrub.interval_secs = 1;
        let f = fixture(config);
        let token = CancellationToken::new();
        let task = f.manager.start_scrub_loop(token.clone());
        token.cancel();
        task.await.unwrap();
    }
}
