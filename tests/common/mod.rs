//! Shared fixtures for the vector index integration tests

#![allow(dead_code)]

use std::sync::{Arc, Once};
use tempfile::TempDir;

use proxima_vindex::core::{
    IndexParameter, LogId, MemoryRegionMeta, RegionInfo, VectorIndexConfig, VectorWithId, WalMutation,
};
use proxima_vindex::storage::{LocalSnapshotStore, MemoryEngine, MemoryLogStorage};
use proxima_vindex::{BuiltinIndexFactory, MetricType, VectorIndexManager};

static INIT: Once = Once::new();

/// Initialize tracing once per test binary; honours `RUST_LOG`
pub fn init_test_env() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

pub fn flat(dimension: usize) -> IndexParameter {
    IndexParameter::Flat {
        dimension,
        metric: MetricType::L2,
    }
}

pub fn ivf(dimension: usize) -> IndexParameter {
    IndexParameter::IvfFlat {
        dimension,
        metric: MetricType::L2,
        nlist: 8,
        nprobe: 8,
    }
}

/// Deterministic 2-D vector for `id`; nearby ids are nearby points
pub fn point(id: u64) -> Vec<f32> {
    vec![id as f32, (id % 7) as f32]
}

/// Vector carrying scalar `bucket = id % 10` and table `score = id % 100`
pub fn tagged(id: u64) -> VectorWithId {
    VectorWithId::new(id, point(id))
        .with_scalar([("bucket".to_string(), serde_json::json!(id % 10))].into_iter().collect())
        .with_table([("score".to_string(), serde_json::json!(id % 100))].into_iter().collect())
}

/// Engine, log, region metadata and snapshot directory shared by one or
/// more managers, so a test can restart the manager over the same stores
pub struct TestCluster {
    pub engine: Arc<MemoryEngine>,
    pub log: Arc<MemoryLogStorage>,
    pub meta: Arc<MemoryRegionMeta>,
    pub config: VectorIndexConfig,
    pub dir: TempDir,
}

impl TestCluster {
    pub fn new() -> Self {
        init_test_env();
        let dir = TempDir::new().expect("temp dir");
        let mut config = VectorIndexConfig::default();
        config.snapshot.dir = dir.path().to_path_buf();
        config.build.scan_page_size = 64;
        config.build.insert_batch_size = 32;
        Self {
            engine: Arc::new(MemoryEngine::new()),
            log: Arc::new(MemoryLogStorage::new()),
            meta: Arc::new(MemoryRegionMeta::new()),
            config,
            dir,
        }
    }

    pub fn add_region(&self, id: u64, start: u64, end: u64, parameter: IndexParameter) -> Arc<RegionInfo> {
        self.meta
            .upsert(RegionInfo::for_id_range(id, 1, start, end, Some(parameter)))
    }

    pub fn manager(&self) -> Arc<VectorIndexManager> {
        self.manager_with(self.config.clone())
    }

    pub fn manager_with(&self, config: VectorIndexConfig) -> Arc<VectorIndexManager> {
        Arc::new(
            VectorIndexManager::new(
                config,
                self.engine.clone(),
                self.log.clone(),
                Arc::new(LocalSnapshotStore::new(self.dir.path())),
                Arc::new(BuiltinIndexFactory),
                self.meta.clone(),
            )
            .expect("manager"),
        )
    }

    /// Commit a mutation to the engine and the log
    pub fn commit(&self, region: &RegionInfo, log_id: LogId, mutation: &WalMutation) {
        self.engine.apply(region, log_id, mutation).expect("engine apply");
        self.log.append(region.id, log_id, mutation).expect("log append");
    }

    /// Commit a mutation and feed it to the live index, as the apply path does
    pub fn write(&self, manager: &VectorIndexManager, region: &RegionInfo, log_id: LogId, mutation: WalMutation) {
        self.commit(region, log_id, &mutation);
        manager.apply(region.id, log_id, &mutation).expect("index apply");
    }

    /// One log entry per id in `ids`, starting at `first_log_id`; returns the
    /// last log id written
    pub fn insert_each(&self, region: &RegionInfo, first_log_id: LogId, ids: std::ops::Range<u64>) -> LogId {
        let mut log_id = first_log_id;
        for id in ids {
            self.commit(region, log_id, &WalMutation::Upsert(vec![tagged(id)]));
            log_id += 1;
        }
        log_id - 1
    }
}
