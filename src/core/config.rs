// Copyright 2025 ProximaDB
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::error::{Result, VectorIndexError};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorIndexConfig {
    pub bootstrap: BootstrapConfig,
    pub background: BackgroundConfig,
    pub build: BuildConfig,
    pub scrub: ScrubConfig,
    pub search: SearchConfig,
    pub snapshot: SnapshotConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    /// Regions loaded or built concurrently at server start
    pub concurrency: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackgroundConfig {
    /// Global cap on concurrently running background lifecycle jobs
    pub workers: usize,
    pub max_rebuild_tasks: usize,
    pub max_save_tasks: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    pub scan_page_size: usize,
    pub insert_batch_size: usize,
    pub train_sample_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrubConfig {
    pub interval_secs: u64,
    /// Tombstones tolerated before a scrub requests a rebuild
    pub rebuild_deleted_threshold: usize,
    /// Maximum index age before a scheduled rebuild, 0 disables
    pub rebuild_interval_secs: u64,
    /// Log ids applied since the last snapshot before a scrub requests a save
    pub save_log_gap: u64,
    pub rebuild_cooldown_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub default_timeout_ms: u64,
    /// Multiplier on top_n when post-filtering ANN results
    pub table_filter_overfetch: usize,
    pub max_scan_limit: usize,
    pub max_top_n: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    pub dir: PathBuf,
    pub keep_count: usize,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self { concurrency: 4 }
    }
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            max_rebuild_tasks: 2,
            max_save_tasks: 2,
        }
    }
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            scan_page_size: 1024,
            insert_batch_size: 512,
            train_sample_size: 10_000,
        }
    }
}

impl Default for ScrubConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            rebuild_deleted_threshold: 10_000,
            rebuild_interval_secs: 0,
            save_log_gap: 10_000,
            rebuild_cooldown_secs: 300,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 10_000,
            table_filter_overfetch: 4,
            max_scan_limit: 1000,
            max_top_n: 1024,
        }
    }
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./data/vector_index_snapshot"),
            keep_count: 1,
        }
    }
}

impl VectorIndexConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: VectorIndexConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<()> {
        let checks = [
            ("bootstrap.concurrency", self.bootstrap.concurrency),
            ("background.workers", self.background.workers),
            ("background.max_rebuild_tasks", self.background.max_rebuild_tasks),
            ("background.max_save_tasks", self.background.max_save_tasks),
            ("build.scan_page_size", self.build.scan_page_size),
            ("build.insert_batch_size", self.build.insert_batch_size),
            ("search.table_filter_overfetch", self.search.table_filter_overfetch),
            ("search.max_scan_limit", self.search.max_scan_limit),
            ("search.max_top_n", self.search.max_top_n),
        ];
        for (name, value) in checks {
            if value == 0 {
                return Err(VectorIndexError::InvalidArgument(format!(
                    "{} must be greater than zero",
                    name
                )));
            }
        }
        Ok(())
    }

    pub fn scrub_interval(&self) -> Duration {
        Duration::from_secs(self.scrub.interval_secs.max(1))
    }

    pub fn default_search_timeout(&self) -> Duration {
        Duration::from_millis(self.search.default_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = VectorIndexConfig::from_toml_str(
            r#"
            [bootstrap]
            concurrency = 2

            [scrub]
            save_log_gap = 50
            "#,
        )
        .unwrap();

        assert_eq!(config.bootstrap.concurrency, 2);
        assert_eq!(config.scrub.save_log_gap, 50);
        assert_eq!(config.scrub.rebuild_deleted_threshold, 10_000);
        assert_eq!(config.background.workers, 8);
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let err = VectorIndexConfig::from_toml_str("[bootstrap]\nconcurrency = 0\n").unwrap_err();
        assert!(matches!(err, VectorIndexError::InvalidArgument(_)));
    }

    #[test]
    fn test_malformed_toml_rejected() {
        let err = VectorIndexConfig::from_toml_str("[bootstrap\n").unwrap_err();
        assert!(matches!(err, VectorIndexError::InvalidArgument(_)));
    }
}
