// Copyright 2025 ProximaDB
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.

//! Lifecycle job execution with admission control.
//!
//! Two paths share one scheduler:
//!
//! - background jobs ([`VectorIndexScheduler::enqueue`]) are admitted or
//!   rejected immediately against the worker pool and per-class limits;
//! - bootstrap ([`VectorIndexScheduler::parallel_load_or_build`]) waits for a
//!   slot in its own pool so every region is attempted before serving.
//!
//! Running counters belong to the scheduler instance, not the process.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use super::handle::{LifecycleOp, VectorIndexHandle};
use super::lifecycle::VectorIndexLifecycle;
use crate::core::config::BackgroundConfig;
use crate::core::error::{Result, VectorIndexError};
use crate::core::region::RegionInfo;
use crate::core::types::{LogId, RegionId};
use crate::storage::snapshot::SnapshotMeta;

/// A unit of lifecycle work bound to one handle
#[derive(Debug, Clone)]
pub enum LifecycleJob {
    LoadOrBuild {
        handle: Arc<VectorIndexHandle>,
        region: Arc<RegionInfo>,
    },
    Rebuild {
        handle: Arc<VectorIndexHandle>,
        region: Arc<RegionInfo>,
        force: bool,
    },
    Save {
        handle: Arc<VectorIndexHandle>,
    },
    /// Maintenance decided by a scrub pass: rebuild first, then save
    Scrub {
        handle: Arc<VectorIndexHandle>,
        region: Arc<RegionInfo>,
        need_rebuild: bool,
        need_save: bool,
    },
}

impl LifecycleJob {
    pub fn handle(&self) -> &Arc<VectorIndexHandle> {
        match self {
            Self::LoadOrBuild { handle, .. }
            | Self::Rebuild { handle, .. }
            | Self::Save { handle }
            | Self::Scrub { handle, .. } => handle,
        }
    }

    pub fn region_id(&self) -> RegionId {
        self.handle().region_id()
    }

    /// Class slots the job occupies while it runs. A scrub that may rebuild
    /// also saves afterwards, so it holds both.
    fn classes(&self) -> &'static [JobClass] {
        match self {
            Self::LoadOrBuild { .. } => &[JobClass::Task],
            Self::Rebuild { .. } => &[JobClass::Rebuild],
            Self::Save { .. } => &[JobClass::Save],
            Self::Scrub { need_rebuild: true, .. } => &[JobClass::Rebuild, JobClass::Save],
            Self::Scrub { .. } => &[JobClass::Save],
        }
    }
}

impl fmt::Display for LifecycleJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LoadOrBuild { .. } => write!(f, "{}", LifecycleOp::LoadOrBuild),
            Self::Rebuild { force, .. } => write!(f, "{}(force={})", LifecycleOp::Rebuild, force),
            Self::Save { .. } => write!(f, "{}", LifecycleOp::Save),
            Self::Scrub {
                need_rebuild,
                need_save,
                ..
            } => write!(f, "scrub(rebuild={}, save={})", need_rebuild, need_save),
        }
    }
}

#[derive(Debug)]
pub enum JobOutcome {
    Loaded { watermark: LogId },
    Rebuilt { rebuilt: bool },
    Saved(SnapshotMeta),
    Scrubbed { rebuilt: bool, saved: Option<SnapshotMeta> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobClass {
    Task,
    Rebuild,
    Save,
}

#[derive(Debug, Default)]
struct RunningCounters {
    tasks: AtomicUsize,
    rebuilds: AtomicUsize,
    saves: AtomicUsize,
    peak_tasks: AtomicUsize,
}

/// Point-in-time view of the running counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunningCounts {
    pub tasks: usize,
    pub rebuilds: usize,
    pub saves: usize,
    /// Highest `tasks` value observed since the scheduler was created
    pub peak_tasks: usize,
}

impl RunningCounters {
    fn class_counter(&self, class: JobClass) -> Option<&AtomicUsize> {
        match class {
            JobClass::Task => None,
            JobClass::Rebuild => Some(&self.rebuilds),
            JobClass::Save => Some(&self.saves),
        }
    }

    /// Claim a class slot if fewer than `max` are running
    fn try_claim(&self, class: JobClass, max: usize) -> bool {
        let Some(counter) = self.class_counter(class) else {
            return true;
        };
        counter
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |running| {
                (running < max).then_some(running + 1)
            })
            .is_ok()
    }

    fn release(&self, class: JobClass) {
        if let Some(counter) = self.class_counter(class) {
            counter.fetch_sub(1, Ordering::AcqRel);
        }
    }

    fn snapshot(&self) -> RunningCounts {
        RunningCounts {
            tasks: self.tasks.load(Ordering::Acquire),
            rebuilds: self.rebuilds.load(Ordering::Acquire),
            saves: self.saves.load(Ordering::Acquire),
            peak_tasks: self.peak_tasks.load(Ordering::Acquire),
        }
    }
}

/// Keeps the running counters accurate for the lifetime of one job
struct RunningGuard {
    counters: Arc<RunningCounters>,
    classes: &'static [JobClass],
}

impl RunningGuard {
    /// `classes_claimed` is set when the class slots were already taken by `try_claim`
    fn start(counters: Arc<RunningCounters>, classes: &'static [JobClass], classes_claimed: bool) -> Self {
        if !classes_claimed {
            for class in classes {
                if let Some(counter) = counters.class_counter(*class) {
                    counter.fetch_add(1, Ordering::AcqRel);
                }
            }
        }
        let running = counters.tasks.fetch_add(1, Ordering::AcqRel) + 1;
        counters.peak_tasks.fetch_max(running, Ordering::AcqRel);
        Self { counters, classes }
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.counters.tasks.fetch_sub(1, Ordering::AcqRel);
        for class in self.classes {
            self.counters.release(*class);
        }
    }
}

pub struct VectorIndexScheduler {
    lifecycle: Arc<VectorIndexLifecycle>,
    background: Arc<Semaphore>,
    limits: BackgroundConfig,
    counters: Arc<RunningCounters>,
}

impl VectorIndexScheduler {
    pub fn new(lifecycle: Arc<VectorIndexLifecycle>, limits: BackgroundConfig) -> Self {
        Self {
            lifecycle,
            background: Arc::new(Semaphore::new(limits.workers)),
            limits,
            counters: Arc::new(RunningCounters::default()),
        }
    }

    pub fn lifecycle(&self) -> &Arc<VectorIndexLifecycle> {
        &self.lifecycle
    }

    pub fn running_counts(&self) -> RunningCounts {
        self.counters.snapshot()
    }

    /// Free background worker slots
    pub fn available_workers(&self) -> usize {
        self.background.available_permits()
    }

    /// Run a job on the caller's task; counted but not subject to admission
    pub async fn run(&self, job: LifecycleJob) -> Result<JobOutcome> {
        let _running = RunningGuard::start(self.counters.clone(), job.classes(), false);
        dispatch(&self.lifecycle, job).await
    }

    /// Admit a job onto the background pool or reject it immediately.
    ///
    /// Failures of an admitted job are logged, not escalated; the returned
    /// handle yields the outcome for callers that want it.
    pub fn enqueue(&self, job: LifecycleJob) -> Result<JoinHandle<Result<JobOutcome>>> {
        let region_id = job.region_id();
        if let Some(running) = job.handle().running_op() {
            return Err(VectorIndexError::Rejected(format!(
                "region {} busy with {}, {} not admitted",
                region_id, running, job
            )));
        }

        let permit = self.background.clone().try_acquire_owned().map_err(|_| {
            VectorIndexError::Rejected(format!(
                "background pool saturated ({} workers), {} for region {} not admitted",
                self.limits.workers, job, region_id
            ))
        })?;

        let classes = job.classes();
        for (claimed, class) in classes.iter().enumerate() {
            let max = match class {
                JobClass::Task => usize::MAX,
                JobClass::Rebuild => self.limits.max_rebuild_tasks,
                JobClass::Save => self.limits.max_save_tasks,
            };
            if !self.counters.try_claim(*class, max) {
                for taken in &classes[..claimed] {
                    self.counters.release(*taken);
                }
                return Err(VectorIndexError::Rejected(format!(
                    "{} limit {} reached, {} for region {} not admitted",
                    match class {
                        JobClass::Rebuild => "rebuild",
                        _ => "save",
                    },
                    max,
                    job,
                    region_id
                )));
            }
        }

        let running = RunningGuard::start(self.counters.clone(), classes, true);
        let lifecycle = self.lifecycle.clone();
        debug!("📥 Admitted {} for region {}", job, region_id);

        Ok(tokio::spawn(async move {
            let _permit = permit;
            let _running = running;
            let label = job.to_string();
            let outcome = dispatch(&lifecycle, job).await;
            if let Err(e) = &outcome {
                warn!("⚠️ Background {} for region {} failed: {}", label, region_id, e);
            }
            outcome
        }))
    }

    /// Load or build every handle with at most `concurrency` in flight.
    ///
    /// Waits for a slot rather than rejecting. Every region is attempted;
    /// the first failure is returned once all have finished.
    pub async fn parallel_load_or_build(
        &self,
        jobs: Vec<(Arc<VectorIndexHandle>, Arc<RegionInfo>)>,
        concurrency: usize,
    ) -> Result<()> {
        let started = Instant::now();
        let total = jobs.len();
        let slots = Arc::new(Semaphore::new(concurrency.max(1)));
        let mut set = JoinSet::new();

        for (handle, region) in jobs {
            let permit = slots
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| VectorIndexError::Internal(format!("bootstrap pool closed: {}", e)))?;
            let running = RunningGuard::start(self.counters.clone(), &[JobClass::Task], false);
            let lifecycle = self.lifecycle.clone();
            set.spawn(async move {
                let _permit = permit;
                let _running = running;
                let result = lifecycle.load_or_build(&handle, &region).await;
                (region.id, result)
            });
        }

        let mut first_error = None;
        let mut failed = 0usize;
        while let Some(joined) = set.join_next().await {
            let (region_id, result) = joined?;
            if let Err(e) = result {
                error!("❌ Region {} failed to load or build vector index: {}", region_id, e);
                failed += 1;
                first_error.get_or_insert(e);
            }
        }

        info!(
            "🚀 Bootstrap load-or-build finished: {}/{} regions ready in {:?}",
            total - failed,
            total,
            started.elapsed()
        );
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

async fn dispatch(lifecycle: &VectorIndexLifecycle, job: LifecycleJob) -> Result<JobOutcome> {
    match job {
        LifecycleJob::LoadOrBuild { handle, region } => {
            let watermark = lifecycle.load_or_build(&handle, &region).await?;
            Ok(JobOutcome::Loaded { watermark })
        }
        LifecycleJob::Rebuild { handle, region, force } => {
            let rebuilt = lifecycle.rebuild(&handle, &region, force).await?;
            Ok(JobOutcome::Rebuilt { rebuilt })
        }
        LifecycleJob::Save { handle } => Ok(JobOutcome::Saved(lifecycle.save(&handle).await?)),
        LifecycleJob::Scrub {
            handle,
            region,
            need_rebuild,
            need_save,
        } => {
            let rebuilt = if need_rebuild {
                lifecycle.rebuild(&handle, &region, false).await?
            } else {
                false
            };
            let saved = if need_save || rebuilt {
                Some(lifecycle.save(&handle).await?)
            } else {
                None
            };
            Ok(JobOutcome::Scrubbed { rebuilt, saved })
        }
    }
}
