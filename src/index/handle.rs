// Copyright 2025 ProximaDB
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.

//! Per-region index handle.
//!
//! The active index lives behind an [`ArcSwapOption`]: readers take a cheap
//! `Arc` to the installed [`IndexInstance`] and keep it for the whole call,
//! installers publish a fully built instance with one atomic store. A rebuild
//! therefore never mutates the instance an in-flight search is reading.
//!
//! Lifecycle writers (load/build, rebuild, save) are serialized per handle by
//! [`VectorIndexHandle::try_begin`]; a second writer is rejected, never queued.

use arc_swap::ArcSwapOption;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::VectorIndex;
use crate::core::error::{Result, VectorIndexError};
use crate::core::types::{LogEntry, LogId, RegionId, VectorWithId, WalMutation};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexState {
    Uninitialized,
    Building,
    Loading,
    Ready,
    Rebuilding,
    /// Data changed past the watermark; the installed index still serves reads
    Stale,
    Destroyed,
}

impl IndexState {
    pub fn is_transitional(&self) -> bool {
        matches!(self, Self::Building | Self::Loading | Self::Rebuilding)
    }
}

impl fmt::Display for IndexState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleOp {
    LoadOrBuild,
    Rebuild,
    Save,
}

impl fmt::Display for LifecycleOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::LoadOrBuild => "load_or_build",
            Self::Rebuild => "rebuild",
            Self::Save => "save",
        };
        f.write_str(name)
    }
}

/// One built index plus the log position its contents reflect
pub struct IndexInstance {
    index: Box<dyn VectorIndex>,
    watermark: AtomicU64,
    built_at: Instant,
}

impl IndexInstance {
    pub fn new(index: Box<dyn VectorIndex>, watermark: LogId) -> Self {
        Self {
            index,
            watermark: AtomicU64::new(watermark),
            built_at: Instant::now(),
        }
    }

    pub fn index(&self) -> &dyn VectorIndex {
        self.index.as_ref()
    }

    pub fn watermark(&self) -> LogId {
        self.watermark.load(Ordering::Acquire)
    }

    pub fn age(&self) -> Duration {
        self.built_at.elapsed()
    }

    /// Apply a committed mutation. Entries at or below the watermark are
    /// skipped; returns whether the mutation was applied.
    pub fn apply(&self, log_id: LogId, mutation: &WalMutation) -> Result<bool> {
        if log_id <= self.watermark() {
            return Ok(false);
        }
        match mutation {
            WalMutation::Upsert(vectors) => {
                let with_vectors: Vec<VectorWithId> = vectors
                    .iter()
                    .filter(|v| v.vector.is_some())
                    .cloned()
                    .collect();
                if !with_vectors.is_empty() {
                    self.index.upsert(&with_vectors)?;
                }
            }
            WalMutation::Delete(ids) => self.index.delete(ids)?,
        }
        self.watermark.fetch_max(log_id, Ordering::AcqRel);
        Ok(true)
    }
}

impl fmt::Debug for IndexInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexInstance")
            .field("index_type", &self.index.index_type())
            .field("count", &self.index.count())
            .field("watermark", &self.watermark())
            .finish()
    }
}

pub struct VectorIndexHandle {
    region_id: RegionId,
    instance: ArcSwapOption<IndexInstance>,
    state: RwLock<IndexState>,
    stale: AtomicBool,
    switching: AtomicBool,
    busy: Mutex<Option<LifecycleOp>>,
    /// Mutations applied while a load or rebuild is in flight; `None` when idle.
    /// Also serializes the write path against installs.
    captured: Mutex<Option<Vec<LogEntry>>>,
    last_rebuild_at: Mutex<Option<Instant>>,
    last_save_log_id: AtomicU64,
}

impl VectorIndexHandle {
    pub fn new(region_id: RegionId) -> Arc<Self> {
        Arc::new(Self {
            region_id,
            instance: ArcSwapOption::empty(),
            state: RwLock::new(IndexState::Uninitialized),
            stale: AtomicBool::new(false),
            switching: AtomicBool::new(false),
            busy: Mutex::new(None),
            captured: Mutex::new(None),
            last_rebuild_at: Mutex::new(None),
            last_save_log_id: AtomicU64::new(0),
        })
    }

    pub fn region_id(&self) -> RegionId {
        self.region_id
    }

    pub fn state(&self) -> IndexState {
        *self.state.read()
    }

    /// The installed index, held by the caller for the duration of a read
    pub fn current(&self) -> Option<Arc<IndexInstance>> {
        self.instance.load_full()
    }

    pub fn is_ready(&self) -> bool {
        self.state() != IndexState::Destroyed && self.instance.load().is_some()
    }

    pub fn watermark(&self) -> LogId {
        self.instance.load().as_ref().map_or(0, |i| i.watermark())
    }

    pub fn is_stale(&self) -> bool {
        self.stale.load(Ordering::Acquire)
    }

    pub fn is_switching(&self) -> bool {
        self.switching.load(Ordering::Acquire)
    }

    pub fn running_op(&self) -> Option<LifecycleOp> {
        *self.busy.lock()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.lock().is_some()
    }

    pub fn last_save_log_id(&self) -> LogId {
        self.last_save_log_id.load(Ordering::Acquire)
    }

    pub fn last_rebuild_elapsed(&self) -> Option<Duration> {
        self.last_rebuild_at.lock().map(|at| at.elapsed())
    }

    /// Flag the index as behind its data. A Ready handle moves to Stale.
    pub fn mark_stale(&self) {
        self.stale.store(true, Ordering::Release);
        let mut state = self.state.write();
        if *state == IndexState::Ready {
            *state = IndexState::Stale;
        }
        debug!("⚠️ Region {} vector index marked stale", self.region_id);
    }

    /// Apply a committed mutation through the live write path.
    ///
    /// Returns whether the installed index changed. Mutations arriving while a
    /// load or rebuild is in flight are also captured for the incoming index.
    pub fn apply(&self, log_id: LogId, mutation: &WalMutation) -> Result<bool> {
        let mut captured = self.captured.lock();
        if let Some(buffer) = captured.as_mut() {
            buffer.push(LogEntry {
                log_id,
                mutation: mutation.clone(),
            });
        }
        match self.instance.load_full() {
            Some(instance) => instance.apply(log_id, mutation),
            None => Ok(false),
        }
    }

    /// Claim the exclusive lifecycle-writer slot
    pub fn try_begin(self: &Arc<Self>, op: LifecycleOp) -> Result<LifecycleGuard> {
        let mut busy = self.busy.lock();
        if self.state() == IndexState::Destroyed {
            return Err(VectorIndexError::Rejected(format!(
                "region {} vector index is destroyed",
                self.region_id
            )));
        }
        if let Some(running) = *busy {
            return Err(VectorIndexError::Rejected(format!(
                "region {} already running {}, {} rejected",
                self.region_id, running, op
            )));
        }
        *busy = Some(op);
        Ok(LifecycleGuard {
            handle: self.clone(),
            op,
            prior: None,
        })
    }

    /// Drop the index and refuse further lifecycle work
    pub fn destroy(&self) {
        let _captured = self.captured.lock();
        *self.state.write() = IndexState::Destroyed;
        self.instance.store(None);
        info!("🗑️ Region {} vector index destroyed", self.region_id);
    }

    pub(crate) fn record_save(&self, log_id: LogId) {
        self.last_save_log_id.fetch_max(log_id, Ordering::AcqRel);
    }

    /// Serialize the installed index with the write path paused so the
    /// returned watermark describes exactly the returned bytes
    pub(crate) fn freeze_serialize(&self) -> Result<Option<(Arc<IndexInstance>, LogId, Vec<u8>)>> {
        let _captured = self.captured.lock();
        let Some(instance) = self.instance.load_full() else {
            return Ok(None);
        };
        let watermark = instance.watermark();
        let data = instance.index().serialize()?;
        Ok(Some((instance, watermark, data)))
    }

    fn set_state(&self, state: IndexState) {
        let mut current = self.state.write();
        if *current != IndexState::Destroyed {
            *current = state;
        }
    }
}

impl fmt::Debug for VectorIndexHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VectorIndexHandle")
            .field("region_id", &self.region_id)
            .field("state", &self.state())
            .field("watermark", &self.watermark())
            .field("stale", &self.is_stale())
            .field("busy", &self.running_op())
            .finish()
    }
}

/// Exclusive lifecycle-writer slot on one handle.
///
/// Dropping the guard without installing restores the prior state, so a
/// failed operation leaves the handle as it found it.
#[derive(Debug)]
pub struct LifecycleGuard {
    handle: Arc<VectorIndexHandle>,
    op: LifecycleOp,
    prior: Option<(IndexState, bool)>,
}

impl LifecycleGuard {
    pub fn op(&self) -> LifecycleOp {
        self.op
    }

    pub fn handle(&self) -> &Arc<VectorIndexHandle> {
        &self.handle
    }

    /// Move the handle into a transitional state and start capturing writes
    pub fn enter(&mut self, state: IndexState) {
        let handle = &self.handle;
        let mut captured = handle.captured.lock();
        if self.prior.is_none() {
            self.prior = Some((handle.state(), handle.is_stale()));
        }
        // Marks arriving after this point still apply to the new index.
        handle.stale.store(false, Ordering::Release);
        if captured.is_none() {
            *captured = Some(Vec::new());
        }
        handle.set_state(state);
        debug!("🔧 Region {} vector index -> {}", handle.region_id, state);
    }

    /// Publish a fully built index, replaying writes captured meanwhile
    pub fn install(mut self, instance: IndexInstance) -> Result<LogId> {
        let handle = self.handle.clone();
        let mut captured = handle.captured.lock();
        if handle.state() == IndexState::Destroyed {
            *captured = None;
            return Err(VectorIndexError::Rejected(format!(
                "region {} was destroyed during {}",
                handle.region_id, self.op
            )));
        }

        handle.switching.store(true, Ordering::Release);
        let buffered = captured.take().unwrap_or_default();
        let mut replayed = 0usize;
        let mut result = Ok(());
        for entry in &buffered {
            match instance.apply(entry.log_id, &entry.mutation) {
                Ok(applied) => replayed += applied as usize,
                Err(e) => {
                    result = Err(VectorIndexError::ReplayFailed {
                        log_id: entry.log_id,
                        reason: e.to_string(),
                    });
                    break;
                }
            }
        }
        if let Err(e) = result {
            handle.switching.store(false, Ordering::Release);
            warn!("❌ Region {} install aborted: {}", handle.region_id, e);
            return Err(e);
        }

        let watermark = instance.watermark();
        handle.instance.store(Some(Arc::new(instance)));
        *handle.last_rebuild_at.lock() = Some(Instant::now());
        handle.set_state(if handle.is_stale() {
            IndexState::Stale
        } else {
            IndexState::Ready
        });
        handle.switching.store(false, Ordering::Release);
        self.prior = None;

        info!(
            "✅ Region {} vector index installed by {} at watermark {} ({} captured writes)",
            handle.region_id, self.op, watermark, replayed
        );
        Ok(watermark)
    }
}

impl Drop for LifecycleGuard {
    fn drop(&mut self) {
        if let Some((state, stale)) = self.prior.take() {
            *self.handle.captured.lock() = None;
            if stale {
                self.handle.stale.store(true, Ordering::Release);
            }
            self.handle.set_state(state);
        }
        *self.handle.busy.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::distance::MetricType;
    use crate::core::types::IndexParameter;
    use crate::index::FlatIndex;

    fn instance(watermark: LogId) -> IndexInstance {
        let index = FlatIndex::new(IndexParameter::Flat { dimension: 2, metric: MetricType::L2 });
        IndexInstance::new(Box::new(index), watermark)
    }

    fn upsert(id: u64) -> WalMutation {
        WalMutation::Upsert(vec![VectorWithId::new(id, vec![id as f32, 0.0])])
    }

    #[test]
    fn test_second_writer_rejected() {
        let handle = VectorIndexHandle::new(1);
        let guard = handle.try_begin(LifecycleOp::Rebuild).unwrap();
        let err = handle.try_begin(LifecycleOp::Save).unwrap_err();
        assert!(matches!(err, VectorIndexError::Rejected(_)));
        drop(guard);
        assert!(handle.try_begin(LifecycleOp::Save).is_ok());
    }

    #[test]
    fn test_guard_debug_names_operation() {
        let handle = VectorIndexHandle::new(7);
        let guard = handle.try_begin(LifecycleOp::Rebuild).unwrap();
        let shown = format!("{:?}", guard);
        assert!(shown.contains("Rebuild"));
        assert!(shown.contains("region_id: 7"));
    }

    #[test]
    fn test_failed_operation_restores_state() {
        let handle = VectorIndexHandle::new(1);
        {
            let mut guard = handle.try_begin(LifecycleOp::LoadOrBuild).unwrap();
            guard.enter(IndexState::Building);
            assert_eq!(handle.state(), IndexState::Building);
        }
        assert_eq!(handle.state(), IndexState::Uninitialized);
        assert!(handle.current().is_none());
        assert!(!handle.is_busy());
    }

    #[test]
    fn test_apply_is_idempotent_below_watermark() {
        let handle = VectorIndexHandle::new(1);
        let mut guard = handle.try_begin(LifecycleOp::LoadOrBuild).unwrap();
        guard.enter(IndexState::Building);
        guard.install(instance(5)).unwrap();

        assert!(!handle.apply(5, &upsert(1)).unwrap());
        assert!(handle.apply(6, &upsert(1)).unwrap());
        assert_eq!(handle.watermark(), 6);
        assert_eq!(handle.state(), IndexState::Ready);
    }

    #[test]
    fn test_writes_during_rebuild_reach_new_index() {
        let handle = VectorIndexHandle::new(1);
        let mut guard = handle.try_begin(LifecycleOp::LoadOrBuild).unwrap();
        guard.enter(IndexState::Building);
        guard.install(instance(0)).unwrap();

        let mut guard = handle.try_begin(LifecycleOp::Rebuild).unwrap();
        guard.enter(IndexState::Rebuilding);
        let before = handle.current().unwrap();
        handle.apply(1, &upsert(10)).unwrap();
        handle.apply(2, &upsert(11)).unwrap();
        guard.install(instance(1)).unwrap();

        let after = handle.current().unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(after.watermark(), 2);
        assert_eq!(after.index().count(), 1);
        assert_eq!(before.index().count(), 2);
    }

    #[test]
    fn test_stale_survives_failed_rebuild() {
        let handle = VectorIndexHandle::new(1);
        let mut guard = handle.try_begin(LifecycleOp::LoadOrBuild).unwrap();
        guard.enter(IndexState::Building);
        guard.install(instance(0)).unwrap();
        handle.mark_stale();
        assert_eq!(handle.state(), IndexState::Stale);

        {
            let mut guard = handle.try_begin(LifecycleOp::Rebuild).unwrap();
            guard.enter(IndexState::Rebuilding);
            assert!(!handle.is_stale());
        }
        assert!(handle.is_stale());
        assert_eq!(handle.state(), IndexState::Stale);
    }

    #[test]
    fn test_destroy_rejects_install() {
        let handle = VectorIndexHandle::new(1);
        let mut guard = handle.try_begin(LifecycleOp::LoadOrBuild).unwrap();
        guard.enter(IndexState::Building);
        handle.destroy();
        assert!(guard.install(instance(0)).is_err());
        assert_eq!(handle.state(), IndexState::Destroyed);
        assert!(handle.try_begin(LifecycleOp::Save).is_err());
    }
}
