// Copyright 2025 ProximaDB
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.

//! Region query engine.
//!
//! A [`VectorReader`] pins one engine snapshot and one installed index for
//! its lifetime, so every call observes a single consistent state even if a
//! rebuild swaps the handle meanwhile. Every returned id is checked against
//! the region's current range.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use super::filter::FilterExpr;
use super::types::{
    BatchSearchResult, FilterMode, QueryOutcome, QueryParameter, RegionMetrics, ScanContext, ScanPage,
    SearchParameter, SearchStrategy, SearchTiming,
};
use crate::compute::distance::MetricType;
use crate::core::config::SearchConfig;
use crate::core::error::{Result, VectorIndexError};
use crate::core::region::{KeyRange, RegionInfo};
use crate::core::types::{VectorId, VectorWithDistance, VectorWithId};
use crate::index::handle::{IndexInstance, IndexState, VectorIndexHandle};
use crate::index::{IdFilter, TopK};
use crate::storage::codec::VectorCodec;
use crate::storage::engine::{ColumnFamily, EngineSnapshot};

type Row = BTreeMap<String, serde_json::Value>;

/// Wall-clock bound of one search call. Checked between queries and
/// between post-filter rounds.
#[derive(Debug, Clone, Copy)]
struct Deadline {
    at: Option<Instant>,
    timeout_ms: u64,
}

impl Deadline {
    fn after(timeout_ms: u64) -> Self {
        Self {
            at: Instant::now().checked_add(Duration::from_millis(timeout_ms)),
            timeout_ms,
        }
    }

    fn check(&self) -> Result<()> {
        match self.at {
            Some(at) if Instant::now() >= at => Err(VectorIndexError::Timeout(self.timeout_ms)),
            _ => Ok(()),
        }
    }
}

/// Candidate ids resolved before distance computation
enum Candidates {
    All,
    Ids(HashSet<VectorId>),
}

pub struct VectorReader {
    region: Arc<RegionInfo>,
    snapshot: Arc<dyn EngineSnapshot>,
    handle: Option<Arc<VectorIndexHandle>>,
    instance: Option<Arc<IndexInstance>>,
    config: SearchConfig,
}

impl VectorReader {
    pub fn new(
        region: Arc<RegionInfo>,
        snapshot: Arc<dyn EngineSnapshot>,
        handle: Option<Arc<VectorIndexHandle>>,
        config: SearchConfig,
    ) -> Self {
        let instance = handle
            .as_ref()
            .filter(|h| h.state() != IndexState::Destroyed)
            .and_then(|h| h.current());
        Self {
            region,
            snapshot,
            handle,
            instance,
            config,
        }
    }

    pub fn region(&self) -> &RegionInfo {
        &self.region
    }

    fn id_range(&self) -> (VectorId, VectorId) {
        self.region.id_range()
    }

    fn in_range(&self, id: VectorId) -> bool {
        let (min, max) = self.id_range();
        id >= min && id < max
    }

    fn key(&self, id: VectorId) -> Vec<u8> {
        VectorCodec::encode_vector_key(self.region.partition_id, id)
    }

    fn instance(&self) -> Result<&Arc<IndexInstance>> {
        self.instance.as_ref().ok_or_else(|| {
            VectorIndexError::NotReady(format!("region {} has no vector index installed", self.region.id))
        })
    }

    /// Clamp a caller range to the region range
    fn clamp(&self, range: &KeyRange) -> KeyRange {
        KeyRange::new(
            range.start_key.clone().max(self.region.range.start_key.clone()),
            range.end_key.clone().min(self.region.range.end_key.clone()),
        )
    }

    /// K nearest neighbours for each query vector.
    ///
    /// The filter strategy is picked from what the request carries: explicit
    /// ids, then a scalar predicate, then a table predicate. A table predicate
    /// combined with ids or a scalar pre-filter narrows their candidates.
    pub async fn batch_search(&self, queries: &[Vec<f32>], param: &SearchParameter) -> Result<BatchSearchResult> {
        if param.top_n > self.config.max_top_n {
            return Err(VectorIndexError::InvalidArgument(format!(
                "top_n {} exceeds limit {}",
                param.top_n, self.config.max_top_n
            )));
        }
        for expr in [&param.filter.scalar, &param.filter.table].into_iter().flatten() {
            expr.validate()?;
        }

        let timeout_ms = param.timeout_ms.unwrap_or(self.config.default_timeout_ms);
        let deadline = Deadline::after(timeout_ms);
        tokio::time::timeout(Duration::from_millis(timeout_ms), self.search_inner(queries, param, &deadline))
            .await
            .map_err(|_| VectorIndexError::Timeout(timeout_ms))?
    }

    fn choose_strategy(param: &SearchParameter) -> SearchStrategy {
        let filter = &param.filter;
        if filter.vector_ids.is_some() {
            SearchStrategy::VectorIdPreFilter
        } else if filter.scalar.is_some() {
            match filter.scalar_mode {
                FilterMode::Pre => SearchStrategy::ScalarPreFilter,
                FilterMode::Post => SearchStrategy::ScalarPostFilter,
            }
        } else if filter.table.is_some() {
            SearchStrategy::TableCoprocessor
        } else {
            SearchStrategy::Ann
        }
    }

    async fn search_inner(
        &self,
        queries: &[Vec<f32>],
        param: &SearchParameter,
        deadline: &Deadline,
    ) -> Result<BatchSearchResult> {
        deadline.check()?;
        let started = Instant::now();
        let instance = self.instance()?.clone();
        let index = instance.index();
        let strategy = Self::choose_strategy(param);
        let (min_id, max_id) = self.id_range();
        let top_n = param.top_n;

        let candidates = match strategy {
            SearchStrategy::VectorIdPreFilter => {
                let ids = param.filter.vector_ids.as_deref().unwrap_or_default();
                let ids = ids.iter().copied().filter(|id| self.in_range(*id)).collect();
                Candidates::Ids(self.refine_by_table(ids, param.filter.table.as_ref()).await?)
            }
            SearchStrategy::ScalarPreFilter => {
                let ids = match &param.filter.scalar {
                    Some(expr) => self.resolve_scalar(expr).await?,
                    None => HashSet::new(),
                };
                Candidates::Ids(self.refine_by_table(ids, param.filter.table.as_ref()).await?)
            }
            _ => Candidates::All,
        };
        let filter_micros = started.elapsed().as_micros() as u64;
        deadline.check()?;

        let search_started = Instant::now();
        let mut hits = Vec::with_capacity(queries.len());
        if top_n > 0 {
            match (strategy, &candidates) {
                (SearchStrategy::VectorIdPreFilter, Candidates::Ids(ids)) => {
                    let stored = self.load_vectors(ids).await?;
                    for query in queries {
                        deadline.check()?;
                        hits.push(exact_search(index.metric(), index.dimension(), query, &stored, top_n)?);
                    }
                }
                (SearchStrategy::ScalarPreFilter, Candidates::Ids(ids)) => {
                    let filter = IdFilter::range(min_id, max_id).with_ids(ids.clone());
                    for query in queries {
                        deadline.check()?;
                        if index.supports_filter() {
                            hits.push(index.search(query, top_n, Some(&filter))?);
                        } else {
                            let found = self
                                .post_filter_search(&instance, query, top_n, deadline, |id| {
                                    std::future::ready(Ok(filter.allows(id)))
                                })
                                .await?;
                            hits.push(found);
                        }
                    }
                }
                (SearchStrategy::ScalarPostFilter, _) | (SearchStrategy::TableCoprocessor, _) => {
                    let scalar = param.filter.scalar.as_ref();
                    let table = param.filter.table.as_ref();
                    for query in queries {
                        deadline.check()?;
                        let found = self
                            .post_filter_search(&instance, query, top_n, deadline, |id| {
                                self.row_matches(id, scalar, table)
                            })
                            .await?;
                        hits.push(found);
                    }
                }
                _ => {
                    let filter = IdFilter::range(min_id, max_id);
                    for query in queries {
                        deadline.check()?;
                        hits.push(index.search(query, top_n, Some(&filter))?);
                    }
                }
            }
        } else {
            hits.resize_with(queries.len(), Vec::new);
        }
        let search_micros = search_started.elapsed().as_micros() as u64;

        let metric = index.metric();
        let mut results = Vec::with_capacity(hits.len());
        for query_hits in hits {
            deadline.check()?;
            let mut vectors = Vec::with_capacity(query_hits.len());
            for (id, distance) in query_hits.into_iter().filter(|(id, _)| self.in_range(*id)) {
                vectors.push(VectorWithDistance {
                    vector_with_id: self.fill(id, &param.query).await?,
                    distance,
                    metric,
                });
            }
            results.push(vectors);
        }

        let timing = SearchTiming {
            strategy,
            filter_micros,
            search_micros,
            total_micros: started.elapsed().as_micros() as u64,
        };
        debug!(
            "🔍 Region {} batch search: {} queries via {} in {}µs",
            self.region.id,
            queries.len(),
            strategy,
            timing.total_micros
        );
        Ok(BatchSearchResult { results, timing })
    }

    /// Over-fetch from the index and keep hits passing `accept`, doubling the
    /// fetch size until `top_n` survive or the index is exhausted
    async fn post_filter_search<F, Fut>(
        &self,
        instance: &IndexInstance,
        query: &[f32],
        top_n: usize,
        deadline: &Deadline,
        accept: F,
    ) -> Result<Vec<(VectorId, f32)>>
    where
        F: Fn(VectorId) -> Fut,
        Fut: std::future::Future<Output = Result<bool>>,
    {
        let index = instance.index();
        let (min_id, max_id) = self.id_range();
        let range = IdFilter::range(min_id, max_id);
        let mut fetch = top_n.saturating_mul(self.config.table_filter_overfetch.max(1));
        let mut verdicts: HashMap<VectorId, bool> = HashMap::new();

        loop {
            deadline.check()?;
            let hits = index.search(query, fetch, Some(&range))?;
            let mut kept = Vec::with_capacity(top_n);
            for &(id, distance) in &hits {
                let pass = match verdicts.get(&id) {
                    Some(pass) => *pass,
                    None => {
                        let pass = accept(id).await?;
                        verdicts.insert(id, pass);
                        pass
                    }
                };
                if pass {
                    kept.push((id, distance));
                    if kept.len() == top_n {
                        break;
                    }
                }
            }
            if kept.len() >= top_n || hits.len() < fetch {
                return Ok(kept);
            }
            fetch = fetch.saturating_mul(2);
        }
    }

    async fn row_matches(&self, id: VectorId, scalar: Option<&FilterExpr>, table: Option<&FilterExpr>) -> Result<bool> {
        if let Some(expr) = scalar {
            match self.load_row(ColumnFamily::Scalar, id).await? {
                Some(row) if expr.matches(&row) => {}
                _ => return Ok(false),
            }
        }
        if let Some(expr) = table {
            match self.load_row(ColumnFamily::Table, id).await? {
                Some(row) if expr.matches(&row) => {}
                _ => return Ok(false),
            }
        }
        Ok(true)
    }

    async fn load_row(&self, cf: ColumnFamily, id: VectorId) -> Result<Option<Row>> {
        let Some(raw) = self.snapshot.get(cf, &self.key(id)).await? else {
            return Ok(None);
        };
        let row = match cf {
            ColumnFamily::Table => VectorCodec::decode_table(&raw)?,
            _ => VectorCodec::decode_scalar(&raw)?,
        };
        Ok(Some(row))
    }

    /// Ids in the region whose scalar data satisfies `expr`
    async fn resolve_scalar(&self, expr: &FilterExpr) -> Result<HashSet<VectorId>> {
        const PAGE: usize = 1024;
        let mut matched = HashSet::new();
        let mut cursor = self.region.range.clone();
        loop {
            let page = self.snapshot.scan(ColumnFamily::Scalar, &cursor, PAGE, false).await?;
            for (key, value) in &page {
                if expr.matches(&VectorCodec::decode_scalar(value)?) {
                    matched.insert(VectorCodec::decode_vector_id(key)?);
                }
            }
            match page.last() {
                Some((last, _)) if page.len() == PAGE => {
                    let mut next = last.clone();
                    next.push(0);
                    cursor.start_key = next;
                }
                _ => return Ok(matched),
            }
        }
    }

    async fn refine_by_table(&self, ids: HashSet<VectorId>, table: Option<&FilterExpr>) -> Result<HashSet<VectorId>> {
        let Some(expr) = table else {
            return Ok(ids);
        };
        let mut kept = HashSet::with_capacity(ids.len());
        for id in ids {
            if self.row_matches(id, None, Some(expr)).await? {
                kept.insert(id);
            }
        }
        Ok(kept)
    }

    async fn load_vectors(&self, ids: &HashSet<VectorId>) -> Result<Vec<(VectorId, Vec<f32>)>> {
        let mut stored = Vec::with_capacity(ids.len());
        for &id in ids {
            if let Some(raw) = self.snapshot.get(ColumnFamily::Vector, &self.key(id)).await? {
                stored.push((id, VectorCodec::decode_vector(&raw)?));
            }
        }
        Ok(stored)
    }

    /// Assemble the stored vector with the requested attachments
    async fn fill(&self, id: VectorId, param: &QueryParameter) -> Result<VectorWithId> {
        let key = self.key(id);
        let mut vector = VectorWithId {
            id,
            ..Default::default()
        };
        if param.with_vector_data {
            if let Some(raw) = self.snapshot.get(ColumnFamily::Vector, &key).await? {
                vector.vector = Some(VectorCodec::decode_vector(&raw)?);
            }
        }
        if param.with_scalar_data {
            if let Some(mut scalar) = self.load_row(ColumnFamily::Scalar, id).await? {
                if !param.selected_scalar_keys.is_empty() {
                    scalar.retain(|k, _| param.selected_scalar_keys.contains(k));
                }
                vector.scalar_data = Some(scalar);
            }
        }
        if param.with_table_data {
            vector.table_data = self.load_row(ColumnFamily::Table, id).await?;
        }
        Ok(vector)
    }

    /// Fetch vectors by id; missing ids are reported individually
    pub async fn batch_query(&self, ids: &[VectorId], param: &QueryParameter) -> Result<Vec<QueryOutcome>> {
        let mut outcomes = Vec::with_capacity(ids.len());
        for &id in ids {
            let present = self.in_range(id)
                && self
                    .snapshot
                    .get(ColumnFamily::Vector, &self.key(id))
                    .await?
                    .is_some();
            outcomes.push(if present {
                QueryOutcome::Found(self.fill(id, param).await?)
            } else {
                QueryOutcome::NotFound(id)
            });
        }
        Ok(outcomes)
    }

    /// One page of stored vectors in id order
    pub async fn scan_query(&self, ctx: &ScanContext) -> Result<ScanPage> {
        if ctx.limit == 0 || ctx.limit > self.config.max_scan_limit {
            return Err(VectorIndexError::InvalidArgument(format!(
                "scan limit {} outside 1..={}",
                ctx.limit, self.config.max_scan_limit
            )));
        }
        if let Some(expr) = &ctx.scalar_filter {
            expr.validate()?;
        }

        let partition = self.region.partition_id;
        let end_id = ctx.end_id.unwrap_or(VectorId::MAX);
        let mut cursor = self.clamp(&KeyRange::new(
            VectorCodec::encode_vector_key(partition, ctx.start_id),
            VectorCodec::encode_vector_key(partition, end_id),
        ));

        let page_size = ctx.limit.max(64);
        let mut skipped = 0usize;
        let mut vectors = Vec::with_capacity(ctx.limit);
        loop {
            let page = self.snapshot.scan(ColumnFamily::Vector, &cursor, page_size, ctx.reverse).await?;
            for (key, _) in &page {
                let id = VectorCodec::decode_vector_id(key)?;
                if let Some(expr) = &ctx.scalar_filter {
                    match self.load_row(ColumnFamily::Scalar, id).await? {
                        Some(row) if expr.matches(&row) => {}
                        _ => continue,
                    }
                }
                if skipped < ctx.offset {
                    skipped += 1;
                    continue;
                }
                if vectors.len() == ctx.limit {
                    let next_id = if ctx.reverse { id.saturating_add(1) } else { id };
                    return Ok(ScanPage {
                        next_id: Some(next_id),
                        vectors,
                    });
                }
                vectors.push(self.fill(id, &ctx.query).await?);
            }

            let Some((last, _)) = page.last() else { break };
            if page.len() < page_size {
                break;
            }
            if ctx.reverse {
                cursor.end_key = last.clone();
            } else {
                let mut next = last.clone();
                next.push(0);
                cursor.start_key = next;
            }
        }
        Ok(ScanPage { vectors, next_id: None })
    }

    /// Smallest or largest vector id stored in `range` within the region
    pub async fn get_border_id(&self, range: &KeyRange, get_min: bool) -> Result<VectorId> {
        let range = self.clamp(range);
        let page = self.snapshot.scan(ColumnFamily::Vector, &range, 1, !get_min).await?;
        match page.first() {
            Some((key, _)) => VectorCodec::decode_vector_id(key),
            None => Err(VectorIndexError::NotFound(format!(
                "region {} has no vectors in range",
                self.region.id
            ))),
        }
    }

    /// Exact number of stored vectors in `range` within the region
    pub async fn count(&self, range: &KeyRange) -> Result<u64> {
        let range = self.clamp(range);
        Ok(self.snapshot.range_stats(ColumnFamily::Vector, &range).await?.count)
    }

    pub async fn get_region_metrics(&self) -> Result<RegionMetrics> {
        let range = &self.region.range;
        let vectors = self.snapshot.range_stats(ColumnFamily::Vector, range).await?;
        let scalar = self.snapshot.range_stats(ColumnFamily::Scalar, range).await?;
        let table = self.snapshot.range_stats(ColumnFamily::Table, range).await?;

        let border = |result: Result<VectorId>| match result {
            Ok(id) => Ok(Some(id)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        };
        let min_id = border(self.get_border_id(range, true).await)?;
        let max_id = border(self.get_border_id(range, false).await)?;

        Ok(RegionMetrics {
            region_id: self.region.id,
            vector_count: vectors.count,
            vector_bytes: vectors.bytes,
            scalar_bytes: scalar.bytes,
            table_bytes: table.bytes,
            min_id,
            max_id,
            index: self.instance.as_ref().map(|i| i.index().metrics()),
            index_state: self
                .handle
                .as_ref()
                .map_or(IndexState::Uninitialized, |h| h.state()),
            watermark: self.instance.as_ref().map_or(0, |i| i.watermark()),
        })
    }
}

/// Exact top-n over stored vectors
fn exact_search(
    metric: MetricType,
    dimension: usize,
    query: &[f32],
    stored: &[(VectorId, Vec<f32>)],
    top_n: usize,
) -> Result<Vec<(VectorId, f32)>> {
    if query.len() != dimension {
        return Err(VectorIndexError::InvalidArgument(format!(
            "query has dimension {}, index expects {}",
            query.len(),
            dimension
        )));
    }
    let mut top = TopK::new(top_n);
    for (id, vector) in stored {
        if vector.len() == dimension {
            top.push(*id, metric.distance(query, vector));
        }
    }
    Ok(top.into_sorted())
}
