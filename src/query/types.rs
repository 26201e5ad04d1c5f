// Copyright 2025 ProximaDB
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::filter::FilterExpr;
use crate::core::types::{LogId, RegionId, VectorId, VectorWithDistance, VectorWithId};
use crate::index::handle::IndexState;
use crate::index::IndexMetrics;

/// When a scalar predicate is applied relative to the ANN search
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterMode {
    /// Resolve matching ids from scalar data, then search only those
    #[default]
    Pre,
    /// Search first, then drop results failing the predicate
    Post,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchFilter {
    /// Explicit candidate ids; takes precedence over the scalar predicate
    pub vector_ids: Option<Vec<VectorId>>,

    pub scalar: Option<FilterExpr>,

    #[serde(default)]
    pub scalar_mode: FilterMode,

    /// Predicate over wide table rows
    pub table: Option<FilterExpr>,
}

/// Which data to attach to returned vectors
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryParameter {
    pub with_vector_data: bool,
    pub with_scalar_data: bool,
    /// Restrict returned scalar data to these keys; empty returns all
    pub selected_scalar_keys: Vec<String>,
    pub with_table_data: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchParameter {
    pub top_n: usize,
    #[serde(default)]
    pub query: QueryParameter,
    #[serde(default)]
    pub filter: SearchFilter,
    /// Per-call deadline, falls back to `search.default_timeout_ms`
    pub timeout_ms: Option<u64>,
}

impl SearchParameter {
    pub fn top_n(top_n: usize) -> Self {
        Self {
            top_n,
            query: QueryParameter::default(),
            filter: SearchFilter::default(),
            timeout_ms: None,
        }
    }

    pub fn with_vector_ids(mut self, ids: Vec<VectorId>) -> Self {
        self.filter.vector_ids = Some(ids);
        self
    }

    pub fn with_scalar_filter(mut self, filter: FilterExpr, mode: FilterMode) -> Self {
        self.filter.scalar = Some(filter);
        self.filter.scalar_mode = mode;
        self
    }

    pub fn with_table_filter(mut self, filter: FilterExpr) -> Self {
        self.filter.table = Some(filter);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStrategy {
    /// Unfiltered ANN restricted to the region range
    Ann,
    VectorIdPreFilter,
    ScalarPreFilter,
    ScalarPostFilter,
    TableCoprocessor,
}

impl fmt::Display for SearchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ann => "ann",
            Self::VectorIdPreFilter => "vector_id_pre_filter",
            Self::ScalarPreFilter => "scalar_pre_filter",
            Self::ScalarPostFilter => "scalar_post_filter",
            Self::TableCoprocessor => "table_coprocessor",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchTiming {
    pub strategy: SearchStrategy,
    /// Resolving candidate ids from ids, scalar or table data
    pub filter_micros: u64,
    pub search_micros: u64,
    pub total_micros: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchSearchResult {
    /// One result list per query vector, closest first
    pub results: Vec<Vec<VectorWithDistance>>,
    pub timing: SearchTiming,
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    Found(VectorWithId),
    NotFound(VectorId),
}

impl QueryOutcome {
    pub fn found(&self) -> Option<&VectorWithId> {
        match self {
            QueryOutcome::Found(v) => Some(v),
            QueryOutcome::NotFound(_) => None,
        }
    }
}

/// One page of a scan. Reissue with `start_id = next_id` (or `end_id` when
/// reversed) to continue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanContext {
    pub start_id: VectorId,
    /// Exclusive upper bound, region end when absent
    pub end_id: Option<VectorId>,
    pub limit: usize,
    /// Matching entries skipped before the page starts
    pub offset: usize,
    pub reverse: bool,
    pub scalar_filter: Option<FilterExpr>,
    #[serde(default)]
    pub query: QueryParameter,
}

impl ScanContext {
    pub fn new(start_id: VectorId, limit: usize) -> Self {
        Self {
            start_id,
            end_id: None,
            limit,
            offset: 0,
            reverse: false,
            scalar_filter: None,
            query: QueryParameter::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScanPage {
    pub vectors: Vec<VectorWithId>,
    /// Bound to reissue the scan with, `None` when the range is exhausted
    pub next_id: Option<VectorId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionMetrics {
    pub region_id: RegionId,
    pub vector_count: u64,
    pub vector_bytes: u64,
    pub scalar_bytes: u64,
    pub table_bytes: u64,
    pub min_id: Option<VectorId>,
    pub max_id: Option<VectorId>,
    pub index: Option<IndexMetrics>,
    pub index_state: IndexState,
    pub watermark: LogId,
}
