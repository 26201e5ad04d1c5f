/*
 * Copyright 2025 Vijaykumar Singh
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

//! # ProximaDB Region Vector Index
//!
//! Lifecycle manager and query engine for per-region ANN indexes backed by a
//! key-value engine and a write-ahead log.
//!
//! ## Components
//!
//! - **Handle**: hot-swappable reference to a region's index plus its state
//! - **Lifecycle**: build, load-or-build with WAL replay, save, rebuild
//! - **Scheduler**: bounded background pool with per-class admission
//! - **Manager**: bootstrap, lifecycle façade and periodic scrub
//! - **Reader**: filtered k-NN search, point queries, scans and counts

pub mod compute;
pub mod core;
pub mod index;
pub mod query;
pub mod storage;

pub use crate::core::*;
pub use compute::MetricType;
pub use index::{
    BuiltinIndexFactory, IndexFactory, IndexState, VectorIndex, VectorIndexHandle, VectorIndexManager,
};
pub use query::{FilterExpr, FilterMode, SearchParameter, VectorReader};
