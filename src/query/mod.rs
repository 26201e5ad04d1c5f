// Copyright 2025 ProximaDB
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.

//! Region query engine: filtered k-NN search, point lookups, scans, counts

pub mod filter;
pub mod reader;
pub mod types;

pub use filter::{FieldCondition, FilterExpr};
pub use reader::VectorReader;
pub use types::{
    BatchSearchResult, FilterMode, QueryOutcome, QueryParameter, RegionMetrics, ScanContext, ScanPage,
    SearchFilter, SearchParameter, SearchStrategy, SearchTiming,
};
