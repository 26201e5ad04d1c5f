// Copyright 2025 ProximaDB
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.

//! External collaborators of the vector index: the key-value engine, the
//! write-ahead log and the snapshot store, with local implementations.

pub mod codec;
pub mod engine;
pub mod log;
pub mod snapshot;

pub use codec::VectorCodec;
pub use engine::{ColumnFamily, EngineSnapshot, KeyValue, MemoryEngine, RangeStats, StorageEngine};
pub use log::{LogStorage, MemoryLogStorage};
pub use snapshot::{LocalSnapshotStore, SnapshotData, SnapshotMeta, SnapshotStore};
