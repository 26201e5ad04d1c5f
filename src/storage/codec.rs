// Copyright 2025 ProximaDB
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.

//! Key and value encoding for vector data in the storage engine.
//!
//! Key layout: `'r' | partition_id (u64 BE) | vector_id (u64 BE)`. Big-endian
//! ids keep the engine's byte order identical to vector id order, so a region's
//! key range maps onto a contiguous id range.

use crate::core::error::{Result, VectorIndexError};
use crate::core::region::KeyRange;
use crate::core::types::{PartitionId, ScalarData, TableData, VectorId};

const KEY_PREFIX: u8 = b'r';
const PARTITION_PREFIX_LEN: usize = 9;
const VECTOR_KEY_LEN: usize = 17;

pub struct VectorCodec;

impl VectorCodec {
    pub fn encode_partition_prefix(partition_id: PartitionId) -> Vec<u8> {
        let mut key = Vec::with_capacity(PARTITION_PREFIX_LEN);
        key.push(KEY_PREFIX);
        key.extend_from_slice(&partition_id.to_be_bytes());
        key
    }

    pub fn encode_vector_key(partition_id: PartitionId, vector_id: VectorId) -> Vec<u8> {
        let mut key = Self::encode_partition_prefix(partition_id);
        key.extend_from_slice(&vector_id.to_be_bytes());
        key
    }

    pub fn decode_vector_id(key: &[u8]) -> Result<VectorId> {
        if key.len() != VECTOR_KEY_LEN || key[0] != KEY_PREFIX {
            return Err(VectorIndexError::Corrupt(format!(
                "malformed vector key of {} bytes",
                key.len()
            )));
        }
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&key[PARTITION_PREFIX_LEN..]);
        Ok(u64::from_be_bytes(buf))
    }

    /// Maps a range boundary key to the first vector id at or after it.
    ///
    /// Keys sorting before the partition map to 0; keys past the partition map
    /// to `u64::MAX`; short keys are zero padded.
    pub fn decode_bound(partition_id: PartitionId, key: &[u8]) -> VectorId {
        let prefix = Self::encode_partition_prefix(partition_id);
        if key < prefix.as_slice() {
            return 0;
        }
        if !key.starts_with(&prefix) {
            return u64::MAX;
        }
        let rest = &key[PARTITION_PREFIX_LEN..];
        let mut buf = [0u8; 8];
        let n = rest.len().min(8);
        buf[..n].copy_from_slice(&rest[..n]);
        u64::from_be_bytes(buf)
    }

    /// Vector ids `[min, max)` covered by `range` within `partition_id`
    pub fn id_range(partition_id: PartitionId, range: &KeyRange) -> (VectorId, VectorId) {
        (
            Self::decode_bound(partition_id, &range.start_key),
            Self::decode_bound(partition_id, &range.end_key),
        )
    }

    pub fn encode_vector(vector: &[f32]) -> Result<Vec<u8>> {
        Ok(bincode::serialize(vector)?)
    }

    pub fn decode_vector(value: &[u8]) -> Result<Vec<f32>> {
        bincode::deserialize(value)
            .map_err(|e| VectorIndexError::Corrupt(format!("undecodable vector value: {}", e)))
    }

    pub fn encode_scalar(scalar: &ScalarData) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(scalar)?)
    }

    pub fn decode_scalar(value: &[u8]) -> Result<ScalarData> {
        serde_json::from_slice(value)
            .map_err(|e| VectorIndexError::Corrupt(format!("undecodable scalar value: {}", e)))
    }

    pub fn encode_table(table: &TableData) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(table)?)
    }

    pub fn decode_table(value: &[u8]) -> Result<TableData> {
        serde_json::from_slice(value)
            .map_err(|e| VectorIndexError::Corrupt(format!("undecodable table value: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_decode_rejects_short_key() {
        assert!(VectorCodec::decode_vector_id(b"r123").unwrap_err().is_corrupt());
    }

    #[test]
    fn test_bounds_outside_partition() {
        let range = KeyRange::new(
            VectorCodec::encode_partition_prefix(5),
            VectorCodec::encode_partition_prefix(6),
        );
        assert_eq!(VectorCodec::id_range(5, &range), (0, u64::MAX));
        assert_eq!(VectorCodec::decode_bound(5, &VectorCodec::encode_partition_prefix(4)), 0);
    }

    proptest! {
        #[test]
        fn prop_key_order_matches_id_order(p in 0u64..1000, a in any::<u64>(), b in any::<u64>()) {
            let ka = VectorCodec::encode_vector_key(p, a);
            let kb = VectorCodec::encode_vector_key(p, b);
            prop_assert_eq!(ka.cmp(&kb), a.cmp(&b));
            prop_assert_eq!(VectorCodec::decode_vector_id(&ka).unwrap(), a);
            prop_assert_eq!(VectorCodec::decode_bound(p, &ka), a);
        }
    }
}
