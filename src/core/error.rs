// Copyright 2025 ProximaDB
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.

//! Error taxonomy for vector index lifecycle and query operations

use thiserror::Error;

pub type Result<T> = std::result::Result<T, VectorIndexError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum VectorIndexError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Vector index not ready: {0}")]
    NotReady(String),

    #[error("Build failed: {0}")]
    BuildFailed(String),

    #[error("Replay failed at log id {log_id}: {reason}")]
    ReplayFailed { log_id: u64, reason: String },

    #[error("Save failed: {0}")]
    SaveFailed(String),

    #[error("Rejected: {0}")]
    Rejected(String),

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Corruption detected: {0}")]
    Corrupt(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl VectorIndexError {
    /// Whether re-issuing the same call later may succeed without caller changes.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            VectorIndexError::BuildFailed(_)
                | VectorIndexError::ReplayFailed { .. }
                | VectorIndexError::SaveFailed(_)
                | VectorIndexError::Rejected(_)
                | VectorIndexError::Timeout(_)
                | VectorIndexError::NotReady(_)
                | VectorIndexError::Storage(_)
        )
    }

    pub fn is_corrupt(&self) -> bool {
        matches!(self, VectorIndexError::Corrupt(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, VectorIndexError::NotFound(_))
    }
}

impl From<std::io::Error> for VectorIndexError {
    fn from(err: std::io::Error) -> Self {
        VectorIndexError::Storage(err.to_string())
    }
}

impl From<bincode::Error> for VectorIndexError {
    fn from(err: bincode::Error) -> Self {
        VectorIndexError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for VectorIndexError {
    fn from(err: serde_json::Error) -> Self {
        VectorIndexError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for VectorIndexError {
    fn from(err: toml::de::Error) -> Self {
        VectorIndexError::InvalidArgument(format!("invalid config: {}", err))
    }
}

impl From<tokio::task::JoinError> for VectorIndexError {
    fn from(err: tokio::task::JoinError) -> Self {
        VectorIndexError::Internal(format!("task join failed: {}", err))
    }
}
