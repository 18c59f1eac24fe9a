//! Error types for the analytics store.

use crate::types::{Hash, ReviewId, StoreId};
use thiserror::Error;

/// Main error type for store, sync and cycle operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Product not found: {0}")]
    ProductNotFound(String),

    #[error("Review not found: {0}")]
    ReviewNotFound(ReviewId),

    #[error("Family anchor {parent_key} missing for product {asin}")]
    MissingAnchor { asin: String, parent_key: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Store is locked by another process")]
    Locked,

    #[error("Store not initialized")]
    NotInitialized,

    #[error("Invalid store format: {0}")]
    InvalidFormat(String),

    #[error("Checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: u32, got: u32 },

    #[error("Hash mismatch: expected {expected}, got {got}")]
    HashMismatch { expected: Hash, got: Hash },

    #[error("Invalid active pointer token: {0:?}")]
    InvalidPointer(String),

    #[error("Active pointer error: {0}")]
    Pointer(String),

    #[error("Snapshot sync {from} -> {to} failed: {reason}")]
    Sync {
        from: StoreId,
        to: StoreId,
        reason: String,
    },

    #[error("Aggregation failed for {asin}: {reason}")]
    Aggregation { asin: String, reason: String },

    #[error("Another cycle or maintenance job owns the standby store")]
    CycleInProgress,

    #[error("Cycle exceeded its timeout after {processed} products")]
    CycleTimedOut { processed: usize },

    #[error("Cycle cancelled after {processed} products")]
    Cancelled { processed: usize },

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

impl StoreError {
    pub(crate) fn aggregation(asin: &str, reason: impl Into<String>) -> Self {
        StoreError::Aggregation {
            asin: asin.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for StoreError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for StoreError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        StoreError::Deserialization(e.to_string())
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
