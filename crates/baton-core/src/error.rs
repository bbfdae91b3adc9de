//! Storage error taxonomy.

use thiserror::Error;

use crate::reference::StoreTier;

/// Storage error types.
///
/// `NotFound` is a distinct, catchable condition from `Transport`: a missing
/// key can be recovered (TTL sweep, direct-fetch probing) while a transport
/// failure is surfaced to the caller.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("payload of {size} bytes exceeds {tier} tier limit of {limit} bytes")]
    SizeViolation {
        tier: StoreTier,
        size: u64,
        limit: u64,
    },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("corrupt payload: {0}")]
    Corruption(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("invalid reference: {0}")]
    InvalidRef(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl StorageError {
    /// True when the error means the key simply does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization(value.to_string())
    }
}
