//! Error types for SlateChain

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ChainError {
    #[error("integrity failure: {0}")]
    IntegrityFailure(String),
    #[error("invalid block: {0}")]
    InvalidBlock(String),
    #[error("invalid transaction: {0}")]
    InvalidTransaction(String),
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    #[error("insufficient balance: needed {needed}, available {available}")]
    InsufficientBalance { needed: String, available: String },
    #[error("nonce mismatch: expected {expected}, got {got}")]
    NonceMismatch { expected: u64, got: u64 },
    #[error("duplicate transaction: {0}")]
    DuplicateTransaction(String),
    #[error("mempool is full")]
    MempoolFull,
    #[error("address already occupied: {0}")]
    AddressOccupied(String),
    #[error("unknown method: {0}")]
    UnknownMethod(String),
    #[error("wrong argument count for {method}: expected {expected}, got {got}")]
    WrongArgumentCount {
        method: String,
        expected: usize,
        got: usize,
    },
    #[error("contract parse error: {0}")]
    ContractParse(String),
    #[error("execution error: {0}")]
    Execution(String),
    #[error("execution reverted: {0}")]
    Reverted(String),
    #[error("execution limit exceeded: {0}")]
    ExecutionLimit(String),
    #[error("execution timed out after {0} ms")]
    ExecutionTimeout(u64),
    #[error("storage error: {0}")]
    StorageError(String),
    #[error("serialization error: {0}")]
    SerializationError(String),
    #[error("sync error: {0}")]
    SyncError(String),
    #[error("IO error: {0}")]
    IoError(String),
}

impl From<std::io::Error> for ChainError {
    fn from(err: std::io::Error) -> Self {
        ChainError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for ChainError {
    fn from(err: serde_json::Error) -> Self {
        ChainError::SerializationError(err.to_string())
    }
}

/// Convenience alias used across the crate
pub type Result<T> = std::result::Result<T, ChainError>;
