use std::sync::{PoisonError, RwLockReadGuard, RwLockWriteGuard};

use thiserror::Error;

/// MongoDB-compatible duplicate key error codes.
const DUPLICATE_KEY_CODES: [i32; 2] = [11000, 11001];

#[derive(Error, Debug)]
pub enum SequenceError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Sequence {sequence} still conflicting after {attempts} attempts")]
    RetriesExhausted { sequence: String, attempts: usize },

    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),
}

impl SequenceError {
    /// Returns the underlying store error, if this failure came from the store.
    pub fn as_store_error(&self) -> Option<&StoreError> {
        match self {
            Self::Store(e) => Some(e),
            _ => None,
        }
    }
}

/// Extension trait for converting lock errors to SequenceError.
pub trait LockResultExt<T> {
    /// Converts a lock error to a SequenceError.
    fn map_lock_err(self) -> Result<T, SequenceError>;
}

impl<'a, T> LockResultExt<RwLockReadGuard<'a, T>>
    for Result<RwLockReadGuard<'a, T>, PoisonError<RwLockReadGuard<'a, T>>>
{
    #[inline]
    fn map_lock_err(self) -> Result<RwLockReadGuard<'a, T>, SequenceError> {
        self.map_err(|e| SequenceError::LockPoisoned(e.to_string()))
    }
}

impl<'a, T> LockResultExt<RwLockWriteGuard<'a, T>>
    for Result<RwLockWriteGuard<'a, T>, PoisonError<RwLockWriteGuard<'a, T>>>
{
    #[inline]
    fn map_lock_err(self) -> Result<RwLockWriteGuard<'a, T>, SequenceError> {
        self.map_err(|e| SequenceError::LockPoisoned(e.to_string()))
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// Two upserts raced to create the same document and this one lost.
    #[error("Duplicate key in {collection}: {key}")]
    DuplicateKey { collection: String, key: String },

    /// A document with this `_id` exists but does not match the filter.
    #[error("Document {key} in {collection} does not match the counter filter")]
    IdConflict { collection: String, key: String },

    #[error("Unsupported store operation: {0}")]
    Unsupported(String),

    #[error("Connection not open: {0}")]
    NotConnected(String),

    #[error("Update returned no document for {0}")]
    MissingDocument(String),

    #[error("Malformed reply: {0}")]
    MalformedReply(String),

    #[error("Invalid update: {0}")]
    InvalidUpdate(String),

    #[error("RocksDB error: {0}")]
    RocksDb(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Driver error {code}: {message}")]
    Driver { code: i32, message: String },

    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),
}

impl StoreError {
    /// Returns true if this is the transient upsert race that callers retry.
    #[inline]
    pub fn is_duplicate_key(&self) -> bool {
        matches!(self, Self::DuplicateKey { .. })
    }

    /// Classifies a raw driver error.
    ///
    /// Codes 11000/11001 and messages carrying `E11000` or `duplicate key`
    /// become [`StoreError::DuplicateKey`]; everything else is kept verbatim.
    pub fn from_driver(collection: &str, code: Option<i32>, message: impl Into<String>) -> Self {
        let message = message.into();
        let code_matches = code.is_some_and(|c| DUPLICATE_KEY_CODES.contains(&c));
        if code_matches || is_duplicate_key_message(&message) {
            return Self::DuplicateKey {
                collection: collection.to_string(),
                key: message,
            };
        }
        Self::Driver {
            code: code.unwrap_or(-1),
            message,
        }
    }
}

/// Classifies driver messages as duplicate-key conflicts.
pub fn is_duplicate_key_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    ["e11000", "duplicate key"]
        .iter()
        .any(|p| lower.contains(p))
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("Step must be positive, got {0}")]
    InvalidStep(i64),
}
