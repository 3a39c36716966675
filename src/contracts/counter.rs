use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::contracts::error::StoreError;

/// A persisted counter, one per sequence name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterDocument {
    #[serde(rename = "_id")]
    pub id: String,
    pub field: String,
    pub seq: i64,
}

/// Identifies a counter document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterFilter {
    pub id: String,
    pub field: String,
}

impl CounterFilter {
    pub fn new(id: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            field: field.into(),
        }
    }

    /// Wire form: `{"_id": id, "field": field}`.
    pub fn to_document(&self) -> Value {
        json!({ "_id": self.id, "field": self.field })
    }
}

/// Increment applied to `seq`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterUpdate {
    pub step: i64,
}

impl CounterUpdate {
    /// Wire form: `{"$inc": {"seq": step}}`.
    pub fn to_document(&self) -> Value {
        json!({ "$inc": { "seq": self.step } })
    }
}

/// Options of an increment request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertOptions {
    /// Create the counter when it does not exist.
    pub upsert: bool,
    /// Return the document after the update was applied.
    pub return_updated: bool,
}

impl Default for UpsertOptions {
    fn default() -> Self {
        Self {
            upsert: true,
            return_updated: true,
        }
    }
}

/// A single atomic increment-and-fetch against a counters collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncrementRequest {
    pub collection: String,
    pub filter: CounterFilter,
    pub update: CounterUpdate,
    pub options: UpsertOptions,
}

/// Canonical reply of an increment, whatever the store's reply shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterValue {
    pub seq: i64,
}

/// Atomic counter increment against a document store.
///
/// # Invariants
/// - Linearizable per counter document
/// - A lost upsert race surfaces as [`StoreError::DuplicateKey`] and mutates nothing
pub trait CounterStore: Send + Sync {
    /// Increments the matching counter, creating it when absent, and returns the
    /// updated value.
    fn upsert_increment(
        &self,
        request: &IncrementRequest,
    ) -> impl Future<Output = Result<CounterValue, StoreError>> + Send;

    /// Resolves once the underlying connection can serve requests.
    fn wait_ready(&self) -> impl Future<Output = Result<(), StoreError>> + Send {
        async { Ok(()) }
    }
}

impl<S: CounterStore> CounterStore for Arc<S> {
    fn upsert_increment(
        &self,
        request: &IncrementRequest,
    ) -> impl Future<Output = Result<CounterValue, StoreError>> + Send {
        (**self).upsert_increment(request)
    }

    fn wait_ready(&self) -> impl Future<Output = Result<(), StoreError>> + Send {
        (**self).wait_ready()
    }
}
