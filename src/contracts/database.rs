use std::future::Future;
use std::sync::Arc;

use serde_json::Value;

use crate::contracts::error::StoreError;

/// Which atomic read-modify-write primitives a database handle exposes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// Legacy combined primitive (`findAndModify`).
    pub find_and_modify: bool,
    /// Newer split primitive (`findOneAndUpdate`).
    pub find_one_and_update: bool,
}

impl Capabilities {
    pub const NONE: Self = Self {
        find_and_modify: false,
        find_one_and_update: false,
    };
    pub const LEGACY: Self = Self {
        find_and_modify: true,
        find_one_and_update: false,
    };
    pub const MODERN: Self = Self {
        find_and_modify: false,
        find_one_and_update: true,
    };
    pub const ALL: Self = Self {
        find_and_modify: true,
        find_one_and_update: true,
    };
}

/// Lifecycle of a database connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

/// Options of the legacy `findAndModify` primitive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FindAndModifyOptions {
    pub upsert: bool,
    /// Return the modified document instead of the original.
    pub new: bool,
}

/// Which version of the document `findOneAndUpdate` returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReturnDocument {
    #[default]
    Before,
    After,
}

/// Options of the `findOneAndUpdate` primitive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FindOneAndUpdateOptions {
    pub upsert: bool,
    pub return_document: ReturnDocument,
}

/// Raw document database surface, as exposed by a driver handle.
///
/// Implementations override the primitives they actually support and report
/// them through [`Database::capabilities`]. The defaults fail with
/// [`StoreError::Unsupported`].
///
/// # Reply shapes
/// - `find_and_modify`: the document itself, or `{"value": doc}`
/// - `find_one_and_update`: `{"value": doc, "ok": 1}`
///
/// `value` is `null` when no document matched and nothing was upserted.
pub trait Database: Send + Sync {
    /// Probes the primitives this handle exposes. Checked on every call.
    fn capabilities(&self) -> Capabilities;

    /// Returns the current connection state.
    fn state(&self) -> ConnectionState {
        ConnectionState::Open
    }

    /// Resolves once the connection is open.
    fn wait_open(&self) -> impl Future<Output = Result<(), StoreError>> + Send {
        async { Ok(()) }
    }

    /// Legacy atomic read-modify-write.
    fn find_and_modify(
        &self,
        collection: &str,
        query: &Value,
        update: &Value,
        options: &FindAndModifyOptions,
    ) -> impl Future<Output = Result<Value, StoreError>> + Send {
        let _ = (collection, query, update, options);
        async { Err(StoreError::Unsupported("findAndModify".into())) }
    }

    /// Modern atomic read-modify-write.
    fn find_one_and_update(
        &self,
        collection: &str,
        filter: &Value,
        update: &Value,
        options: &FindOneAndUpdateOptions,
    ) -> impl Future<Output = Result<Value, StoreError>> + Send {
        let _ = (collection, filter, update, options);
        async { Err(StoreError::Unsupported("findOneAndUpdate".into())) }
    }
}

impl<D: Database> Database for Arc<D> {
    fn capabilities(&self) -> Capabilities {
        (**self).capabilities()
    }

    fn state(&self) -> ConnectionState {
        (**self).state()
    }

    fn wait_open(&self) -> impl Future<Output = Result<(), StoreError>> + Send {
        (**self).wait_open()
    }

    fn find_and_modify(
        &self,
        collection: &str,
        query: &Value,
        update: &Value,
        options: &FindAndModifyOptions,
    ) -> impl Future<Output = Result<Value, StoreError>> + Send {
        (**self).find_and_modify(collection, query, update, options)
    }

    fn find_one_and_update(
        &self,
        collection: &str,
        filter: &Value,
        update: &Value,
        options: &FindOneAndUpdateOptions,
    ) -> impl Future<Output = Result<Value, StoreError>> + Send {
        (**self).find_one_and_update(collection, filter, update, options)
    }
}
