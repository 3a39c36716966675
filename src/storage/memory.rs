use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::{json, Map, Value};
use tokio::sync::watch;

use crate::contracts::{
    Capabilities, ConnectionState, Database, FindAndModifyOptions, FindOneAndUpdateOptions,
    ReturnDocument, StoreError,
};
use crate::storage::document;

type Collection = DashMap<String, Map<String, Value>>;

/// In-process document database with a unique index on `_id`.
///
/// Upserts that find nothing hand control back to the scheduler before
/// inserting, so two concurrent upserts of the same missing document race the
/// way they do against a networked store: one inserts, the other fails with
/// [`StoreError::DuplicateKey`].
pub struct MemoryDatabase {
    collections: DashMap<String, Arc<Collection>>,
    capabilities: Capabilities,
    state: watch::Sender<ConnectionState>,
    /// Errors returned by the next primitive calls, in order.
    injected: Mutex<VecDeque<StoreError>>,
    calls: AtomicU64,
}

impl Default for MemoryDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDatabase {
    /// Creates an open database exposing both API generations.
    pub fn new() -> Self {
        Self::with_capabilities(Capabilities::ALL)
    }

    /// Creates an open database exposing only the given primitives.
    pub fn with_capabilities(capabilities: Capabilities) -> Self {
        let (state, _) = watch::channel(ConnectionState::Open);
        Self {
            collections: DashMap::new(),
            capabilities,
            state,
            injected: Mutex::new(VecDeque::new()),
            calls: AtomicU64::new(0),
        }
    }

    /// Creates a database that stays in `Connecting` until [`MemoryDatabase::open`].
    pub fn connecting() -> Self {
        let db = Self::new();
        db.state.send_replace(ConnectionState::Connecting);
        db
    }

    /// Marks the connection as open and wakes waiters.
    pub fn open(&self) {
        self.state.send_replace(ConnectionState::Open);
    }

    /// Marks the connection as closed and wakes waiters.
    pub fn close(&self) {
        self.state.send_replace(ConnectionState::Closed);
    }

    /// Makes the next primitive call fail with `err`. Queued errors are
    /// consumed in order, one per call.
    pub fn inject_error(&self, err: StoreError) -> Result<(), StoreError> {
        self.injected
            .lock()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))?
            .push_back(err);
        Ok(())
    }

    /// Number of primitive calls served so far, failed ones included.
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    /// Returns a stored document.
    pub fn document(&self, collection: &str, id: &str) -> Option<Value> {
        let coll = self.collections.get(collection)?;
        let doc = coll.get(id)?;
        Some(Value::Object(doc.value().clone()))
    }

    /// Number of documents in a collection.
    pub fn count(&self, collection: &str) -> usize {
        self.collections
            .get(collection)
            .map(|c| c.len())
            .unwrap_or(0)
    }

    fn collection(&self, name: &str) -> Arc<Collection> {
        Arc::clone(self.collections.entry(name.to_string()).or_default().value())
    }

    fn begin_call(&self, primitive: &str, supported: bool) -> Result<(), StoreError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if !supported {
            return Err(StoreError::Unsupported(primitive.into()));
        }
        match *self.state.borrow() {
            ConnectionState::Open => {}
            state => return Err(StoreError::NotConnected(format!("{:?}", state))),
        }
        let injected = self
            .injected
            .lock()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))?
            .pop_front();
        match injected {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Atomic read-modify-write of one document.
    ///
    /// Returns `(before, after)`; `before` is `None` when the document was
    /// inserted by the upsert, both are `None` when nothing matched.
    async fn modify(
        &self,
        collection: &str,
        filter: &Value,
        update: &Value,
        upsert: bool,
    ) -> Result<(Option<Value>, Option<Value>), StoreError> {
        let id = document::document_id(filter)?;
        let coll = self.collection(collection);

        // Existing document: update under the shard lock.
        if let Some(mut entry) = coll.get_mut(&id) {
            if !document::matches(filter, entry.value())? {
                return Err(StoreError::IdConflict {
                    collection: collection.to_string(),
                    key: id,
                });
            }
            let before = entry.value().clone();
            let mut after = before.clone();
            document::apply_update(&mut after, update)?;
            *entry.value_mut() = after.clone();
            return Ok((Some(Value::Object(before)), Some(Value::Object(after))));
        }

        if !upsert {
            return Ok((None, None));
        }

        let seed = document::upsert_seed(filter, update)?;

        // Round trip between the miss and the insert.
        tokio::task::yield_now().await;

        let result = match coll.entry(id) {
            Entry::Occupied(entry) => {
                tracing::debug!(collection, id = %entry.key(), "Upsert lost insert race");
                Err(StoreError::DuplicateKey {
                    collection: collection.to_string(),
                    key: entry.key().clone(),
                })
            }
            Entry::Vacant(entry) => {
                entry.insert(seed.clone());
                Ok((None, Some(Value::Object(seed))))
            }
        };
        result
    }
}

impl Database for MemoryDatabase {
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    async fn wait_open(&self) -> Result<(), StoreError> {
        let mut rx = self.state.subscribe();
        let state = *rx
            .wait_for(|s| *s != ConnectionState::Connecting)
            .await
            .map_err(|e| StoreError::NotConnected(e.to_string()))?;
        match state {
            ConnectionState::Open => Ok(()),
            other => Err(StoreError::NotConnected(format!("{:?}", other))),
        }
    }

    async fn find_and_modify(
        &self,
        collection: &str,
        query: &Value,
        update: &Value,
        options: &FindAndModifyOptions,
    ) -> Result<Value, StoreError> {
        self.begin_call("findAndModify", self.capabilities.find_and_modify)?;
        let (before, after) = self.modify(collection, query, update, options.upsert).await?;
        let doc = if options.new { after } else { before };
        Ok(doc.unwrap_or(Value::Null))
    }

    async fn find_one_and_update(
        &self,
        collection: &str,
        filter: &Value,
        update: &Value,
        options: &FindOneAndUpdateOptions,
    ) -> Result<Value, StoreError> {
        self.begin_call("findOneAndUpdate", self.capabilities.find_one_and_update)?;
        let (before, after) = self.modify(collection, filter, update, options.upsert).await?;
        let doc = match options.return_document {
            ReturnDocument::Before => before,
            ReturnDocument::After => after,
        };
        Ok(json!({ "value": doc.unwrap_or(Value::Null), "ok": 1 }))
    }
}
