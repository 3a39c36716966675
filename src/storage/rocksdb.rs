use std::path::Path;
use std::sync::Arc;

use rocksdb::{ErrorKind, OptimisticTransactionDB, Options};
use serde_json::{json, Map, Value};

use crate::contracts::{
    Capabilities, Database, FindAndModifyOptions, FindOneAndUpdateOptions, ReturnDocument,
    StoreError,
};
use crate::storage::document;

/// Key prefix for documents
const DOC_PREFIX: &str = "doc";

type Db = OptimisticTransactionDB;

/// Outcome of one read-modify-write: `(before, after)`.
type Modified = (Option<Map<String, Value>>, Option<Map<String, Value>>);

/// RocksDB-backed document database.
///
/// Documents are JSON under `doc:{collection length}:{collection}:{_id}`.
/// Every read-modify-write runs in an optimistic transaction. When the commit conflicts:
/// - the document existed at read time: the update is replayed, so updates of
///   one document are atomic and never surface a conflict
/// - the document was missing: another upsert inserted it first and the call
///   fails with [`StoreError::DuplicateKey`]
pub struct RocksDbDatabase {
    db: Arc<Db>,
    capabilities: Capabilities,
}

impl RocksDbDatabase {
    /// Opens or creates a database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        // Conflict checks of optimistic transactions read memtable history
        opts.set_max_write_buffer_size_to_maintain(64 * 1024 * 1024);

        let db = Db::open(&opts, path).map_err(|e| StoreError::RocksDb(e.to_string()))?;
        tracing::info!(path = %path.display(), "Opened RocksDB document store");

        Ok(Self {
            db: Arc::new(db),
            capabilities: Capabilities::ALL,
        })
    }

    /// Restricts the primitives this handle exposes.
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Reads a document.
    pub fn document(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError> {
        let key = Self::document_key(collection, id);
        match self.db.get(key.as_bytes()) {
            Ok(Some(bytes)) => Ok(Some(Value::Object(Self::deserialize(&bytes)?))),
            Ok(None) => Ok(None),
            Err(e) => Err(StoreError::RocksDb(e.to_string())),
        }
    }

    /// Creates a document key. The collection is length-prefixed so names
    /// containing `:` cannot collide.
    fn document_key(collection: &str, id: &str) -> String {
        format!("{}:{}:{}:{}", DOC_PREFIX, collection.len(), collection, id)
    }

    fn serialize(doc: &Map<String, Value>) -> Result<Vec<u8>, StoreError> {
        serde_json::to_vec(doc).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn deserialize(bytes: &[u8]) -> Result<Map<String, Value>, StoreError> {
        serde_json::from_slice(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    #[inline]
    fn is_conflict(err: &rocksdb::Error) -> bool {
        matches!(err.kind(), ErrorKind::Busy | ErrorKind::TryAgain)
    }

    fn modify_blocking(
        db: &Db,
        collection: &str,
        filter: &Value,
        update: &Value,
        upsert: bool,
    ) -> Result<Modified, StoreError> {
        let id = document::document_id(filter)?;
        let key = Self::document_key(collection, &id);
        let rocks = |e: rocksdb::Error| StoreError::RocksDb(e.to_string());

        loop {
            let txn = db.transaction();
            let existing = txn.get_for_update(key.as_bytes(), true).map_err(rocks)?;

            match existing {
                Some(bytes) => {
                    let before = Self::deserialize(&bytes)?;
                    if !document::matches(filter, &before)? {
                        return Err(StoreError::IdConflict {
                            collection: collection.to_string(),
                            key: id,
                        });
                    }
                    let mut after = before.clone();
                    document::apply_update(&mut after, update)?;
                    txn.put(key.as_bytes(), Self::serialize(&after)?)
                        .map_err(rocks)?;
                    match txn.commit() {
                        Ok(()) => return Ok((Some(before), Some(after))),
                        Err(e) if Self::is_conflict(&e) => {
                            tracing::trace!(collection, id = %id, "Write conflict, replaying update");
                        }
                        Err(e) => return Err(rocks(e)),
                    }
                }
                None if !upsert => return Ok((None, None)),
                None => {
                    let seed = document::upsert_seed(filter, update)?;
                    txn.put(key.as_bytes(), Self::serialize(&seed)?)
                        .map_err(rocks)?;
                    return match txn.commit() {
                        Ok(()) => Ok((None, Some(seed))),
                        Err(e) if Self::is_conflict(&e) => Err(StoreError::DuplicateKey {
                            collection: collection.to_string(),
                            key: id,
                        }),
                        Err(e) => Err(rocks(e)),
                    };
                }
            }
        }
    }

    async fn modify(
        &self,
        collection: &str,
        filter: &Value,
        update: &Value,
        upsert: bool,
    ) -> Result<Modified, StoreError> {
        let db = Arc::clone(&self.db);
        let collection = collection.to_string();
        let filter = filter.clone();
        let update = update.clone();
        tokio::task::spawn_blocking(move || {
            Self::modify_blocking(&db, &collection, &filter, &update, upsert)
        })
        .await
        .map_err(|e| StoreError::RocksDb(e.to_string()))?
    }
}

impl Database for RocksDbDatabase {
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    async fn find_and_modify(
        &self,
        collection: &str,
        query: &Value,
        update: &Value,
        options: &FindAndModifyOptions,
    ) -> Result<Value, StoreError> {
        if !self.capabilities.find_and_modify {
            return Err(StoreError::Unsupported("findAndModify".into()));
        }
        let (before, after) = self.modify(collection, query, update, options.upsert).await?;
        let doc = if options.new { after } else { before };
        Ok(doc.map(Value::Object).unwrap_or(Value::Null))
    }

    async fn find_one_and_update(
        &self,
        collection: &str,
        filter: &Value,
        update: &Value,
        options: &FindOneAndUpdateOptions,
    ) -> Result<Value, StoreError> {
        if !self.capabilities.find_one_and_update {
            return Err(StoreError::Unsupported("findOneAndUpdate".into()));
        }
        let (before, after) = self.modify(collection, filter, update, options.upsert).await?;
        let doc = match options.return_document {
            ReturnDocument::Before => before,
            ReturnDocument::After => after,
        };
        Ok(json!({ "value": doc.map(Value::Object).unwrap_or(Value::Null), "ok": 1 }))
    }
}
