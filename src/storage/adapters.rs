//! Counter store adapters over the two database API generations.
//!
//! Each adapter turns an [`IncrementRequest`] into the primitive's wire form
//! and normalizes the reply into a [`CounterValue`].

use serde_json::Value;

use crate::contracts::{
    CounterStore, CounterValue, Database, FindAndModifyOptions, FindOneAndUpdateOptions,
    IncrementRequest, ReturnDocument, StoreError,
};

/// Extracts `seq` from a reply that is either the counter document itself or
/// wraps it under `value`.
pub fn normalize_reply(reply: &Value, request: &IncrementRequest) -> Result<CounterValue, StoreError> {
    let doc = match reply.get("value") {
        Some(inner) if reply.get("seq").is_none() => inner,
        _ => reply,
    };
    if doc.is_null() {
        return Err(StoreError::MissingDocument(format!(
            "{}/{}",
            request.collection, request.filter.id
        )));
    }
    let seq = doc
        .get("seq")
        .and_then(Value::as_i64)
        .ok_or_else(|| StoreError::MalformedReply(format!("no integer seq in {}", reply)))?;
    Ok(CounterValue { seq })
}

async fn legacy_increment<D: Database>(
    db: &D,
    request: &IncrementRequest,
) -> Result<CounterValue, StoreError> {
    let options = FindAndModifyOptions {
        upsert: request.options.upsert,
        new: request.options.return_updated,
    };
    let reply = db
        .find_and_modify(
            &request.collection,
            &request.filter.to_document(),
            &request.update.to_document(),
            &options,
        )
        .await?;
    normalize_reply(&reply, request)
}

async fn modern_increment<D: Database>(
    db: &D,
    request: &IncrementRequest,
) -> Result<CounterValue, StoreError> {
    let options = FindOneAndUpdateOptions {
        upsert: request.options.upsert,
        return_document: if request.options.return_updated {
            ReturnDocument::After
        } else {
            ReturnDocument::Before
        },
    };
    let reply = db
        .find_one_and_update(
            &request.collection,
            &request.filter.to_document(),
            &request.update.to_document(),
            &options,
        )
        .await?;
    normalize_reply(&reply, request)
}

/// Counter store over the legacy `findAndModify` primitive.
pub struct FindAndModifyApi<D> {
    db: D,
}

impl<D: Database> FindAndModifyApi<D> {
    pub fn new(db: D) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &D {
        &self.db
    }
}

impl<D: Database> CounterStore for FindAndModifyApi<D> {
    async fn upsert_increment(&self, request: &IncrementRequest) -> Result<CounterValue, StoreError> {
        legacy_increment(&self.db, request).await
    }

    async fn wait_ready(&self) -> Result<(), StoreError> {
        self.db.wait_open().await
    }
}

/// Counter store over the `findOneAndUpdate` primitive.
pub struct FindOneAndUpdateApi<D> {
    db: D,
}

impl<D: Database> FindOneAndUpdateApi<D> {
    pub fn new(db: D) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &D {
        &self.db
    }
}

impl<D: Database> CounterStore for FindOneAndUpdateApi<D> {
    async fn upsert_increment(&self, request: &IncrementRequest) -> Result<CounterValue, StoreError> {
        modern_increment(&self.db, request).await
    }

    async fn wait_ready(&self) -> Result<(), StoreError> {
        self.db.wait_open().await
    }
}

/// Counter store that checks the handle's capabilities on every call,
/// preferring `findOneAndUpdate` and falling back to `findAndModify`.
pub struct DetectedApi<D> {
    db: D,
}

impl<D: Database> DetectedApi<D> {
    pub fn new(db: D) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &D {
        &self.db
    }
}

impl<D: Database> CounterStore for DetectedApi<D> {
    async fn upsert_increment(&self, request: &IncrementRequest) -> Result<CounterValue, StoreError> {
        let capabilities = self.db.capabilities();
        if capabilities.find_one_and_update {
            modern_increment(&self.db, request).await
        } else if capabilities.find_and_modify {
            legacy_increment(&self.db, request).await
        } else {
            Err(StoreError::Unsupported(
                "database handle exposes neither findOneAndUpdate nor findAndModify".into(),
            ))
        }
    }

    async fn wait_ready(&self) -> Result<(), StoreError> {
        self.db.wait_open().await
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::contracts::{Capabilities, CounterFilter, CounterUpdate, UpsertOptions};
    use crate::storage::MemoryDatabase;

    fn request(id: &str, step: i64) -> IncrementRequest {
        IncrementRequest {
            collection: "counters".into(),
            filter: CounterFilter::new(id, "_id"),
            update: CounterUpdate { step },
            options: UpsertOptions::default(),
        }
    }

    #[test]
    fn normalizes_both_reply_shapes() {
        let req = request("orders", 1);
        let direct = json!({"_id": "orders", "field": "_id", "seq": 7});
        let wrapped = json!({"value": {"_id": "orders", "field": "_id", "seq": 7}, "ok": 1});

        assert_eq!(normalize_reply(&direct, &req).unwrap(), CounterValue { seq: 7 });
        assert_eq!(normalize_reply(&wrapped, &req).unwrap(), CounterValue { seq: 7 });
    }

    #[test]
    fn missing_and_malformed_replies_are_errors() {
        let req = request("orders", 1);
        assert!(matches!(
            normalize_reply(&Value::Null, &req),
            Err(StoreError::MissingDocument(_))
        ));
        assert!(matches!(
            normalize_reply(&json!({"value": null, "ok": 1}), &req),
            Err(StoreError::MissingDocument(_))
        ));
        assert!(matches!(
            normalize_reply(&json!({"value": {"seq": "1"}}), &req),
            Err(StoreError::MalformedReply(_))
        ));
    }

    #[tokio::test]
    async fn legacy_and_modern_adapters_agree() {
        let legacy = FindAndModifyApi::new(MemoryDatabase::with_capabilities(Capabilities::LEGACY));
        let modern = FindOneAndUpdateApi::new(MemoryDatabase::with_capabilities(Capabilities::MODERN));

        for expected in [3, 6, 9] {
            let req = request("orders", 3);
            assert_eq!(legacy.upsert_increment(&req).await.unwrap().seq, expected);
            assert_eq!(modern.upsert_increment(&req).await.unwrap().seq, expected);
        }
    }

    #[tokio::test]
    async fn detection_falls_back_to_legacy() {
        let store = DetectedApi::new(MemoryDatabase::with_capabilities(Capabilities::LEGACY));
        assert_eq!(store.upsert_increment(&request("orders", 1)).await.unwrap().seq, 1);
        assert_eq!(store.database().call_count(), 1);
    }

    #[tokio::test]
    async fn detection_without_primitives_fails() {
        let store = DetectedApi::new(MemoryDatabase::with_capabilities(Capabilities::NONE));
        let err = store.upsert_increment(&request("orders", 1)).await.unwrap_err();
        assert!(matches!(err, StoreError::Unsupported(msg) if msg.contains("findAndModify")));
        // no primitive was called
        assert_eq!(store.database().call_count(), 0);
    }
}
