//! Minimal document semantics shared by the bundled stores.
//!
//! Filters are top-level equality matches. Updates support `$inc` on integer
//! fields and `$set`. Upserts seed the new document from the filter's
//! equality fields and then apply the update.

use serde_json::{Map, Value};

use crate::contracts::StoreError;

/// Primary key field.
pub const ID_FIELD: &str = "_id";

/// Returns the storage key of the `_id` in `filter`.
pub fn document_id(filter: &Value) -> Result<String, StoreError> {
    let id = filter_fields(filter)?
        .get(ID_FIELD)
        .ok_or_else(|| StoreError::InvalidUpdate("filter must identify the document by _id".into()))?;
    Ok(id_key(id))
}

/// Renders an `_id` value as a storage key.
pub fn id_key(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Returns true if every filter field equals the document's field.
pub fn matches(filter: &Value, doc: &Map<String, Value>) -> Result<bool, StoreError> {
    Ok(filter_fields(filter)?
        .iter()
        .all(|(key, expected)| doc.get(key) == Some(expected)))
}

/// Applies an update document in place.
pub fn apply_update(doc: &mut Map<String, Value>, update: &Value) -> Result<(), StoreError> {
    let operators = update
        .as_object()
        .ok_or_else(|| StoreError::InvalidUpdate(format!("update must be an object, got {}", update)))?;
    if operators.is_empty() {
        return Err(StoreError::InvalidUpdate("empty update".into()));
    }

    for (op, fields) in operators {
        let fields = fields.as_object().ok_or_else(|| {
            StoreError::InvalidUpdate(format!("{} expects an object, got {}", op, fields))
        })?;
        match op.as_str() {
            "$inc" => {
                for (field, amount) in fields {
                    increment_field(doc, field, amount)?;
                }
            }
            "$set" => {
                for (field, value) in fields {
                    if field == ID_FIELD && doc.get(ID_FIELD).is_some_and(|id| id != value) {
                        return Err(StoreError::InvalidUpdate("_id is immutable".into()));
                    }
                    doc.insert(field.clone(), value.clone());
                }
            }
            other => {
                return Err(StoreError::InvalidUpdate(format!(
                    "unsupported update operator {}",
                    other
                )))
            }
        }
    }
    Ok(())
}

/// Builds the document an upsert inserts when nothing matched.
pub fn upsert_seed(filter: &Value, update: &Value) -> Result<Map<String, Value>, StoreError> {
    let mut doc = filter_fields(filter)?.clone();
    if !doc.contains_key(ID_FIELD) {
        return Err(StoreError::InvalidUpdate(
            "upsert requires an _id in the filter".into(),
        ));
    }
    apply_update(&mut doc, update)?;
    Ok(doc)
}

fn increment_field(
    doc: &mut Map<String, Value>,
    field: &str,
    amount: &Value,
) -> Result<(), StoreError> {
    let amount = amount.as_i64().ok_or_else(|| {
        StoreError::InvalidUpdate(format!("$inc amount for {} must be an integer", field))
    })?;
    let current = match doc.get(field) {
        None | Some(Value::Null) => 0,
        Some(value) => value.as_i64().ok_or_else(|| {
            StoreError::InvalidUpdate(format!("cannot $inc non-integer field {}", field))
        })?,
    };
    let next = current
        .checked_add(amount)
        .ok_or_else(|| StoreError::InvalidUpdate(format!("$inc overflows field {}", field)))?;
    doc.insert(field.to_string(), Value::from(next));
    Ok(())
}

fn filter_fields(filter: &Value) -> Result<&Map<String, Value>, StoreError> {
    let fields = filter
        .as_object()
        .ok_or_else(|| StoreError::InvalidUpdate(format!("filter must be an object, got {}", filter)))?;
    if let Some(op) = fields.keys().find(|k| k.starts_with('$')) {
        return Err(StoreError::InvalidUpdate(format!(
            "unsupported filter operator {}",
            op
        )));
    }
    if fields.values().any(|v| {
        v.as_object()
            .is_some_and(|o| o.keys().any(|k| k.starts_with('$')))
    }) {
        return Err(StoreError::InvalidUpdate(
            "only equality filters are supported".into(),
        ));
    }
    Ok(fields)
}
