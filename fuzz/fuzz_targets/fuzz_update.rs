#![no_main]

use libfuzzer_sys::fuzz_target;
use serde_json::{json, Map, Value};

use autoseq::storage::document::{apply_update, matches, upsert_seed};

fuzz_target!(|data: &[u8]| {
    // Arbitrary JSON as filter and update documents - should never panic
    let Ok(update) = serde_json::from_slice::<Value>(data) else {
        return;
    };

    let filter = json!({"_id": "orders", "field": "_id"});
    let _ = upsert_seed(&filter, &update);
    let _ = upsert_seed(&update, &json!({"$inc": {"seq": 1}}));

    let mut doc: Map<String, Value> = json!({"_id": "orders", "field": "_id", "seq": i64::MAX - 1})
        .as_object()
        .cloned()
        .unwrap();
    if apply_update(&mut doc, &update).is_ok() {
        // A successful update never rewrites the identity
        assert_eq!(doc.get("_id"), Some(&json!("orders")));
    }
    let _ = matches(&update, &doc);
});
