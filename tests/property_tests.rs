//! Property-based tests for autoseq.
//!
//! These tests check the arithmetic of counters and the resolution of options
//! over randomized inputs.
//! Run with: cargo test --test property_tests

use proptest::prelude::*;
use serde_json::{json, Map, Value};

use autoseq::contracts::SequenceGenerator;
use autoseq::generator::{OptionsOverride, SequenceSettings};
use autoseq::storage::document::{apply_update, upsert_seed};

// =============================================================================
// Property definitions
// =============================================================================

/// Property: k sequential increments with step s end at k * s, and every
/// intermediate value is the previous one plus s.
async fn prop_sequential_increments_follow_step<G: SequenceGenerator>(
    gen: &G,
    sequence: &str,
    k: usize,
) {
    let step = gen.settings().resolve(sequence).unwrap().step;
    let mut previous = 0i64;
    for _ in 0..k {
        let value = gen.increment(sequence, None).await.unwrap();
        assert_eq!(value, previous + step, "value must advance by exactly one step");
        previous = value;
    }
    assert_eq!(previous, k as i64 * step);
}

/// Property: later overrides win field by field, unset fields fall back.
fn prop_override_layers_resolve(settings: &SequenceSettings, sequence: &str, layers: &[Layer]) {
    let defaults = settings.defaults().unwrap();
    let mut expected = defaults.clone();
    for layer in layers {
        settings
            .override_sequence(sequence, layer.to_override())
            .unwrap();
        if let Some(c) = &layer.collection {
            expected.collection = c.clone();
        }
        if let Some(f) = &layer.field {
            expected.field = f.clone();
        }
        if let Some(s) = layer.step {
            expected.step = s;
        }
    }
    assert_eq!(settings.resolve(sequence).unwrap(), expected);
    assert_eq!(settings.resolve("untouched").unwrap(), defaults);
}

// =============================================================================
// Proptest strategies
// =============================================================================

#[derive(Debug, Clone)]
struct Layer {
    collection: Option<String>,
    field: Option<String>,
    step: Option<i64>,
}

impl Layer {
    fn to_override(&self) -> OptionsOverride {
        let mut o = OptionsOverride::new();
        if let Some(c) = &self.collection {
            o = o.with_collection(c.clone());
        }
        if let Some(f) = &self.field {
            o = o.with_field(f.clone());
        }
        if let Some(s) = self.step {
            o = o.with_step(s);
        }
        o
    }
}

prop_compose! {
    fn arb_name()(s in "[a-z][a-z0-9_]{0,23}") -> String {
        s
    }
}

prop_compose! {
    fn arb_step()(s in 1i64..1_000) -> i64 {
        s
    }
}

prop_compose! {
    fn arb_layer()(
        collection in prop::option::of(arb_name()),
        field in prop::option::of(arb_name()),
        step in prop::option::of(arb_step()),
    ) -> Layer {
        Layer { collection, field, step }
    }
}

prop_compose! {
    fn arb_counter_doc()(id in arb_name(), field in arb_name(), seq in -1_000_000i64..1_000_000) -> Map<String, Value> {
        json!({"_id": id, "field": field, "seq": seq}).as_object().cloned().unwrap()
    }
}

// =============================================================================
// Test module
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use autoseq::generator::CounterSequenceGenerator;
    use autoseq::storage::MemoryDatabase;

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_default_step_counts_by_one() {
        let gen = CounterSequenceGenerator::detect(MemoryDatabase::new());
        prop_sequential_increments_follow_step(&gen, "orders", 100).await;
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        #[test]
        fn test_sequential_increments_follow_step(
            name in arb_name(),
            step in arb_step(),
            k in 1usize..40,
        ) {
            let gen = CounterSequenceGenerator::detect(MemoryDatabase::new());
            gen.settings()
                .override_sequence(&name, OptionsOverride::new().with_step(step))
                .unwrap();
            runtime().block_on(prop_sequential_increments_follow_step(&gen, &name, k));
        }

        #[test]
        fn test_override_layers_resolve(
            name in arb_name(),
            layers in prop::collection::vec(arb_layer(), 0..6),
        ) {
            let settings = SequenceSettings::new();
            prop_override_layers_resolve(&settings, &name, &layers);
        }

        #[test]
        fn test_inc_adds_exactly(mut doc in arb_counter_doc(), step in -1_000i64..1_000) {
            let before = doc["seq"].as_i64().unwrap();
            apply_update(&mut doc, &json!({"$inc": {"seq": step}})).unwrap();
            prop_assert_eq!(doc["seq"].as_i64(), Some(before + step));
            prop_assert_eq!(doc.len(), 3);
        }

        #[test]
        fn test_upsert_seed_starts_from_zero(id in arb_name(), field in arb_name(), step in arb_step()) {
            let filter = json!({"_id": id.clone(), "field": field.clone()});
            let seeded = upsert_seed(&filter, &json!({"$inc": {"seq": step}})).unwrap();
            prop_assert_eq!(Value::Object(seeded), json!({"_id": id, "field": field, "seq": step}));
        }

        #[test]
        fn test_non_positive_step_is_rejected(step in i64::MIN..=0) {
            let settings = SequenceSettings::new();
            prop_assert!(settings
                .override_sequence("orders", OptionsOverride::new().with_step(step))
                .is_err());
            prop_assert!(settings.sequence_override("orders").is_none());
        }
    }
}
