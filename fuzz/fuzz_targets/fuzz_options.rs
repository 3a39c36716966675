#![no_main]

use libfuzzer_sys::fuzz_target;
use serde_json::Value;

use autoseq::generator::{OptionsOverride, SequenceSettings};

fuzz_target!(|data: &[u8]| {
    // Options maps from untrusted config - should never panic
    let Ok(Value::Object(map)) = serde_json::from_slice::<Value>(data) else {
        return;
    };

    let settings = SequenceSettings::new();
    if settings.set_defaults_from_map(&map).is_ok() {
        // Accepted options always keep the step positive
        assert!(settings.defaults().unwrap().step > 0);
    }
    if let Ok(parsed) = OptionsOverride::from_map(&map) {
        assert!(parsed.validate().is_ok());
        let _ = settings.override_sequence("fuzz", parsed);
        assert!(settings.resolve("fuzz").unwrap().step > 0);
    }
});
