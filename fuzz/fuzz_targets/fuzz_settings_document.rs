#![no_main]
use libfuzzer_sys::fuzz_target;
use timeswipe_core::{AcquisitionCfg, SettingsStore, StreamParams};

fuzz_target!(|data: &str| {
    let Ok(doc) = serde_json::from_str::<serde_json::Value>(data) else {
        return;
    };
    let store = SettingsStore::new(StreamParams::from(&AcquisitionCfg::default()));
    let before = store.snapshot();
    match store.apply(&doc) {
        Ok(_) => {
            let _ = store.get(&doc);
        }
        // A rejected document leaves the store untouched.
        Err(_) => assert_eq!(*store.snapshot(), *before),
    }
});
