#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    // Parse and validation errors are both acceptable; panics are not.
    if let Ok(cfg) = toml::from_str::<batdev_config::Config>(data) {
        let _ = cfg.validate();
    }
});
