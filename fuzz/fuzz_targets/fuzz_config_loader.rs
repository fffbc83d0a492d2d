#![no_main]

use gephase::config::ConfigLoader;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(yaml_str) = std::str::from_utf8(data) {
        // only panics matter here
        let _ = ConfigLoader::with_defaults().load_str(yaml_str);
    }
});
