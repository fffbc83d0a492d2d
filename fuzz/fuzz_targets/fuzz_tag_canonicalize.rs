#![no_main]

use gephase::{PhaseTag, TagRegistry};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(raw) = std::str::from_utf8(data) else {
        return;
    };
    let registry = TagRegistry::new();
    if let Ok(tag) = registry.canonicalize(raw) {
        // canonical form must be a fixed point
        let again = PhaseTag::parse(tag.as_str()).expect("canonical tag re-parses");
        assert_eq!(tag, again);
        assert!(tag.is_descendant_of(&tag));
        if let Some(parent) = tag.parent() {
            assert!(tag.is_strict_descendant_of(&parent));
        }
    }
});
