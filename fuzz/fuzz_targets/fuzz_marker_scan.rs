#![no_main]

use ccs_corpus::{find_marker, normalize_text};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        let _ = find_marker(text);

        // The rewrite must converge after one pass.
        if let Some(once) = normalize_text(text) {
            assert!(normalize_text(&once).is_none());
        }
    }
});
