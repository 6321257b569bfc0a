#![no_main]

use ccs_corpus::ExclusionSet;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(body) = std::str::from_utf8(data) {
        if let Ok(exclusions) = ExclusionSet::from_yaml_str(body) {
            // The union can never shrink below either input list.
            let denied = exclusions.denied();
            assert!(denied.len() >= exclusions.known_broken.len());
            assert!(denied.len() >= exclusions.not_of_interest.len());
        }
    }
});
