//! Fuzz target for engine config parsing and validation.

#![no_main]

use libfuzzer_sys::fuzz_target;
use labelkit::config::fuzz_parse_config;

fuzz_target!(|data: &[u8]| {
    if data.len() > 1024 * 1024 {
        return;
    }

    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    let _ = fuzz_parse_config(text);
});
