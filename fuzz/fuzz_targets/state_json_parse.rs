//! Fuzz target for session state parsing.
//!
//! This fuzzer feeds arbitrary bytes to the recovery file parser, checking
//! for panics, crashes, or hangs.

#![no_main]

use libfuzzer_sys::fuzz_target;
use labelkit::state::from_state_slice;

fuzz_target!(|data: &[u8]| {
    if data.len() > 10 * 1024 * 1024 {
        return;
    }

    if let Ok(app) = from_state_slice(data) {
        let _ = app.class_ids_are_consistent();
        let _ = app.output_resolution();
    }
});
