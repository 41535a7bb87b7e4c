//! Fuzz target for `WxH` resolution parsing.

#![no_main]

use libfuzzer_sys::fuzz_target;
use labelkit::model::Resolution;

fuzz_target!(|data: &[u8]| {
    let Ok(raw) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(resolution) = raw.parse::<Resolution>() {
        assert!(resolution.width > 0 && resolution.height > 0);
        let reparsed: Resolution = resolution.to_string().parse().expect("display re-parses");
        assert_eq!(reparsed, resolution);
    }
});
