#![no_main]

use build_intercept::protocol::{decode_line, Request};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Malformed request lines must be rejected, never panic the service
    if let Ok(line) = std::str::from_utf8(data) {
        let _ = decode_line::<Request>(line);
    }
});
