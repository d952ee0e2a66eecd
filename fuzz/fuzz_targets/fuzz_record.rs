#![no_main]

use libfuzzer_sys::fuzz_target;
use trackwire::core::record::{decode, encode};

fuzz_target!(|data: &[u8]| {
    // Whatever decodes must encode again without panicking.
    if let Ok(record) = decode(data) {
        let _ = encode(&record);
    }
});
