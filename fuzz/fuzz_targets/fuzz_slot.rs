#![no_main]

use libfuzzer_sys::fuzz_target;
use trackwire::core::record::Header;
use trackwire::storage::slot::{SlotControl, SLOT_CONTROL_LEN};

fuzz_target!(|data: &[u8]| {
    if let Ok(control) = SlotControl::parse(data) {
        if control.active && control.check().is_ok() {
            let end = (SLOT_CONTROL_LEN + control.size as usize).min(data.len());
            let _ = Header::decode(&data[SLOT_CONTROL_LEN.min(end)..end]);
        }
    }
});
