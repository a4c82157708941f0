//! Fuzz target for the smart protocol readers.
//!
//! Tests that the ref advertisement and push report readers handle arbitrary
//! server output without panicking.

#![no_main]

use gitsmart_protocol::{parse_report, PktBuffer, RefAdvertisement};
use libfuzzer_sys::fuzz_target;
use std::io::Cursor;

fuzz_target!(|data: &[u8]| {
    for stateless in [false, true] {
        let mut buffer = PktBuffer::new(64);
        if let Ok(adv) = RefAdvertisement::read(&mut buffer, &mut Cursor::new(data), stateless) {
            let _ = adv.heads().count();
            let _ = adv.capabilities().fetch_request();
        }
    }

    let mut buffer = PktBuffer::new(64);
    if let Ok(outcome) = parse_report(&mut buffer, &mut Cursor::new(data)) {
        let _ = outcome.rejected().count();
    }
});
