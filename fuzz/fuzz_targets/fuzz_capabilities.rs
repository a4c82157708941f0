//! Fuzz target for capability parsing.

#![no_main]

use gitsmart_protocol::Capabilities;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(line) = std::str::from_utf8(data) else {
        return;
    };
    let caps = Capabilities::parse(line);

    // side-band-64k must never switch on plain side-band
    if caps.side_band {
        assert!(line.split(' ').any(|t| t == "side-band"));
    }
    let _ = caps.fetch_request();
});
