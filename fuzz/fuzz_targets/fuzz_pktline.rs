//! Fuzz target for pkt-line decoding.
//!
//! Feeds arbitrary bytes to the incremental decoder, both in one piece and
//! through a small read buffer, and checks neither panics.

#![no_main]

use gitsmart_protocol::{parse_line, PktBuffer};
use libfuzzer_sys::fuzz_target;
use std::io::Cursor;

fuzz_target!(|data: &[u8]| {
    // Walk the input with the raw decoder
    let mut rest = data;
    while let Ok(Some((_, used))) = parse_line(rest) {
        assert!(used > 0 && used <= rest.len());
        rest = &rest[used..];
    }

    // Same input through the buffered reader, 7 bytes per read
    let mut reader = Cursor::new(data);
    let mut buffer = PktBuffer::new(7);
    for _ in 0..1000 {
        if buffer.recv(&mut reader, |_| {}).is_err() {
            break;
        }
    }
});
