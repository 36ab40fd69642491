//! Fuzz target for depth-bounded frame decoding
//!
//! The decoder must never panic, whatever the input or depth.

#![no_main]

use libfuzzer_sys::fuzz_target;
use webchannel_core::decode_array;

fuzz_target!(|data: &[u8]| {
    let Some((depth, rest)) = data.split_first() else {
        return;
    };
    if let Ok(text) = std::str::from_utf8(rest) {
        let _ = decode_array(text, usize::from(*depth % 8));
    }
});
