//! Fuzz target for forward-channel body decoding

#![no_main]

use libfuzzer_sys::fuzz_target;
use webchannel_core::decode_message_queue;

fuzz_target!(|data: &[u8]| {
    if let Ok(body) = std::str::from_utf8(data) {
        let _ = decode_message_queue(body);
    }
});
