//! Fuzz target for chunk framing
//!
//! Feeds arbitrary bytes to the decoder in two pieces and drains it.

#![no_main]

use libfuzzer_sys::fuzz_target;
use webchannel_core::chunk::{Chunk, ChunkDecoder};

fuzz_target!(|data: &[u8]| {
    let split = data.first().map_or(0, |b| usize::from(*b)).min(data.len());
    let (head, tail) = data.split_at(split);

    let mut decoder = ChunkDecoder::new();
    for piece in [head, tail] {
        decoder.push(piece);
        while let Chunk::Complete(_) = decoder.next_chunk() {}
    }
    assert!(decoder.total_received() == data.len());
});
