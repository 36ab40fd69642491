use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use webchannel_core::chunk::ChunkDecoder;
use webchannel_core::value::FRAME_DECODE_DEPTH;
use webchannel_core::{QueuedMap, decode_array, decode_message_queue, encode_message_queue};

fn queued_maps(count: usize) -> Vec<QueuedMap> {
    (0..count as u64)
        .map(|id| {
            QueuedMap::new(
                id,
                vec![
                    ("type".to_string(), "chat".to_string()),
                    ("text".to_string(), format!("message number {id} & friends")),
                ],
                None,
            )
        })
        .collect()
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_message_queue");

    for count in [1, 100, 1000] {
        let maps = queued_maps(count);
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &maps, |b, maps| {
            b.iter(|| encode_message_queue(black_box(maps), maps.len()))
        });
    }

    group.finish();
}

fn bench_decode_batch(c: &mut Criterion) {
    let body = encode_message_queue(&queued_maps(1000), 1000).body;

    let mut group = c.benchmark_group("decode_message_queue");
    group.throughput(Throughput::Bytes(body.len() as u64));
    group.bench_function("1000_maps", |b| {
        b.iter(|| decode_message_queue(black_box(&body)))
    });
    group.finish();
}

fn bench_decode_frames(c: &mut Criterion) {
    let frames: Vec<String> = (0..500)
        .map(|id| format!(r#"[{id},["msg",{{"seq":{id},"body":"hello"}},[1,2,[3]]]]"#))
        .collect();
    let text = format!("[{}]", frames.join(","));

    let mut group = c.benchmark_group("decode_array");
    group.throughput(Throughput::Bytes(text.len() as u64));
    group.bench_function("500_frames", |b| {
        b.iter(|| decode_array(black_box(&text), FRAME_DECODE_DEPTH))
    });
    group.finish();
}

fn bench_chunk_decoder(c: &mut Criterion) {
    let payload = r#"[[1,["noop"]]]"#;
    let stream: Vec<u8> = (0..1000)
        .flat_map(|_| format!("{}\n{}", payload.len(), payload).into_bytes())
        .collect();

    let mut group = c.benchmark_group("chunk_decoder");
    group.throughput(Throughput::Bytes(stream.len() as u64));

    for slice in [64, 1024, 16384] {
        group.bench_with_input(BenchmarkId::new("slice", slice), &stream, |b, stream| {
            b.iter(|| {
                let mut decoder = ChunkDecoder::new();
                let mut chunks = 0usize;
                for piece in stream.chunks(slice) {
                    decoder.push(piece);
                    while let webchannel_core::chunk::Chunk::Complete(text) = decoder.next_chunk() {
                        chunks += black_box(text).len();
                    }
                }
                chunks
            })
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_encode,
    bench_decode_batch,
    bench_decode_frames,
    bench_chunk_decoder
);
criterion_main!(benches);
