use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::prelude::*;

use bytes::Bytes;
use loratx::chunk::ChunkSplitter;
use loratx::message::{encode_end, encode_header, Header};
use loratx::{DigestKind, FrameDecoder, FrameEvent};

const CHUNK_SIZE: usize = 240;

fn generate_random_data(size: usize) -> Bytes {
    let mut rng = StdRng::seed_from_u64(42);
    (0..size).map(|_| rng.gen()).collect::<Vec<u8>>().into()
}

/// 전송 한 건의 선로 바이트
fn encode_transfer(payload: &Bytes) -> Vec<u8> {
    let header = Header::new(
        "bench.bin",
        payload.len(),
        CHUNK_SIZE,
        DigestKind::Crc32.compute(payload),
    )
    .expect("valid header");

    let mut wire = encode_header(&header);
    for chunk in ChunkSplitter::new(CHUNK_SIZE).split(payload) {
        wire.extend_from_slice(&chunk.to_bytes());
    }
    wire.extend_from_slice(&encode_end());
    wire
}

/// 시리얼 읽기처럼 작은 조각으로 나눠 넣을 때의 디코딩 비용
fn bench_feed_in_pieces(c: &mut Criterion) {
    let mut group = c.benchmark_group("decoder_feed");

    let sizes = [("small", 4 * 1024), ("medium", 64 * 1024), ("large", 1024 * 1024)];
    let pieces = [1usize, 64, 512];

    for (name, size) in sizes.iter() {
        let wire = encode_transfer(&generate_random_data(*size));
        group.throughput(Throughput::Bytes(wire.len() as u64));

        for piece in pieces.iter() {
            // 1바이트 조각은 큰 입력에서 너무 느림
            if *piece == 1 && *size > 64 * 1024 {
                continue;
            }

            let id = BenchmarkId::new(*name, format!("{}B", piece));
            group.bench_with_input(id, piece, |b, &piece| {
                b.iter(|| {
                    let mut decoder = FrameDecoder::new(CHUNK_SIZE);
                    let mut chunks = 0usize;
                    for part in wire.chunks(piece) {
                        for event in decoder.feed(black_box(part)) {
                            if let FrameEvent::Chunk(_) = event {
                                chunks += 1;
                            }
                        }
                    }
                    chunks
                });
            });
        }
    }

    group.finish();
}

criterion_group!(benches, bench_feed_in_pieces);
criterion_main!(benches);
