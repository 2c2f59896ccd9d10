use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::rngs::StdRng;
use rand::SeedableRng;

use chunkfeed_bench::synthetic_record;
use chunkfeed_core::{BatchAssembler, Error, PositionRecord};
use chunkfeed_shuffle::{Sampler, ShuffleBuffer, Shuffled};

const RECORDS: usize = 4096;
const BATCH_SIZE: usize = 256;

fn records() -> Vec<PositionRecord> {
    let mut rng = StdRng::seed_from_u64(0);
    (0..RECORDS)
        .map(|_| synthetic_record(&mut rng))
        .collect::<Result<_, Error>>()
        .unwrap()
}

fn bench_shuffle_and_assemble(c: &mut Criterion) {
    let input = records();
    let mut group = c.benchmark_group("shuffle_and_assemble");
    group.throughput(Throughput::Elements(RECORDS as u64));

    for capacity in [0usize, 256, 4096] {
        group.bench_with_input(BenchmarkId::new("capacity", capacity), &capacity, |b, &capacity| {
            b.iter(|| {
                let stream = input.iter().cloned().map(Ok);
                let sampled = Sampler::keep_all().sample(stream);
                let shuffled = Shuffled::new(sampled, ShuffleBuffer::from_seed(capacity, Some(1)));
                let assembler = BatchAssembler::new(shuffled, BATCH_SIZE).unwrap();
                for batch in assembler {
                    black_box(batch.unwrap());
                }
            });
        });
    }

    group.finish();
}

fn bench_decode_columns(c: &mut Criterion) {
    let input = records();
    let batch = BatchAssembler::new(input.into_iter().map(Ok), BATCH_SIZE)
        .unwrap()
        .next_batch()
        .unwrap();

    let mut group = c.benchmark_group("decode_columns");
    group.throughput(Throughput::Elements(BATCH_SIZE as u64));
    group.bench_function("planes_f32", |b| b.iter(|| black_box(batch.planes_f32())));
    group.bench_function("probs_f32", |b| b.iter(|| black_box(batch.probs_f32())));
    group.finish();
}

criterion_group!(benches, bench_shuffle_and_assemble, bench_decode_columns);
criterion_main!(benches);
