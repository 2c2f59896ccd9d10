use std::collections::HashSet;
use std::path::Path;
use std::time::{Duration, Instant};

use chunkfeed_core::record::{PLANES_BYTES, POLICY_OUTPUTS};
use chunkfeed_core::{
    Batch, ChunkCompression, ChunkSource, Error, FeederConfig, PositionRecord, RawChunk, Result,
};
use chunkfeed_parallel::{ParallelFeeder, WorkerOutcome};
use chunkfeed_readers::{ChunkWriter, Corpus, MemoryChunkSource};
use test_case::test_case;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn record(tag: u16) -> PositionRecord {
    let mut planes = vec![0u8; PLANES_BYTES];
    planes[..2].copy_from_slice(&tag.to_le_bytes());
    let mut probs = vec![0.0f32; POLICY_OUTPUTS];
    probs[usize::from(tag) % POLICY_OUTPUTS] = 1.0;
    let winner = if tag % 2 == 0 { 1.0 } else { -1.0 };
    PositionRecord::new(&planes, &probs, winner).unwrap()
}

fn tag(record: &PositionRecord) -> u16 {
    u16::from_le_bytes([record.planes()[0], record.planes()[1]])
}

fn batch_tags(batch: &Batch) -> Vec<u16> {
    (0..batch.len())
        .map(|i| tag(&batch.record(i).unwrap()))
        .collect()
}

fn encoded_chunk(tags: std::ops::Range<u16>) -> Vec<u8> {
    let records: Vec<_> = tags.map(record).collect();
    ChunkWriter::new(ChunkCompression::Gzip)
        .with_level(1)
        .encode(&records)
        .unwrap()
}

fn write_corpus(dir: &Path, files: u16, records_per_file: u16) {
    let writer = ChunkWriter::new(ChunkCompression::Gzip).with_level(1);
    for file in 0..files {
        let start = file * records_per_file;
        let records: Vec<_> = (start..start + records_per_file).map(record).collect();
        writer
            .write(dir.join(format!("train_{file}.gz")), &records)
            .unwrap();
    }
}

fn config(batch_size: usize, capacity: usize, workers: usize) -> FeederConfig {
    FeederConfig {
        shuffle_buffer_capacity: capacity,
        downsample_rate: 1,
        batch_size,
        worker_count: workers,
        channel_capacity: 4,
        seed: Some(42),
        max_passes: None,
        compression: ChunkCompression::Gzip,
    }
}

/// Poll until `condition` holds, failing the test after a few seconds
fn wait_for(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "condition never became true");
        std::thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn cycles_through_a_small_corpus() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    write_corpus(dir.path(), 3, 5000);

    let mut feeder =
        ParallelFeeder::discover(dir.path().join("train_"), &config(512, 1024, 1)).unwrap();
    let mut seen = HashSet::new();
    // more positions than the corpus holds, so the source must wrap around
    for _ in 0..30 {
        let batch = feeder.next_batch().unwrap();
        assert_eq!(batch.len(), 512);
        assert_eq!(batch.planes_shape(), [512, 18, 361]);
        assert_eq!(batch.probs_f32().len(), 512 * 362);
        assert_eq!(batch.winner_f32().len(), 512);
        seen.extend(batch_tags(&batch));
    }

    assert!(
        seen.len() >= 15000 - 1024,
        "only {} distinct positions",
        seen.len()
    );
    assert!(seen.iter().all(|&t| t < 15000));

    let stats = feeder.shutdown();
    assert_eq!(stats.batches_delivered, 30);
    assert_eq!(stats.workers.len(), 1);
    assert!(stats.workers[0].passes_completed >= 1);
    assert_eq!(stats.chunks_skipped(), 0);
}

#[test]
fn zero_capacity_preserves_input_order() {
    let chunks = vec![encoded_chunk(0..6), encoded_chunk(6..12)];
    let source = MemoryChunkSource::in_order(chunks).with_max_passes(Some(1));
    let feeder = ParallelFeeder::from_sources(vec![Box::new(source)], &config(4, 0, 1)).unwrap();

    let tags: Vec<u16> = feeder
        .flat_map(|batch| batch_tags(&batch.unwrap()))
        .collect();
    assert_eq!(tags, (0..12).collect::<Vec<_>>());
}

#[test]
fn empty_corpus_fails_immediately() {
    let dir = tempfile::tempdir().unwrap();
    let result = ParallelFeeder::discover(dir.path().join("train_"), &config(8, 8, 2));
    assert!(matches!(result, Err(Error::EmptyCorpus { .. })));
}

#[test_case(0, 8, 1 ; "zero batch size")]
#[test_case(8, 8, 0 ; "zero workers")]
fn invalid_config_is_rejected(batch_size: usize, capacity: usize, workers: usize) {
    let source = MemoryChunkSource::in_order(vec![encoded_chunk(0..4)]);
    let result = ParallelFeeder::from_sources(
        vec![Box::new(source)],
        &config(batch_size, capacity, workers),
    );
    assert!(matches!(result, Err(Error::InvalidConfig(_))));
}

#[test]
fn seeded_validation_feeder_is_deterministic() {
    let dir = tempfile::tempdir().unwrap();
    write_corpus(dir.path(), 4, 50);
    let validation = FeederConfig {
        downsample_rate: 16,
        max_passes: Some(2),
        ..config(16, 32, 1)
    }
    .validation();
    assert_eq!(validation.downsample_rate, 1);

    let run = || -> Vec<Vec<u16>> {
        ParallelFeeder::discover(dir.path().join("train_"), &validation)
            .unwrap()
            .map(|batch| batch_tags(&batch.unwrap()))
            .collect()
    };
    let first = run();
    // 400 positions over two passes
    assert_eq!(first.len(), 25);
    assert_eq!(first, run());
}

#[test]
fn exhaustion_drops_the_partial_batch() {
    let source = MemoryChunkSource::in_order(vec![encoded_chunk(0..10)]).with_max_passes(Some(1));
    let mut feeder =
        ParallelFeeder::from_sources(vec![Box::new(source)], &config(4, 2, 1)).unwrap();

    assert_eq!(feeder.next_batch().unwrap().len(), 4);
    assert_eq!(feeder.next_batch().unwrap().len(), 4);
    assert!(matches!(feeder.next_batch(), Err(Error::StreamExhausted)));
    let polled = feeder.try_next_batch();
    assert!(matches!(polled, Err(Error::StreamExhausted)));

    let stats = feeder.shutdown();
    assert_eq!(stats.workers[0].outcome, WorkerOutcome::Exhausted);
    assert_eq!(stats.records_read(), 10);
}

#[test]
fn each_worker_reads_its_own_shard() {
    let dir = tempfile::tempdir().unwrap();
    write_corpus(dir.path(), 6, 40);

    let cfg = FeederConfig {
        max_passes: Some(1),
        ..config(8, 0, 3)
    };
    let feeder = ParallelFeeder::discover(dir.path().join("train_"), &cfg).unwrap();
    assert_eq!(feeder.worker_count(), 3);

    let mut tags: Vec<u16> = feeder
        .flat_map(|batch| batch_tags(&batch.unwrap()))
        .collect();
    tags.sort_unstable();
    // disjoint shards: every position exactly once
    assert_eq!(tags, (0..240).collect::<Vec<_>>());
}

#[test]
fn worker_count_is_clamped_to_chunk_count() {
    let dir = tempfile::tempdir().unwrap();
    write_corpus(dir.path(), 2, 20);
    let feeder = ParallelFeeder::discover(dir.path().join("train_"), &config(4, 4, 8)).unwrap();
    assert_eq!(feeder.worker_count(), 2);
}

#[test]
fn batches_from_one_worker_arrive_in_order() {
    let source =
        MemoryChunkSource::in_order(vec![encoded_chunk(0..400)]).with_max_passes(Some(1));
    let mut feeder =
        ParallelFeeder::from_sources(vec![Box::new(source)], &config(10, 0, 1)).unwrap();

    let mut previous = None;
    while let Ok(batch) = feeder.next_batch() {
        let first = batch_tags(&batch)[0];
        if let Some(previous) = previous {
            assert!(first > previous);
        }
        previous = Some(first);
    }
    assert_eq!(feeder.batches_delivered(), 40);
}

#[test]
fn queue_depth_is_bounded() {
    let source = MemoryChunkSource::in_order(vec![encoded_chunk(0..64)]);
    let cfg = FeederConfig {
        channel_capacity: 2,
        ..config(4, 4, 1)
    };
    let feeder = ParallelFeeder::from_sources(vec![Box::new(source)], &cfg).unwrap();

    wait_for(|| feeder.pending_batches() == 2);
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(feeder.pending_batches(), 2);

    let stats = feeder.shutdown();
    assert_eq!(stats.workers[0].outcome, WorkerOutcome::Cancelled);
}

#[test]
fn shutdown_stops_infinite_workers_promptly() {
    let sources: Vec<Box<dyn ChunkSource>> = (0..3)
        .map(|i| {
            Box::new(MemoryChunkSource::shuffled(
                vec![encoded_chunk(i * 100..i * 100 + 100)],
                u64::from(i),
            )) as Box<dyn ChunkSource>
        })
        .collect();
    let mut feeder = ParallelFeeder::from_sources(sources, &config(16, 32, 3)).unwrap();
    for _ in 0..5 {
        feeder.next_batch().unwrap();
    }

    let started = Instant::now();
    let stats = feeder.shutdown();
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(stats.workers.len(), 3);
    assert_eq!(stats.batches_delivered, 5);
    assert!(stats.failed_workers().next().is_none());
}

#[test_case(1, 0 ; "one worker skips the bad file")]
#[test_case(2, 1 ; "bad shard stops only its worker")]
fn malformed_file_does_not_stop_the_run(workers: usize, barren: usize) {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    write_corpus(dir.path(), 1, 40);
    std::fs::write(dir.path().join("train_1.gz"), [7u8; 17]).unwrap();

    let mut feeder =
        ParallelFeeder::discover(dir.path().join("train_"), &config(8, 8, workers)).unwrap();
    assert_eq!(feeder.worker_count(), workers);

    // four times the usable corpus
    for _ in 0..20 {
        let batch = feeder.next_batch().unwrap();
        assert!(batch_tags(&batch).iter().all(|&t| t < 40));
    }
    wait_for(|| feeder.barren_workers() == barren);
    assert!(!feeder.is_cancelled());

    let stats = feeder.shutdown();
    assert!(stats.chunks_skipped() > 0);
    assert!(stats.failed_workers().next().is_none());
    assert_eq!(stats.workers[0].outcome, WorkerOutcome::Cancelled);
    if workers == 2 {
        assert_eq!(stats.workers[1].outcome, WorkerOutcome::Barren);
    }
}

#[test_case(1, 0 ; "one worker")]
#[test_case(2, 1 ; "two workers")]
fn deleted_file_is_retried_then_skipped(workers: usize, barren: usize) {
    let dir = tempfile::tempdir().unwrap();
    write_corpus(dir.path(), 2, 40);
    let corpus = Corpus::discover(dir.path().join("train_")).unwrap();
    std::fs::remove_file(dir.path().join("train_1.gz")).unwrap();

    let mut feeder = ParallelFeeder::from_corpus(&corpus, &config(8, 8, workers)).unwrap();
    for _ in 0..30 {
        let batch = feeder.next_batch().unwrap();
        assert!(batch_tags(&batch).iter().all(|&t| t < 40));
    }
    wait_for(|| feeder.barren_workers() == barren);

    let stats = feeder.shutdown();
    assert!(stats.read_retries() > 0);
    assert!(stats.chunks_skipped() > 0);
    assert!(stats.failed_workers().next().is_none());
}

#[test]
fn corpus_without_usable_chunks_fails() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("train_0.gz"), [1u8; 17]).unwrap();
    std::fs::write(dir.path().join("train_1.gz"), [2u8; 17]).unwrap();

    let mut feeder =
        ParallelFeeder::discover(dir.path().join("train_"), &config(8, 8, 2)).unwrap();
    assert!(matches!(
        feeder.next_batch(),
        Err(Error::NoUsableChunks { attempted: 2 })
    ));
    assert!(matches!(feeder.next_batch(), Err(Error::StreamExhausted)));

    let stats = feeder.shutdown();
    assert!(stats
        .workers
        .iter()
        .all(|w| w.outcome == WorkerOutcome::Barren));
}

/// A source whose storage has gone away entirely
struct BrokenSource;

impl ChunkSource for BrokenSource {
    fn next_chunk(&mut self) -> Result<Option<RawChunk>> {
        Err(Error::Io(std::io::Error::other("device gone")))
    }

    fn reread(&mut self, path: &Path) -> Result<RawChunk> {
        Err(Error::InvalidOperation(format!(
            "cannot reread {}",
            path.display()
        )))
    }

    fn len(&self) -> usize {
        1
    }

    fn passes_completed(&self) -> u64 {
        0
    }
}

#[test]
fn failing_worker_stops_its_siblings() {
    init_tracing();
    let good = MemoryChunkSource::in_order(vec![encoded_chunk(0..50)]);
    let mut feeder = ParallelFeeder::from_sources(
        vec![Box::new(good), Box::new(BrokenSource)],
        &config(5, 5, 2),
    )
    .unwrap();

    let mut failure = None;
    loop {
        match feeder.next_batch() {
            Ok(_) => {}
            Err(Error::StreamExhausted) => break,
            Err(e) => failure = Some(e),
        }
    }

    assert!(matches!(
        failure,
        Some(Error::WorkerFailed { worker: 1, .. })
    ));
    assert!(feeder.is_cancelled());
    let stats = feeder.shutdown();
    assert_eq!(stats.failed_workers().count(), 1);
    assert_eq!(stats.workers[0].outcome, WorkerOutcome::Cancelled);
}

struct PanickingSource;

impl ChunkSource for PanickingSource {
    fn next_chunk(&mut self) -> Result<Option<RawChunk>> {
        panic!("source blew up");
    }

    fn reread(&mut self, _path: &Path) -> Result<RawChunk> {
        unreachable!()
    }

    fn len(&self) -> usize {
        1
    }

    fn passes_completed(&self) -> u64 {
        0
    }
}

#[test]
fn panicking_worker_is_reported() {
    let mut feeder =
        ParallelFeeder::from_sources(vec![Box::new(PanickingSource)], &config(4, 4, 1)).unwrap();
    assert!(matches!(
        feeder.next_batch(),
        Err(Error::WorkerFailed { worker: 0, .. })
    ));
    assert!(matches!(feeder.next_batch(), Err(Error::StreamExhausted)));
}

#[test]
fn dropping_the_feeder_joins_workers() {
    let source = MemoryChunkSource::in_order(vec![encoded_chunk(0..32)]);
    let mut feeder =
        ParallelFeeder::from_sources(vec![Box::new(source)], &config(4, 4, 1)).unwrap();
    assert!(feeder
        .next_batch_timeout(Duration::from_secs(5))
        .unwrap()
        .is_some());
    drop(feeder);
}
