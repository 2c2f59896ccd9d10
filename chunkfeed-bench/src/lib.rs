//! Throughput benchmarks for chunkfeed pipelines

use std::path::Path;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use chunkfeed_core::record::{PLANES_BYTES, POLICY_OUTPUTS};
use chunkfeed_core::{ChunkCompression, FeederConfig, PositionRecord, Result};
use chunkfeed_parallel::{FeederStats, ParallelFeeder};
use chunkfeed_readers::{ChunkWriter, Corpus};

/// File-name prefix of synthetic chunk files
pub const SYNTHETIC_PREFIX: &str = "synthetic_";

/// Benchmark configuration
#[derive(Debug, Clone)]
pub struct BenchConfig {
    /// Chunk files in the synthetic corpus
    pub files: usize,

    /// Positions per chunk file
    pub records_per_file: usize,

    /// Batches pulled before timing starts
    pub warmup_batches: usize,

    /// Batches pulled while timing
    pub batches: usize,

    /// Seed for the synthetic positions
    pub corpus_seed: u64,

    /// Feeder under test
    pub feeder: FeederConfig,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            files: 16,
            records_per_file: 2048,
            warmup_batches: 10,
            batches: 100,
            corpus_seed: 0,
            feeder: FeederConfig {
                shuffle_buffer_capacity: 1 << 15,
                ..FeederConfig::default()
            },
        }
    }
}

/// Benchmark result
#[derive(Debug, Clone)]
pub struct BenchResult {
    /// Name of the benchmark
    pub name: String,

    /// Time spent on the timed batches
    pub total_time: Duration,

    /// Batches pulled while timing
    pub batches: usize,

    /// Positions pulled while timing
    pub positions: usize,

    /// Positions per second
    pub throughput: f64,

    /// Feeder statistics at shutdown
    pub stats: FeederStats,
}

impl BenchResult {
    /// Wall time per hundred batches, the figure a training loop cares about
    pub fn per_hundred_batches(&self) -> Duration {
        if self.batches == 0 {
            return Duration::ZERO;
        }
        self.total_time.mul_f64(100.0 / self.batches as f64)
    }
}

/// A random but well-formed position
pub fn synthetic_record(rng: &mut StdRng) -> Result<PositionRecord> {
    let planes: Vec<u8> = (0..PLANES_BYTES)
        .map(|_| u8::from(rng.gen_bool(0.1)))
        .collect();

    let mut probs: Vec<f32> = (0..POLICY_OUTPUTS).map(|_| rng.gen::<f32>()).collect();
    let total: f32 = probs.iter().sum();
    for p in &mut probs {
        *p /= total;
    }

    let winner = if rng.gen_bool(0.5) { 1.0 } else { -1.0 };
    PositionRecord::new(&planes, &probs, winner)
}

/// Write a synthetic gzip corpus into `dir` and discover it
pub fn write_synthetic_corpus(
    dir: &Path,
    files: usize,
    records_per_file: usize,
    seed: u64,
) -> Result<Corpus> {
    let mut rng = StdRng::seed_from_u64(seed);
    let writer = ChunkWriter::new(ChunkCompression::Gzip).with_level(1);

    for file in 0..files {
        let records = (0..records_per_file)
            .map(|_| synthetic_record(&mut rng))
            .collect::<Result<Vec<_>>>()?;
        writer.write(dir.join(format!("{SYNTHETIC_PREFIX}{file}.gz")), &records)?;
    }

    tracing::info!(files, records_per_file, dir = %dir.display(), "wrote synthetic corpus");
    Corpus::discover(dir.join(SYNTHETIC_PREFIX))
}

/// Pull batches from a feeder over `corpus` and measure positions per second
pub fn run_benchmark(name: &str, corpus: &Corpus, config: &BenchConfig) -> Result<BenchResult> {
    let mut feeder = ParallelFeeder::from_corpus(corpus, &config.feeder)?;

    for _ in 0..config.warmup_batches {
        feeder.next_batch()?;
    }

    let start = Instant::now();
    let mut positions = 0;
    for _ in 0..config.batches {
        positions += feeder.next_batch()?.len();
    }
    let total_time = start.elapsed();

    let stats = feeder.shutdown();
    let secs = total_time.as_secs_f64();
    let throughput = if secs > 0.0 {
        positions as f64 / secs
    } else {
        0.0
    };

    Ok(BenchResult {
        name: name.to_string(),
        total_time,
        batches: config.batches,
        positions,
        throughput,
        stats,
    })
}

/// Run the feeder benchmark on a fresh synthetic corpus in a temporary directory
pub fn bench_feeder(config: &BenchConfig) -> Result<BenchResult> {
    let dir = tempfile::tempdir()?;
    let corpus = write_synthetic_corpus(
        dir.path(),
        config.files,
        config.records_per_file,
        config.corpus_seed,
    )?;
    run_benchmark("ParallelFeeder", &corpus, config)
}
