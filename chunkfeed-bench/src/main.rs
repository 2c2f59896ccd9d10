//! Benchmark runner for chunkfeed pipelines
//!
//! Set `CHUNKFEED_CONFIG` to a JSON feeder configuration to benchmark something other
//! than the defaults, and `RUST_LOG` to see the pipeline's own logging.

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use chunkfeed_bench::{bench_feeder, BenchConfig, BenchResult};
use chunkfeed_core::FeederConfig;

fn print_result(result: &BenchResult, batch_size: usize) {
    println!("\nBenchmark: {}", result.name);
    println!("  Batch size:        {batch_size}");
    println!("  Batches:           {}", result.batches);
    println!("  Total time:        {:?}", result.total_time);
    println!("  Per 100 batches:   {:?}", result.per_hundred_batches());
    println!("  Throughput:        {:.2} pos/sec", result.throughput);
    println!("  Records read:      {}", result.stats.records_read());
    println!("  Chunks skipped:    {}", result.stats.chunks_skipped());
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let mut config = BenchConfig::default();
    if let Ok(path) = std::env::var("CHUNKFEED_CONFIG") {
        config.feeder = FeederConfig::from_json_file(&path)
            .with_context(|| format!("loading feeder config from {path}"))?;
    }

    println!("=== chunkfeed benchmarks ===");

    let training = bench_feeder(&config).context("training feeder benchmark failed")?;
    print_result(&training, config.feeder.batch_size);

    let validation = BenchConfig {
        feeder: config.feeder.validation(),
        ..config.clone()
    };
    let mut result = bench_feeder(&validation).context("validation feeder benchmark failed")?;
    result.name = "ParallelFeeder (validation, no down-sampling)".into();
    print_result(&result, validation.feeder.batch_size);

    println!("\n=== Worker scaling ===");
    for workers in [1, 2, 4, 8] {
        let scaled = BenchConfig {
            feeder: FeederConfig {
                worker_count: workers,
                ..config.feeder.clone()
            },
            ..config.clone()
        };
        let result = bench_feeder(&scaled)?;
        println!("\nWorkers: {}", result.stats.workers.len());
        println!("  Per 100 batches:   {:?}", result.per_hundred_batches());
        println!("  Throughput:        {:.2} pos/sec", result.throughput);
    }

    Ok(())
}
