//! Parallel batch feeder
//!
//! Runs one [`WorkerPipeline`] per worker thread. Each worker reads a disjoint shard of
//! the corpus and pushes finished batches into a single bounded channel, so at most
//! `channel_capacity` batches are ever waiting for the consumer.
//!
//! Batches from one worker arrive in the order that worker produced them; batches from
//! different workers are interleaved arbitrarily.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, TryRecvError};
use uuid::Uuid;

use chunkfeed_core::batch::Batch;
use chunkfeed_core::config::FeederConfig;
use chunkfeed_core::error::{Error, Result};
use chunkfeed_core::source::ChunkSource;
use chunkfeed_readers::{ChunkFileSource, Corpus};

use crate::worker::{
    Delivery, RunControl, WorkerOutcome, WorkerPipeline, WorkerStats, CHUNK_ORDER_SALT,
};

/// Statistics for a whole feeder run
#[derive(Debug, Clone)]
pub struct FeederStats {
    /// Identifier attached to every log line of the run
    pub run_id: Uuid,

    /// Batches handed to the consumer
    pub batches_delivered: u64,

    /// Wall-clock time since the feeder started
    pub elapsed: Duration,

    /// Per-worker statistics, ordered by worker index
    pub workers: Vec<WorkerStats>,
}

impl FeederStats {
    /// Records extracted across all workers
    pub fn records_read(&self) -> u64 {
        self.workers.iter().map(|w| w.records_read).sum()
    }

    /// Batches produced across all workers
    pub fn batches_produced(&self) -> u64 {
        self.workers.iter().map(|w| w.batches_produced).sum()
    }

    /// Chunks skipped across all workers
    pub fn chunks_skipped(&self) -> u64 {
        self.workers.iter().map(|w| w.chunks_skipped).sum()
    }

    /// Chunk reads retried across all workers
    pub fn read_retries(&self) -> u64 {
        self.workers.iter().map(|w| w.read_retries).sum()
    }

    /// Delivered positions per second
    pub fn positions_per_second(&self, batch_size: usize) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        self.batches_delivered as f64 * batch_size as f64 / secs
    }

    /// Workers that stopped on a fatal error
    pub fn failed_workers(&self) -> impl Iterator<Item = &WorkerStats> {
        self.workers
            .iter()
            .filter(|w| matches!(w.outcome, WorkerOutcome::Failed(_)))
    }
}

/// Delivers batches assembled by background worker threads
pub struct ParallelFeeder {
    receiver: Option<Receiver<Delivery>>,
    workers: Vec<JoinHandle<WorkerStats>>,
    control: Arc<RunControl>,
    run_id: Uuid,
    batch_size: usize,
    started: Instant,
    batches_delivered: u64,
}

impl ParallelFeeder {
    /// Discover chunk files under `prefix` and start feeding from them
    pub fn discover<P: AsRef<std::path::Path>>(prefix: P, config: &FeederConfig) -> Result<Self> {
        let corpus = Corpus::discover(prefix)?;
        Self::from_corpus(&corpus, config)
    }

    /// Start feeding from a corpus, sharded across `config.worker_count` workers
    pub fn from_corpus(corpus: &Corpus, config: &FeederConfig) -> Result<Self> {
        config.validate()?;
        corpus.require_non_empty()?;

        let sources = corpus
            .shard(config.worker_count)?
            .iter()
            .enumerate()
            .map(|(worker, shard)| {
                let seed = config.stage_seed(worker, CHUNK_ORDER_SALT);
                let source =
                    ChunkFileSource::new(shard, seed)?.with_max_passes(config.max_passes);
                Ok(Box::new(source) as Box<dyn ChunkSource>)
            })
            .collect::<Result<Vec<_>>>()?;

        Self::from_sources(sources, config)
    }

    /// Start one worker per chunk source.
    ///
    /// `config.worker_count` is ignored; the number of sources decides the parallelism.
    pub fn from_sources(sources: Vec<Box<dyn ChunkSource>>, config: &FeederConfig) -> Result<Self> {
        config.validate()?;
        if sources.is_empty() || sources.iter().any(|s| s.is_empty()) {
            return Err(Error::EmptyCorpus {
                location: "chunk sources".into(),
            });
        }

        let chunks = sources.iter().map(|s| s.len()).sum();
        let control = Arc::new(RunControl::new(sources.len(), chunks));
        // build every pipeline before spawning so configuration errors surface first
        let pipelines = sources
            .into_iter()
            .enumerate()
            .map(|(worker, source)| {
                WorkerPipeline::new(worker, source, config, control.clone())
            })
            .collect::<Result<Vec<_>>>()?;

        let run_id = Uuid::new_v4();
        let (sender, receiver) = bounded(config.channel_capacity);
        let mut feeder = Self {
            receiver: Some(receiver),
            workers: Vec::with_capacity(pipelines.len()),
            control,
            run_id,
            batch_size: config.batch_size,
            started: Instant::now(),
            batches_delivered: 0,
        };

        tracing::info!(
            run = %run_id,
            workers = pipelines.len(),
            chunks,
            batch_size = config.batch_size,
            downsample_rate = config.downsample_rate,
            shuffle_buffer = config.shuffle_buffer_capacity,
            "starting feeder"
        );

        for pipeline in pipelines {
            let worker = pipeline.id();
            let sender = sender.clone();
            let control = feeder.control.clone();
            let spawned = thread::Builder::new()
                .name(format!("chunkfeed-worker-{worker}"))
                .spawn(move || {
                    let span = tracing::info_span!("worker", run = %run_id, worker);
                    let _enter = span.enter();
                    match catch_unwind(AssertUnwindSafe(|| pipeline.run(&sender))) {
                        Ok(stats) => stats,
                        Err(_) => {
                            tracing::error!("worker panicked, shutting down the run");
                            control.cancel();
                            let _ = sender.send(Err(Error::WorkerFailed {
                                worker,
                                message: "worker panicked".into(),
                            }));
                            WorkerStats::panicked(worker)
                        }
                    }
                });

            match spawned {
                Ok(handle) => feeder.workers.push(handle),
                Err(e) => {
                    // dropping the feeder stops and joins what already started
                    feeder.cancel();
                    return Err(Error::Io(e));
                }
            }
        }

        Ok(feeder)
    }

    /// Identifier of this run
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Records per batch
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Number of worker threads
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Batches waiting in the channel
    pub fn pending_batches(&self) -> usize {
        self.receiver.as_ref().map_or(0, Receiver::len)
    }

    /// Batches handed to the consumer so far
    pub fn batches_delivered(&self) -> u64 {
        self.batches_delivered
    }

    /// Ask every worker to stop. Batches already queued can still be received.
    pub fn cancel(&self) {
        self.control.cancel();
    }

    /// Whether the run has been cancelled, by the consumer or by a failing worker
    pub fn is_cancelled(&self) -> bool {
        self.control.is_cancelled()
    }

    /// Workers that stopped because every chunk of their shard was unusable
    pub fn barren_workers(&self) -> usize {
        self.control.barren_workers()
    }

    fn receiver(&self) -> Result<&Receiver<Delivery>> {
        self.receiver.as_ref().ok_or(Error::Cancelled)
    }

    fn accept(&mut self, delivery: Delivery) -> Result<Batch> {
        let batch = delivery?;
        self.batches_delivered += 1;
        Ok(batch)
    }

    /// Block until the next batch is available.
    ///
    /// Returns [`Error::StreamExhausted`] once every worker has finished and the
    /// channel is empty.
    pub fn next_batch(&mut self) -> Result<Batch> {
        let delivery = self
            .receiver()?
            .recv()
            .map_err(|_| Error::StreamExhausted)?;
        self.accept(delivery)
    }

    /// Take a batch if one is ready. `Ok(None)` means none is ready yet.
    pub fn try_next_batch(&mut self) -> Result<Option<Batch>> {
        match self.receiver()?.try_recv() {
            Ok(delivery) => self.accept(delivery).map(Some),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(Error::StreamExhausted),
        }
    }

    /// Wait up to `timeout` for a batch. `Ok(None)` means the wait timed out.
    pub fn next_batch_timeout(&mut self, timeout: Duration) -> Result<Option<Batch>> {
        match self.receiver()?.recv_timeout(timeout) {
            Ok(delivery) => self.accept(delivery).map(Some),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(Error::StreamExhausted),
        }
    }

    /// Stop all workers, wait for them and return the run statistics
    pub fn shutdown(mut self) -> FeederStats {
        self.teardown()
    }

    fn teardown(&mut self) -> FeederStats {
        self.cancel();
        // unblocks producers waiting on a full channel
        self.receiver = None;

        let workers = self
            .workers
            .drain(..)
            .enumerate()
            .map(|(worker, handle)| {
                handle
                    .join()
                    .unwrap_or_else(|_| WorkerStats::panicked(worker))
            })
            .collect();

        let stats = FeederStats {
            run_id: self.run_id,
            batches_delivered: self.batches_delivered,
            elapsed: self.started.elapsed(),
            workers,
        };
        tracing::info!(
            run = %self.run_id,
            batches = stats.batches_delivered,
            records = stats.records_read(),
            chunks_skipped = stats.chunks_skipped(),
            elapsed_ms = stats.elapsed.as_millis(),
            "feeder stopped"
        );
        stats
    }
}

impl Iterator for ParallelFeeder {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_batch() {
            Err(Error::StreamExhausted | Error::Cancelled) => None,
            other => Some(other),
        }
    }
}

impl Drop for ParallelFeeder {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            self.teardown();
        }
    }
}

impl std::fmt::Debug for ParallelFeeder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParallelFeeder")
            .field("run_id", &self.run_id)
            .field("workers", &self.workers.len())
            .field("batch_size", &self.batch_size)
            .field("batches_delivered", &self.batches_delivered)
            .finish_non_exhaustive()
    }
}
