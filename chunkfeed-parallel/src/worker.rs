//! A single worker pipeline
//!
//! Each worker owns a private chain `ChunkSource -> RecordExtractor -> Sampler ->
//! ShuffleBuffer -> BatchAssembler` and shares nothing with its siblings except the
//! delivery channel and the run-level [`RunControl`].
//!
//! A worker whose whole shard turns out to be unusable stops on its own and leaves its
//! siblings running. The run only fails with [`Error::NoUsableChunks`] once every worker
//! has stopped that way. Any other fatal error, or a panic, cancels the whole run.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{SendTimeoutError, Sender};

use chunkfeed_core::batch::{Batch, BatchAssembler};
use chunkfeed_core::config::FeederConfig;
use chunkfeed_core::error::{Error, Result};
use chunkfeed_core::record::PositionRecord;
use chunkfeed_core::source::ChunkSource;
use chunkfeed_readers::{RecordExtractor, RecordStream};
use chunkfeed_shuffle::{Sampled, Sampler, ShuffleBuffer, Shuffled};

/// Seed salt for the chunk draw order
pub(crate) const CHUNK_ORDER_SALT: u64 = 1;
const SAMPLER_SALT: u64 = 2;
const SHUFFLE_SALT: u64 = 3;

/// How often a producer blocked on a full channel re-checks for cancellation
const SEND_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Messages carried by the delivery channel
pub type Delivery = Result<Batch>;

type WorkerStream = Shuffled<Sampled<RecordStream<Box<dyn ChunkSource>>>, PositionRecord>;

/// State shared by every worker of one run
#[derive(Debug)]
pub struct RunControl {
    cancelled: AtomicBool,
    barren_workers: AtomicUsize,
    workers: usize,
    chunks: usize,
}

impl RunControl {
    /// Control for `workers` workers reading `chunks` chunks in total
    pub fn new(workers: usize, chunks: usize) -> Self {
        Self {
            cancelled: AtomicBool::new(false),
            barren_workers: AtomicUsize::new(0),
            workers,
            chunks,
        }
    }

    /// Ask every worker to stop
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether the run has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Workers that stopped because their whole shard was unusable
    pub fn barren_workers(&self) -> usize {
        self.barren_workers.load(Ordering::SeqCst)
    }

    /// Record a barren worker. Returns `true` for the last worker of the run to go barren.
    fn mark_barren(&self) -> bool {
        self.barren_workers.fetch_add(1, Ordering::SeqCst) + 1 == self.workers
    }
}

/// Why a worker stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerOutcome {
    /// The corpus was permanently exhausted
    Exhausted,
    /// The run was cancelled
    Cancelled,
    /// The consumer went away
    Disconnected,
    /// Every chunk of the worker's shard was unusable
    Barren,
    /// The worker hit a fatal error
    Failed(String),
}

/// Statistics from one worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerStats {
    /// Worker index
    pub worker: usize,

    /// Batches handed to the delivery channel
    pub batches_produced: u64,

    /// Records extracted from chunks
    pub records_read: u64,

    /// Records that survived down-sampling
    pub records_kept: u64,

    /// Chunks successfully extracted
    pub chunks_read: u64,

    /// Chunks skipped after a failure
    pub chunks_skipped: u64,

    /// Chunk reads that were retried
    pub read_retries: u64,

    /// Completed passes over the worker's chunks
    pub passes_completed: u64,

    /// Why the worker stopped
    pub outcome: WorkerOutcome,
}

impl WorkerStats {
    /// Stats for a worker thread that died outside batch assembly.
    ///
    /// Its counters are lost with the thread, so they read as zero.
    pub(crate) fn panicked(worker: usize) -> Self {
        Self {
            worker,
            batches_produced: 0,
            records_read: 0,
            records_kept: 0,
            chunks_read: 0,
            chunks_skipped: 0,
            read_retries: 0,
            passes_completed: 0,
            outcome: WorkerOutcome::Failed("worker panicked".into()),
        }
    }
}

/// One worker's private pipeline from chunks to batches
pub struct WorkerPipeline {
    id: usize,
    assembler: BatchAssembler<WorkerStream>,
    control: Arc<RunControl>,
    batches_produced: u64,
}

impl WorkerPipeline {
    /// Build the pipeline for worker `id` reading from `source`
    pub fn new(
        id: usize,
        source: Box<dyn ChunkSource>,
        config: &FeederConfig,
        control: Arc<RunControl>,
    ) -> Result<Self> {
        let records = RecordStream::new(source, RecordExtractor::new(config.compression));
        let sampler = Sampler::from_seed(
            config.downsample_rate,
            config.stage_seed(id, SAMPLER_SALT),
        )?;
        let buffer = ShuffleBuffer::from_seed(
            config.shuffle_buffer_capacity,
            config.stage_seed(id, SHUFFLE_SALT),
        );
        let shuffled = Shuffled::new(sampler.sample(records), buffer);
        let assembler = BatchAssembler::new(shuffled, config.batch_size)?;

        Ok(Self {
            id,
            assembler,
            control,
            batches_produced: 0,
        })
    }

    /// Worker index
    pub fn id(&self) -> usize {
        self.id
    }

    /// Assemble the next batch on the calling thread
    pub fn next_batch(&mut self) -> Result<Batch> {
        let batch = self.assembler.next_batch()?;
        self.batches_produced += 1;
        Ok(batch)
    }

    /// Current statistics
    pub fn stats(&self, outcome: WorkerOutcome) -> WorkerStats {
        let shuffled = self.assembler.records();
        let sampled = shuffled.inner();
        let stream = sampled.inner();
        let read = stream.stats();

        WorkerStats {
            worker: self.id,
            batches_produced: self.batches_produced,
            records_read: read.records_read,
            records_kept: sampled.sampler().kept(),
            chunks_read: read.chunks_read,
            chunks_skipped: read.chunks_skipped,
            read_retries: read.read_retries,
            passes_completed: stream.source().passes_completed(),
            outcome,
        }
    }

    /// Produce batches into `sender` until exhaustion, cancellation or failure.
    ///
    /// A fatal error or a panic cancels the whole run so sibling workers stop too, and
    /// is delivered to the consumer as [`Error::WorkerFailed`].
    pub fn run(mut self, sender: &Sender<Delivery>) -> WorkerStats {
        tracing::info!("worker started");

        let outcome = loop {
            if self.control.is_cancelled() {
                break WorkerOutcome::Cancelled;
            }

            let Ok(produced) = catch_unwind(AssertUnwindSafe(|| self.next_batch())) else {
                break self.fail(sender, "worker panicked".into());
            };

            match produced {
                Ok(batch) => {
                    if let Some(outcome) = self.deliver(sender, Ok(batch)) {
                        break outcome;
                    }
                }
                Err(Error::StreamExhausted) => break WorkerOutcome::Exhausted,
                Err(Error::NoUsableChunks { attempted }) => {
                    tracing::warn!(
                        attempted,
                        "every chunk of this shard is unusable, stopping worker"
                    );
                    if self.control.mark_barren() {
                        let chunks = self.control.chunks;
                        tracing::error!(chunks, "no worker has a usable chunk");
                        let _ = sender.send(Err(Error::NoUsableChunks { attempted: chunks }));
                    }
                    break WorkerOutcome::Barren;
                }
                Err(e) => break self.fail(sender, e.to_string()),
            }
        };

        let stats = self.stats(outcome);
        tracing::info!(
            batches = stats.batches_produced,
            records = stats.records_read,
            chunks_skipped = stats.chunks_skipped,
            passes = stats.passes_completed,
            outcome = ?stats.outcome,
            "worker stopped"
        );
        stats
    }

    /// Cancel the run and report the failure to the consumer
    fn fail(&self, sender: &Sender<Delivery>, message: String) -> WorkerOutcome {
        tracing::error!(error = %message, "worker failed, shutting down the run");
        self.control.cancel();
        // the failure report waits for the consumer regardless of cancellation
        let _ = sender.send(Err(Error::WorkerFailed {
            worker: self.id,
            message: message.clone(),
        }));
        WorkerOutcome::Failed(message)
    }

    /// Send one delivery, waiting while the channel is full.
    /// Returns the outcome to stop with if the batch could not be delivered.
    fn deliver(&self, sender: &Sender<Delivery>, delivery: Delivery) -> Option<WorkerOutcome> {
        let mut pending = delivery;
        loop {
            match sender.send_timeout(pending, SEND_POLL_INTERVAL) {
                Ok(()) => return None,
                Err(SendTimeoutError::Disconnected(_)) => {
                    return Some(if self.control.is_cancelled() {
                        WorkerOutcome::Cancelled
                    } else {
                        WorkerOutcome::Disconnected
                    });
                }
                Err(SendTimeoutError::Timeout(returned)) => {
                    if self.control.is_cancelled() {
                        return Some(WorkerOutcome::Cancelled);
                    }
                    pending = returned;
                }
            }
        }
    }
}
