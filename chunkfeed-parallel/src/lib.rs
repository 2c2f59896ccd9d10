//! Parallel batch delivery for chunkfeed pipelines
//!
//! This crate runs several independent reader pipelines on worker threads and hands
//! their batches to a single consumer through a bounded queue.

#![warn(missing_docs)]

pub mod feeder;
pub mod worker;

pub use feeder::{FeederStats, ParallelFeeder};
pub use worker::{WorkerOutcome, WorkerPipeline, WorkerStats};

// Re-export core types
pub use chunkfeed_core::{Batch, Error, FeederConfig, Result};
