//! Core record layout, batch assembly and configuration for chunkfeed pipelines
//!
//! This crate defines the fixed binary layout of a training position, the
//! column-oriented [`Batch`] handed to a training loop, the [`ChunkSource`] trait
//! that every worker pipeline reads from, and the shared error taxonomy.

#![warn(missing_docs)]

pub mod batch;
pub mod config;
pub mod error;
pub mod record;
pub mod source;

// Re-export key types for convenience
pub use batch::{Batch, BatchAssembler, BatchBuilder};
pub use config::{ChunkCompression, FeederConfig};
pub use error::{Error, Result};
pub use record::{PositionRecord, RECORD_SIZE};
pub use source::{ChunkSource, RawChunk};
