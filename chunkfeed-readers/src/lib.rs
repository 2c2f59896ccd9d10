//! Chunk file readers for chunkfeed pipelines
//!
//! This crate discovers chunk files on disk, cycles through them in reshuffled order,
//! decompresses them and splits their payload into fixed-size position records.

#![warn(missing_docs)]

mod error;

pub mod chunk_source;
pub mod corpus;
pub mod extractor;
pub mod stream;
pub mod writer;

pub use chunk_source::{ChunkFileSource, MemoryChunkSource};
pub use corpus::Corpus;
pub use error::{Error, Result};
pub use extractor::{split_records, RecordExtractor};
pub use stream::{RecordStream, StreamStats};
pub use writer::ChunkWriter;

// Re-export core types
pub use chunkfeed_core::{ChunkCompression, ChunkSource, PositionRecord, RawChunk};
