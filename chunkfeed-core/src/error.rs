//! Error types for chunkfeed pipelines

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for chunkfeed operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for chunkfeed operations
#[derive(Error, Debug)]
pub enum Error {
    /// IO error outside of chunk reading (config files, thread spawning)
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// A chunk file could not be opened or read
    #[error("failed to read chunk {}: {source}", path.display())]
    ChunkRead {
        /// Path of the chunk file
        path: PathBuf,
        /// Underlying I/O failure
        #[source]
        source: io::Error,
    },

    /// A chunk file could not be decompressed
    #[error("failed to decompress chunk {}: {source}", path.display())]
    Decompress {
        /// Path of the chunk file
        path: PathBuf,
        /// Underlying decoder failure
        #[source]
        source: io::Error,
    },

    /// Decompressed payload is not a whole number of records
    #[error(
        "malformed chunk {}: payload of {len} bytes is not a multiple of the {record_size}-byte record size",
        path.display()
    )]
    MalformedChunk {
        /// Path of the chunk file
        path: PathBuf,
        /// Decompressed payload length in bytes
        len: usize,
        /// Expected record size in bytes
        record_size: usize,
    },

    /// The selected corpus partition contains no chunk files
    #[error("no chunk files found for {location}")]
    EmptyCorpus {
        /// Prefix or description of the corpus that was searched
        location: String,
    },

    /// Every chunk in a full pass over the corpus failed to produce records
    #[error("no usable chunks: all {attempted} chunks of a full pass failed")]
    NoUsableChunks {
        /// Number of consecutive chunks that failed
        attempted: usize,
    },

    /// Input ended permanently before a full batch could be assembled
    #[error("record stream exhausted")]
    StreamExhausted,

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration could not be parsed
    #[error("Configuration parse error: {0}")]
    Config(#[from] serde_json::Error),

    /// Invalid argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Invalid operation
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// A worker pipeline failed and the run was shut down
    #[error("worker {worker} failed: {message}")]
    WorkerFailed {
        /// Index of the failed worker
        worker: usize,
        /// Description of the failure
        message: String,
    },

    /// The run was cancelled
    #[error("Pipeline cancelled")]
    Cancelled,
}

impl Error {
    /// Whether this error only affects a single chunk, so the chunk can be skipped
    /// and processing can continue with the next one.
    pub fn is_chunk_recoverable(&self) -> bool {
        matches!(
            self,
            Error::ChunkRead { .. } | Error::Decompress { .. } | Error::MalformedChunk { .. }
        )
    }

    /// Path of the chunk this error refers to, if any
    pub fn chunk_path(&self) -> Option<&std::path::Path> {
        match self {
            Error::ChunkRead { path, .. }
            | Error::Decompress { path, .. }
            | Error::MalformedChunk { path, .. } => Some(path),
            _ => None,
        }
    }
}
