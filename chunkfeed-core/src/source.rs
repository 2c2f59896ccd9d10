//! Source trait for raw chunk input

use std::path::{Path, PathBuf};

use crate::error::Result;

/// The raw, still-compressed contents of one chunk file
#[derive(Debug, Clone)]
pub struct RawChunk {
    /// Where the chunk came from
    pub path: PathBuf,

    /// Raw file contents
    pub bytes: Vec<u8>,

    /// Zero-based pass over the corpus this chunk was drawn in
    pub pass: u64,
}

/// A supplier of raw chunk blobs for one worker pipeline
pub trait ChunkSource: Send {
    /// Retrieve the next chunk.
    ///
    /// Returns `Ok(None)` once the source is permanently exhausted. Completing a pass
    /// over the corpus is not exhaustion: the source reshuffles and keeps going.
    fn next_chunk(&mut self) -> Result<Option<RawChunk>>;

    /// Read a specific chunk again, used to retry a failed read once
    fn reread(&mut self, path: &Path) -> Result<RawChunk>;

    /// Number of distinct chunks this source cycles through
    fn len(&self) -> usize;

    /// Whether the source has no chunks at all
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of completed passes over the corpus
    fn passes_completed(&self) -> u64;
}

impl<S: ChunkSource + ?Sized> ChunkSource for Box<S> {
    fn next_chunk(&mut self) -> Result<Option<RawChunk>> {
        (**self).next_chunk()
    }

    fn reread(&mut self, path: &Path) -> Result<RawChunk> {
        (**self).reread(path)
    }

    fn len(&self) -> usize {
        (**self).len()
    }

    fn passes_completed(&self) -> u64 {
        (**self).passes_completed()
    }
}
