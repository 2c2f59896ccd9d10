//! Record stream over a chunk source
//!
//! Pulls chunks from a [`ChunkSource`], extracts their records and yields them one at a
//! time. Per-chunk failures are absorbed here: a failed read is retried once, and a chunk
//! that still cannot be read, decompressed or split is logged and skipped. Only when every
//! distinct chunk of the source has failed since the last good one does the stream give up
//! with [`Error::NoUsableChunks`].

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chunkfeed_core::error::{Error, Result};
use chunkfeed_core::record::PositionRecord;
use chunkfeed_core::source::{ChunkSource, RawChunk};

use crate::extractor::RecordExtractor;

/// Counters describing what a record stream has read
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    /// Chunks successfully extracted
    pub chunks_read: u64,

    /// Chunks skipped after a read, decompression or layout failure
    pub chunks_skipped: u64,

    /// Reads that were retried
    pub read_retries: u64,

    /// Records yielded
    pub records_read: u64,
}

/// Yields the records of every chunk a source supplies, in chunk order
pub struct RecordStream<S> {
    source: S,
    extractor: RecordExtractor,
    pending: std::vec::IntoIter<PositionRecord>,
    /// Distinct chunks that produced no records since the last productive one
    barren: HashSet<PathBuf>,
    finished: bool,
    stats: StreamStats,
}

impl<S: ChunkSource> RecordStream<S> {
    /// Create a stream reading from `source`
    pub fn new(source: S, extractor: RecordExtractor) -> Self {
        Self {
            source,
            extractor,
            pending: Vec::new().into_iter(),
            barren: HashSet::new(),
            finished: false,
            stats: StreamStats::default(),
        }
    }

    /// Counters for this stream
    pub fn stats(&self) -> StreamStats {
        self.stats
    }

    /// Get a reference to the chunk source
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Fetch the next chunk, retrying a failed read once
    fn fetch(&mut self) -> Result<Option<RawChunk>> {
        match self.source.next_chunk() {
            Err(Error::ChunkRead { path, source }) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %source,
                    "chunk read failed, retrying once"
                );
                self.stats.read_retries += 1;
                self.source.reread(&path).map(Some)
            }
            other => other,
        }
    }

    /// Load the next chunk into `pending`. Returns `false` at permanent exhaustion.
    fn load_next_chunk(&mut self) -> Result<bool> {
        let extracted = match self.fetch() {
            Ok(None) => return Ok(false),
            Ok(Some(chunk)) => self
                .extractor
                .extract(&chunk)
                .map(|records| (chunk.path, chunk.pass, records)),
            Err(e) => Err(e),
        };

        match extracted {
            Ok((path, pass, records)) => {
                tracing::debug!(
                    path = %path.display(),
                    pass,
                    records = records.len(),
                    "extracted chunk"
                );
                self.stats.chunks_read += 1;
                if records.is_empty() {
                    self.note_barren(&path)?;
                } else {
                    self.barren.clear();
                }
                self.pending = records.into_iter();
                Ok(true)
            }
            Err(e) if e.is_chunk_recoverable() => {
                let path = e.chunk_path().map(Path::to_path_buf).unwrap_or_default();
                tracing::warn!(path = %path.display(), error = %e, "skipping chunk");
                self.stats.chunks_skipped += 1;
                self.note_barren(&path)?;
                Ok(true)
            }
            Err(e) => Err(e),
        }
    }

    /// Fail once every distinct chunk has come up empty with no good chunk in between
    fn note_barren(&mut self, path: &Path) -> Result<()> {
        self.barren.insert(path.to_path_buf());
        let attempted = self.source.len().max(1);
        if self.barren.len() >= attempted {
            return Err(Error::NoUsableChunks { attempted });
        }
        Ok(())
    }
}

impl<S: ChunkSource> Iterator for RecordStream<S> {
    type Item = Result<PositionRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(record) = self.pending.next() {
                self.stats.records_read += 1;
                return Some(Ok(record));
            }
            if self.finished {
                return None;
            }
            match self.load_next_chunk() {
                Ok(true) => {}
                Ok(false) => {
                    self.finished = true;
                    tracing::debug!(
                        chunks = self.stats.chunks_read,
                        records = self.stats.records_read,
                        "chunk source exhausted"
                    );
                    return None;
                }
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e));
                }
            }
        }
    }
}
