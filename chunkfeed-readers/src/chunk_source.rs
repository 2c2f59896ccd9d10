//! Chunk sources that cycle endlessly through a corpus
//!
//! Each pass draws every chunk exactly once in random order. When a pass is complete the
//! drained chunks are reshuffled and become the next pass, so a training run sees a
//! logically infinite stream unless a pass limit is set.

use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use chunkfeed_core::error::{Error, Result};
use chunkfeed_core::source::{ChunkSource, RawChunk};

use crate::corpus::Corpus;

/// Two-pool cycling draw order shared by the chunk sources.
///
/// `pending` holds the rest of the current pass, `drained` what was already drawn.
#[derive(Debug)]
struct CyclicPool<T> {
    pending: Vec<T>,
    drained: Vec<T>,
    rng: Option<StdRng>,
    passes: u64,
    max_passes: Option<u64>,
    exhausted: bool,
}

impl<T: Clone> CyclicPool<T> {
    fn new(items: Vec<T>, rng: Option<StdRng>, max_passes: Option<u64>) -> Self {
        let mut pool = Self {
            pending: items,
            drained: Vec::new(),
            rng,
            passes: 0,
            max_passes,
            exhausted: false,
        };
        pool.arrange_pending();
        pool
    }

    /// Shuffle the pending pool, or reverse it so that popping keeps insertion order
    fn arrange_pending(&mut self) {
        match self.rng.as_mut() {
            Some(rng) => self.pending.shuffle(rng),
            None => self.pending.reverse(),
        }
    }

    fn len(&self) -> usize {
        self.pending.len() + self.drained.len()
    }

    fn draw(&mut self) -> Option<T> {
        if self.exhausted {
            return None;
        }
        if self.pending.is_empty() {
            if self.drained.is_empty() {
                return None;
            }
            self.passes += 1;
            tracing::debug!(
                pass = self.passes,
                chunks = self.drained.len(),
                "completed pass over chunks"
            );
            if self.max_passes.is_some_and(|max| self.passes >= max) {
                self.exhausted = true;
                return None;
            }
            std::mem::swap(&mut self.pending, &mut self.drained);
            self.arrange_pending();
        }

        let item = self.pending.pop()?;
        self.drained.push(item.clone());
        Some(item)
    }
}

fn read_chunk(path: &Path, pass: u64) -> Result<RawChunk> {
    let bytes = std::fs::read(path).map_err(|source| Error::ChunkRead {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(RawChunk {
        path: path.to_path_buf(),
        bytes,
        pass,
    })
}

/// Reads chunk files from disk in reshuffled order, pass after pass
#[derive(Debug)]
pub struct ChunkFileSource {
    pool: CyclicPool<PathBuf>,
    location: String,
}

impl ChunkFileSource {
    /// Create a source over `corpus`, seeded for reproducibility when `seed` is set
    pub fn new(corpus: &Corpus, seed: Option<u64>) -> Result<Self> {
        corpus.require_non_empty()?;
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            pool: CyclicPool::new(corpus.paths().to_vec(), Some(rng), None),
            location: corpus.location().to_string(),
        })
    }

    /// Stop after `max_passes` full passes instead of cycling forever
    pub fn with_max_passes(mut self, max_passes: Option<u64>) -> Self {
        self.pool.max_passes = max_passes;
        self
    }

    /// Description of the corpus being read
    pub fn location(&self) -> &str {
        &self.location
    }
}

impl ChunkSource for ChunkFileSource {
    fn next_chunk(&mut self) -> Result<Option<RawChunk>> {
        if self.pool.len() == 0 {
            return Err(Error::EmptyCorpus {
                location: self.location.clone(),
            });
        }
        match self.pool.draw() {
            Some(path) => read_chunk(&path, self.pool.passes).map(Some),
            None => Ok(None),
        }
    }

    fn reread(&mut self, path: &Path) -> Result<RawChunk> {
        read_chunk(path, self.pool.passes)
    }

    fn len(&self) -> usize {
        self.pool.len()
    }

    fn passes_completed(&self) -> u64 {
        self.pool.passes
    }
}

/// Serves chunk blobs held in memory, cycling like [`ChunkFileSource`]
#[derive(Debug)]
pub struct MemoryChunkSource {
    chunks: Vec<(PathBuf, Vec<u8>)>,
    pool: CyclicPool<usize>,
}

impl MemoryChunkSource {
    /// Serve `chunks` in their given order on every pass
    pub fn in_order(chunks: Vec<Vec<u8>>) -> Self {
        Self::build(chunks, None)
    }

    /// Serve `chunks` in a freshly shuffled order on every pass
    pub fn shuffled(chunks: Vec<Vec<u8>>, seed: u64) -> Self {
        Self::build(chunks, Some(StdRng::seed_from_u64(seed)))
    }

    fn build(chunks: Vec<Vec<u8>>, rng: Option<StdRng>) -> Self {
        let chunks: Vec<_> = chunks
            .into_iter()
            .enumerate()
            .map(|(i, bytes)| {
                let path = PathBuf::from(format!("memory/chunk_{i}.gz"));
                (path, bytes)
            })
            .collect();
        let pool = CyclicPool::new((0..chunks.len()).collect(), rng, None);
        Self { chunks, pool }
    }

    /// Stop after `max_passes` full passes instead of cycling forever
    pub fn with_max_passes(mut self, max_passes: Option<u64>) -> Self {
        self.pool.max_passes = max_passes;
        self
    }
}

impl ChunkSource for MemoryChunkSource {
    fn next_chunk(&mut self) -> Result<Option<RawChunk>> {
        if self.chunks.is_empty() {
            return Err(Error::EmptyCorpus {
                location: "in-memory chunks".into(),
            });
        }
        Ok(self.pool.draw().map(|index| {
            let (path, bytes) = &self.chunks[index];
            RawChunk {
                path: path.clone(),
                bytes: bytes.clone(),
                pass: self.pool.passes,
            }
        }))
    }

    fn reread(&mut self, path: &Path) -> Result<RawChunk> {
        self.chunks
            .iter()
            .find(|(candidate, _)| candidate == path)
            .map(|(path, bytes)| RawChunk {
                path: path.clone(),
                bytes: bytes.clone(),
                pass: self.pool.passes,
            })
            .ok_or_else(|| Error::ChunkRead {
                path: path.to_path_buf(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "no such in-memory chunk",
                ),
            })
    }

    fn len(&self) -> usize {
        self.chunks.len()
    }

    fn passes_completed(&self) -> u64 {
        self.pool.passes
    }
}
