//! Chunk file writer

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use flate2::write::GzEncoder;
use flate2::Compression;

use chunkfeed_core::config::ChunkCompression;
use chunkfeed_core::error::Result;
use chunkfeed_core::record::PositionRecord;

/// Writes position records as a single chunk file
#[derive(Debug, Clone, Copy)]
pub struct ChunkWriter {
    compression: ChunkCompression,
    level: Compression,
}

impl ChunkWriter {
    /// Create a writer. `Auto` writes gzip.
    pub fn new(compression: ChunkCompression) -> Self {
        Self {
            compression,
            level: Compression::default(),
        }
    }

    /// Set the gzip compression level (0-9)
    pub fn with_level(mut self, level: u32) -> Self {
        self.level = Compression::new(level.min(9));
        self
    }

    fn write_to<W: Write>(&self, sink: W, records: &[PositionRecord]) -> Result<W> {
        match self.compression {
            ChunkCompression::Uncompressed => {
                let mut sink = sink;
                for record in records {
                    sink.write_all(record.as_bytes())?;
                }
                Ok(sink)
            }
            ChunkCompression::Gzip | ChunkCompression::Auto => {
                let mut encoder = GzEncoder::new(sink, self.level);
                for record in records {
                    encoder.write_all(record.as_bytes())?;
                }
                Ok(encoder.finish()?)
            }
        }
    }

    /// Encode records into chunk file bytes
    pub fn encode(&self, records: &[PositionRecord]) -> Result<Vec<u8>> {
        self.write_to(Vec::new(), records)
    }

    /// Write records to a chunk file at `path`
    pub fn write<P: AsRef<Path>>(&self, path: P, records: &[PositionRecord]) -> Result<()> {
        let file = File::create(path.as_ref())?;
        let mut sink = self.write_to(BufWriter::new(file), records)?;
        sink.flush()?;
        Ok(())
    }
}
