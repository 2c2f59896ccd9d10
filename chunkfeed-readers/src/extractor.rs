//! Chunk decompression and record extraction
//!
//! A chunk payload has no header and no record count: it is a flat concatenation of
//! fixed-size records, so its length must divide evenly by [`RECORD_SIZE`]. A payload
//! that does not is rejected as a whole and never partially parsed.

use std::io::Read;
use std::path::Path;

use flate2::read::MultiGzDecoder;

use chunkfeed_core::config::ChunkCompression;
use chunkfeed_core::error::{Error, Result};
use chunkfeed_core::record::{PositionRecord, RECORD_SIZE};
use chunkfeed_core::source::RawChunk;

/// Leading bytes of every gzip member
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Turns raw chunk blobs into position records
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordExtractor {
    compression: ChunkCompression,
}

impl RecordExtractor {
    /// Create an extractor for chunks stored with `compression`
    pub fn new(compression: ChunkCompression) -> Self {
        Self { compression }
    }

    /// Compression this extractor expects
    pub fn compression(&self) -> ChunkCompression {
        self.compression
    }

    /// Decompress a chunk into its record payload
    pub fn decompress(&self, chunk: &RawChunk) -> Result<Vec<u8>> {
        let gzipped = match self.compression {
            ChunkCompression::Gzip => true,
            ChunkCompression::Uncompressed => false,
            ChunkCompression::Auto => chunk.bytes.starts_with(&GZIP_MAGIC),
        };
        if !gzipped {
            return Ok(chunk.bytes.clone());
        }

        // payloads are typically several times larger than the compressed blob
        let mut payload = Vec::with_capacity(chunk.bytes.len() * 4);
        MultiGzDecoder::new(chunk.bytes.as_slice())
            .read_to_end(&mut payload)
            .map_err(|source| Error::Decompress {
                path: chunk.path.clone(),
                source,
            })?;
        Ok(payload)
    }

    /// Decompress a chunk and split it into records, in file order
    pub fn extract(&self, chunk: &RawChunk) -> Result<Vec<PositionRecord>> {
        let payload = self.decompress(chunk)?;
        split_records(&chunk.path, &payload)
    }
}

/// Split a decompressed payload into records.
///
/// Fails with [`Error::MalformedChunk`] unless the payload length is an exact multiple
/// of the record size.
pub fn split_records(path: &Path, payload: &[u8]) -> Result<Vec<PositionRecord>> {
    if payload.len() % RECORD_SIZE != 0 {
        return Err(Error::MalformedChunk {
            path: path.to_path_buf(),
            len: payload.len(),
            record_size: RECORD_SIZE,
        });
    }

    payload
        .chunks_exact(RECORD_SIZE)
        .map(PositionRecord::from_bytes)
        .collect()
}
