//! Fixed-size batches and the assembler that builds them
//!
//! A batch stores each record field in its own contiguous column so the training
//! loop can hand the buffers to its tensor library without further copying. Index
//! `i` of every column always refers to the same source record.

use bytemuck::pod_collect_to_vec;

use crate::error::{Error, Result};
use crate::record::{
    PositionRecord, INPUT_PLANES, NUM_INTERSECTIONS, PLANES_BYTES, POLICY_OUTPUTS, PROBS_BYTES,
    WINNER_BYTES,
};

/// Exactly `batch_size` records, stored column by column
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    planes: Vec<u8>,
    probs: Vec<u8>,
    winner: Vec<u8>,
    len: usize,
}

impl Batch {
    /// Number of records in this batch
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the batch holds no records
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Concatenated plane bytes, `len * 6498` bytes
    pub fn planes(&self) -> &[u8] {
        &self.planes
    }

    /// Concatenated probability bytes, `len * 1448` bytes
    pub fn probs(&self) -> &[u8] {
        &self.probs
    }

    /// Concatenated outcome bytes, `len * 4` bytes
    pub fn winner(&self) -> &[u8] {
        &self.winner
    }

    /// Planes widened to `f32` by value (each cell becomes 0.0 or 1.0)
    pub fn planes_f32(&self) -> Vec<f32> {
        self.planes.iter().map(|&cell| f32::from(cell)).collect()
    }

    /// Probabilities reinterpreted from their stored bit patterns
    pub fn probs_f32(&self) -> Vec<f32> {
        pod_collect_to_vec(&self.probs)
    }

    /// Outcomes reinterpreted from their stored bit patterns
    pub fn winner_f32(&self) -> Vec<f32> {
        pod_collect_to_vec(&self.winner)
    }

    /// Tensor shape of the planes column
    pub fn planes_shape(&self) -> [usize; 3] {
        [self.len, INPUT_PLANES, NUM_INTERSECTIONS]
    }

    /// Tensor shape of the probabilities column
    pub fn probs_shape(&self) -> [usize; 2] {
        [self.len, POLICY_OUTPUTS]
    }

    /// Tensor shape of the outcome column
    pub fn winner_shape(&self) -> [usize; 2] {
        [self.len, 1]
    }

    /// Rebuild the record stored at `index`
    pub fn record(&self, index: usize) -> Option<PositionRecord> {
        if index >= self.len {
            return None;
        }
        let column = |width: usize| index * width..(index + 1) * width;
        let mut bytes = Vec::with_capacity(PLANES_BYTES + PROBS_BYTES + WINNER_BYTES);
        bytes.extend_from_slice(&self.planes[column(PLANES_BYTES)]);
        bytes.extend_from_slice(&self.probs[column(PROBS_BYTES)]);
        bytes.extend_from_slice(&self.winner[column(WINNER_BYTES)]);
        PositionRecord::from_bytes(&bytes).ok()
    }

    /// Take ownership of the three columns `(planes, probs, winner)`
    pub fn into_parts(self) -> (Vec<u8>, Vec<u8>, Vec<u8>) {
        (self.planes, self.probs, self.winner)
    }
}

/// Accumulates records into the three columns of a batch
#[derive(Debug)]
pub struct BatchBuilder {
    planes: Vec<u8>,
    probs: Vec<u8>,
    winner: Vec<u8>,
    len: usize,
    capacity: usize,
}

impl BatchBuilder {
    /// Create a builder sized for `capacity` records
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            planes: Vec::with_capacity(capacity * PLANES_BYTES),
            probs: Vec::with_capacity(capacity * PROBS_BYTES),
            winner: Vec::with_capacity(capacity * WINNER_BYTES),
            len: 0,
            capacity,
        }
    }

    /// Append one record to every column
    pub fn push(&mut self, record: &PositionRecord) {
        self.planes.extend_from_slice(record.planes());
        self.probs.extend_from_slice(record.probs_bytes());
        self.winner.extend_from_slice(record.winner_bytes());
        self.len += 1;
    }

    /// Number of records pushed so far
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether nothing has been pushed
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether the builder holds `capacity` records
    pub fn is_full(&self) -> bool {
        self.len >= self.capacity
    }

    /// Finish the batch. Fails unless exactly `capacity` records were pushed.
    pub fn finish(self) -> Result<Batch> {
        if self.len != self.capacity {
            return Err(Error::InvalidOperation(format!(
                "batch holds {} records, expected {}",
                self.len, self.capacity
            )));
        }
        Ok(Batch {
            planes: self.planes,
            probs: self.probs,
            winner: self.winner,
            len: self.len,
        })
    }
}

/// Groups a record stream into fixed-size batches.
///
/// A short batch is never produced: if the stream ends permanently before a batch
/// is full, the leftover records are dropped and [`Error::StreamExhausted`] is returned.
pub struct BatchAssembler<I> {
    records: I,
    batch_size: usize,
    exhausted: bool,
    batches_emitted: u64,
}

impl<I> BatchAssembler<I>
where
    I: Iterator<Item = Result<PositionRecord>>,
{
    /// Create an assembler producing batches of `batch_size` records
    pub fn new(records: I, batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(Error::InvalidConfig(
                "batch_size must be greater than 0".into(),
            ));
        }
        Ok(Self {
            records,
            batch_size,
            exhausted: false,
            batches_emitted: 0,
        })
    }

    /// Records per batch
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Number of batches produced so far
    pub fn batches_emitted(&self) -> u64 {
        self.batches_emitted
    }

    /// Pull records until a full batch is available.
    ///
    /// Errors from the record stream are returned as-is and the partially filled
    /// batch is discarded.
    pub fn next_batch(&mut self) -> Result<Batch> {
        if self.exhausted {
            return Err(Error::StreamExhausted);
        }

        let mut builder = BatchBuilder::with_capacity(self.batch_size);
        while !builder.is_full() {
            match self.records.next() {
                Some(Ok(record)) => builder.push(&record),
                Some(Err(e)) => return Err(e),
                None => {
                    self.exhausted = true;
                    tracing::debug!(
                        dropped = builder.len(),
                        batch_size = self.batch_size,
                        "record stream ended before batch was full"
                    );
                    return Err(Error::StreamExhausted);
                }
            }
        }

        self.batches_emitted += 1;
        builder.finish()
    }

    /// Get a reference to the underlying record stream
    pub fn records(&self) -> &I {
        &self.records
    }
}

impl<I> Iterator for BatchAssembler<I>
where
    I: Iterator<Item = Result<PositionRecord>>,
{
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_batch() {
            Err(Error::StreamExhausted) => None,
            other => Some(other),
        }
    }
}
