//! Fixed-size position records
//!
//! A position record is the atomic training example. Its on-disk layout is a flat,
//! header-less concatenation of three fields:
//!
//! | field    | type              | bytes |
//! |----------|-------------------|-------|
//! | `planes` | 18 x 361 `u8`     | 6498  |
//! | `probs`  | 362 `f32`         | 1448  |
//! | `winner` | 1 `f32`           | 4     |
//!
//! Floats are stored as raw IEEE-754 bit patterns in native byte order.

use bytemuck::{cast_slice, pod_collect_to_vec};
use static_assertions::const_assert_eq;

use crate::error::{Error, Result};

/// Width and height of the board
pub const BOARD_SIZE: usize = 19;

/// Number of intersections on the board
pub const NUM_INTERSECTIONS: usize = BOARD_SIZE * BOARD_SIZE;

/// Number of input feature planes
pub const INPUT_PLANES: usize = 18;

/// Number of move probabilities (every intersection plus pass)
pub const POLICY_OUTPUTS: usize = NUM_INTERSECTIONS + 1;

/// Bytes taken by the feature planes
pub const PLANES_BYTES: usize = INPUT_PLANES * NUM_INTERSECTIONS;

/// Bytes taken by the move probabilities
pub const PROBS_BYTES: usize = POLICY_OUTPUTS * std::mem::size_of::<f32>();

/// Bytes taken by the game outcome
pub const WINNER_BYTES: usize = std::mem::size_of::<f32>();

/// Total size of one record in bytes
pub const RECORD_SIZE: usize = PLANES_BYTES + PROBS_BYTES + WINNER_BYTES;

const_assert_eq!(PLANES_BYTES, 6498);
const_assert_eq!(PROBS_BYTES, 1448);
const_assert_eq!(RECORD_SIZE, 7950);

const PROBS_OFFSET: usize = PLANES_BYTES;
const WINNER_OFFSET: usize = PLANES_BYTES + PROBS_BYTES;

/// One training example: board planes, move-probability target and game outcome
#[derive(Clone, PartialEq, Eq)]
pub struct PositionRecord {
    data: Box<[u8]>,
}

impl PositionRecord {
    /// Build a record from its three fields
    pub fn new(planes: &[u8], probs: &[f32], winner: f32) -> Result<Self> {
        if planes.len() != PLANES_BYTES {
            return Err(Error::InvalidArgument(format!(
                "expected {PLANES_BYTES} plane bytes, got {}",
                planes.len()
            )));
        }
        if probs.len() != POLICY_OUTPUTS {
            return Err(Error::InvalidArgument(format!(
                "expected {POLICY_OUTPUTS} probabilities, got {}",
                probs.len()
            )));
        }

        let mut data = Vec::with_capacity(RECORD_SIZE);
        data.extend_from_slice(planes);
        data.extend_from_slice(cast_slice(probs));
        data.extend_from_slice(&winner.to_ne_bytes());

        Ok(Self {
            data: data.into_boxed_slice(),
        })
    }

    /// Build a record from exactly `RECORD_SIZE` raw bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != RECORD_SIZE {
            return Err(Error::InvalidArgument(format!(
                "expected {RECORD_SIZE} record bytes, got {}",
                bytes.len()
            )));
        }
        Ok(Self { data: bytes.into() })
    }

    /// The full serialized record
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Feature planes, row-major, one byte per cell
    pub fn planes(&self) -> &[u8] {
        &self.data[..PROBS_OFFSET]
    }

    /// Raw bytes of the move probabilities
    pub fn probs_bytes(&self) -> &[u8] {
        &self.data[PROBS_OFFSET..WINNER_OFFSET]
    }

    /// Raw bytes of the game outcome
    pub fn winner_bytes(&self) -> &[u8] {
        &self.data[WINNER_OFFSET..]
    }

    /// Move probabilities reinterpreted from their stored bit patterns
    pub fn probs(&self) -> Vec<f32> {
        pod_collect_to_vec(self.probs_bytes())
    }

    /// Game outcome from the side to move: -1.0, 0.0 or 1.0
    pub fn winner(&self) -> f32 {
        let mut raw = [0u8; WINNER_BYTES];
        raw.copy_from_slice(self.winner_bytes());
        f32::from_ne_bytes(raw)
    }
}

impl std::fmt::Debug for PositionRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PositionRecord")
            .field("winner", &self.winner())
            .field("len", &self.data.len())
            .finish_non_exhaustive()
    }
}
