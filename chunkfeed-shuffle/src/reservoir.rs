//! Reservoir shuffle buffer
//!
//! Approximates a full shuffle of an unbounded stream using memory for only
//! `capacity` items:
//!
//! 1. Fill: incoming items are stored until the buffer holds `capacity` of them.
//! 2. Steady state: each new item picks a uniformly random slot, evicts its occupant to
//!    the output and takes its place. Occupancy stays at exactly `capacity`.
//! 3. Drain: when the input ends for good, the remaining items leave in random order.
//!
//! Every insertion evicts a random slot; there is no decreasing keep-probability as in
//! textbook reservoir sampling. Output order is decorrelated from input order within a
//! window proportional to `capacity`. A capacity of 0 or 1 passes items straight through.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use chunkfeed_core::error::Result;

/// Fixed-capacity buffer that emits items by random eviction
#[derive(Debug)]
pub struct ShuffleBuffer<T> {
    slots: Vec<T>,
    capacity: usize,
    rng: StdRng,
}

impl<T> ShuffleBuffer<T> {
    /// Create a buffer holding at most `capacity` items
    pub fn new(capacity: usize, rng: StdRng) -> Self {
        Self {
            // the slots are only reserved as they fill, large capacities are common
            slots: Vec::new(),
            capacity,
            rng,
        }
    }

    /// Create a buffer from an optional seed, falling back to entropy
    pub fn from_seed(capacity: usize, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self::new(capacity, rng)
    }

    /// Maximum number of buffered items
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of buffered items
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether nothing is buffered
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Whether the buffer has reached steady state
    pub fn is_full(&self) -> bool {
        self.slots.len() >= self.capacity
    }

    /// Insert an item, returning the evicted one once the buffer is full.
    ///
    /// With capacity 0 the item itself is returned immediately.
    pub fn insert(&mut self, item: T) -> Option<T> {
        if self.capacity == 0 {
            return Some(item);
        }
        if self.slots.len() < self.capacity {
            self.slots.push(item);
            return None;
        }
        let slot = self.rng.gen_range(0..self.slots.len());
        Some(std::mem::replace(&mut self.slots[slot], item))
    }

    /// Remove every buffered item in random order, leaving the buffer empty
    pub fn drain(&mut self) -> Vec<T> {
        let mut remaining = std::mem::take(&mut self.slots);
        remaining.shuffle(&mut self.rng);
        remaining
    }
}

/// Stream adapter running items through a [`ShuffleBuffer`].
///
/// Errors are forwarded immediately without entering the buffer. When the input ends,
/// the buffer is drained.
pub struct Shuffled<I, T> {
    input: I,
    buffer: ShuffleBuffer<T>,
    draining: Vec<T>,
    input_done: bool,
}

impl<I, T> Shuffled<I, T>
where
    I: Iterator<Item = Result<T>>,
{
    /// Shuffle `input` through `buffer`
    pub fn new(input: I, buffer: ShuffleBuffer<T>) -> Self {
        Self {
            input,
            buffer,
            draining: Vec::new(),
            input_done: false,
        }
    }

    /// The buffer in use
    pub fn buffer(&self) -> &ShuffleBuffer<T> {
        &self.buffer
    }

    /// Get a reference to the wrapped stream
    pub fn inner(&self) -> &I {
        &self.input
    }
}

impl<I, T> Iterator for Shuffled<I, T>
where
    I: Iterator<Item = Result<T>>,
{
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.input_done {
            return self.draining.pop().map(Ok);
        }

        loop {
            match self.input.next() {
                Some(Ok(item)) => {
                    if let Some(evicted) = self.buffer.insert(item) {
                        return Some(Ok(evicted));
                    }
                }
                Some(Err(e)) => return Some(Err(e)),
                None => {
                    self.input_done = true;
                    self.draining = self.buffer.drain();
                    tracing::debug!(
                        remaining = self.draining.len(),
                        "input ended, draining shuffle buffer"
                    );
                    return self.draining.pop().map(Ok);
                }
            }
        }
    }
}
