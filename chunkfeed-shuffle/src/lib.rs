//! Bounded-memory shuffling and down-sampling for chunkfeed pipelines
//!
//! Both stages are stream adapters over `Iterator<Item = Result<T>>`: items are
//! transformed, errors pass through untouched so the worker pipeline can decide what
//! to do with them.

#![warn(missing_docs)]

pub mod reservoir;
pub mod sampler;

pub use reservoir::{ShuffleBuffer, Shuffled};
pub use sampler::{Sampled, Sampler};
