//! Error types for chunk readers
//!
//! Readers share the core error taxonomy so that per-chunk failures keep their
//! classification as they travel up through the worker pipeline.

pub use chunkfeed_core::error::{Error, Result};
