//! Feeder configuration

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// How chunk files are compressed on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkCompression {
    /// GZIP compression
    #[default]
    Gzip,
    /// Raw record payload
    Uncompressed,
    /// Detect gzip by its magic bytes, otherwise treat as raw
    Auto,
}

/// Configuration for a feeder run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeederConfig {
    /// Records held by each worker's shuffle buffer
    pub shuffle_buffer_capacity: usize,

    /// Keep one in `downsample_rate` records (1 keeps everything)
    pub downsample_rate: u32,

    /// Records per delivered batch
    pub batch_size: usize,

    /// Number of worker pipelines
    pub worker_count: usize,

    /// Batches that may wait in the delivery channel
    pub channel_capacity: usize,

    /// Base seed for all randomized stages; entropy when unset
    pub seed: Option<u64>,

    /// Stop after this many full passes over the corpus; cycle forever when unset
    pub max_passes: Option<u64>,

    /// Compression of the chunk files
    pub compression: ChunkCompression,
}

impl Default for FeederConfig {
    fn default() -> Self {
        Self {
            shuffle_buffer_capacity: 1 << 20,
            downsample_rate: 16,
            batch_size: 512,
            worker_count: num_cpus::get(),
            channel_capacity: 4,
            seed: None,
            max_passes: None,
            compression: ChunkCompression::Gzip,
        }
    }
}

impl FeederConfig {
    /// Configuration for the validation stream, which is never down-sampled
    pub fn validation(&self) -> Self {
        Self {
            downsample_rate: 1,
            ..self.clone()
        }
    }

    /// Check that every option is usable
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::InvalidConfig(
                "batch_size must be greater than 0".into(),
            ));
        }
        if self.downsample_rate == 0 {
            return Err(Error::InvalidConfig(
                "downsample_rate must be at least 1".into(),
            ));
        }
        if self.worker_count == 0 {
            return Err(Error::InvalidConfig(
                "worker_count must be greater than 0".into(),
            ));
        }
        if self.channel_capacity == 0 {
            return Err(Error::InvalidConfig(
                "channel_capacity must be greater than 0".into(),
            ));
        }
        if self.max_passes == Some(0) {
            return Err(Error::InvalidConfig(
                "max_passes must be at least 1 when set".into(),
            ));
        }
        Ok(())
    }

    /// Parse and validate a JSON configuration
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Seed for one randomized stage of one worker, if the run is seeded
    pub fn stage_seed(&self, worker: usize, salt: u64) -> Option<u64> {
        self.seed.map(|seed| {
            seed.wrapping_mul(0x9E37_79B9_7F4A_7C15)
                .wrapping_add((worker as u64) << 8)
                .wrapping_add(salt)
        })
    }
}
