//! Corpus discovery and sharding

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chunkfeed_core::error::{Error, Result};

/// File extension of compressed chunk files
pub const CHUNK_EXTENSION: &str = ".gz";

/// The set of chunk files selected for one stream (training or validation)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Corpus {
    paths: Vec<PathBuf>,
    location: String,
}

impl Corpus {
    /// Find every chunk file matching `prefix`.
    ///
    /// The last component of `prefix` is a file name prefix; everything before it is the
    /// directory to search. `data/train_` matches `data/train_0.gz`, `data/train_17.gz`
    /// and so on. A prefix ending in a separator (or naming a directory) matches every
    /// chunk file in that directory. A missing directory yields an empty corpus.
    pub fn discover<P: AsRef<Path>>(prefix: P) -> Result<Self> {
        let prefix = prefix.as_ref();
        let location = prefix.display().to_string();

        let (dir, stem) = if prefix.is_dir() || location.ends_with(std::path::MAIN_SEPARATOR) {
            (prefix.to_path_buf(), String::new())
        } else {
            let dir = match prefix.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
                _ => PathBuf::from("."),
            };
            let stem = prefix
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            (dir, stem)
        };

        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::warn!(dir = %dir.display(), "corpus directory does not exist");
                return Ok(Self {
                    paths: Vec::new(),
                    location,
                });
            }
            Err(e) => return Err(Error::Io(e)),
        };

        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(stem.as_str()) && name.ends_with(CHUNK_EXTENSION) {
                paths.push(entry.path());
            }
        }
        paths.sort();

        tracing::debug!(location = %location, chunks = paths.len(), "discovered corpus");
        Ok(Self { paths, location })
    }

    /// Build a corpus from an explicit list of chunk paths
    pub fn from_paths<P: Into<PathBuf>>(
        paths: impl IntoIterator<Item = P>,
        location: impl Into<String>,
    ) -> Self {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
            location: location.into(),
        }
    }

    /// Chunk paths in this corpus
    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Take ownership of the chunk paths
    pub fn into_paths(self) -> Vec<PathBuf> {
        self.paths
    }

    /// Description of where the corpus was found
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Number of chunk files
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    /// Whether no chunk files were found
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Fail with [`Error::EmptyCorpus`] if there is nothing to read
    pub fn require_non_empty(&self) -> Result<()> {
        if self.is_empty() {
            return Err(Error::EmptyCorpus {
                location: self.location.clone(),
            });
        }
        Ok(())
    }

    /// Split into at most `workers` disjoint shards, dealing chunks round-robin.
    ///
    /// When there are fewer chunks than workers, only as many shards as chunks are
    /// returned so that no shard starts empty.
    pub fn shard(&self, workers: usize) -> Result<Vec<Corpus>> {
        if workers == 0 {
            return Err(Error::InvalidArgument(
                "shard count must be greater than 0".into(),
            ));
        }
        self.require_non_empty()?;

        let count = workers.min(self.paths.len());
        if count < workers {
            tracing::warn!(
                requested = workers,
                chunks = self.paths.len(),
                "fewer chunks than workers, reducing worker count"
            );
        }

        let mut shards: Vec<Vec<PathBuf>> = vec![Vec::new(); count];
        for (i, path) in self.paths.iter().enumerate() {
            shards[i % count].push(path.clone());
        }

        Ok(shards
            .into_iter()
            .enumerate()
            .map(|(i, paths)| Corpus {
                paths,
                location: format!("{} (shard {i}/{count})", self.location),
            })
            .collect())
    }
}
