// SPDX-License-Identifier: MPL-2.0-only

use derive_setters::Setters;
use serde::{Deserialize, Serialize};
use std::{
    fs, io,
    path::{Path, PathBuf},
};
use thiserror::Error;

pub const NAME: &str = "cosmic-frames";
pub const CONFIG_FILE: &str = "config.ron";

/// How the load stage brings raw file bytes into memory.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReadStrategy {
    /// Map the file into the address space.
    #[default]
    Mapped,
    /// Read the whole file into a heap buffer.
    Streamed,
}

/// A single pipeline worker thread.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, Default, PartialEq, Eq, Setters)]
#[serde(deny_unknown_fields)]
#[must_use]
pub struct Worker {
    /// processing unit the worker is pinned to, if any
    #[serde(default)]
    pub cpu: Option<usize>,
}

impl Worker {
    pub fn pinned(cpu: usize) -> Self {
        Self { cpu: Some(cpu) }
    }
}

/// Configuration of the content-keyed decode pipeline.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq, Setters)]
#[serde(deny_unknown_fields, default)]
#[must_use]
pub struct Pipeline {
    /// workers reading raw files from disk
    pub load_workers: Vec<Worker>,
    /// workers running the decoders
    pub decode_workers: Vec<Worker>,
    /// number of slots each stage may hold before producers block
    pub stage_capacity: usize,
    pub read_strategy: ReadStrategy,
}

impl Default for Pipeline {
    fn default() -> Self {
        let cores = std::thread::available_parallelism().map_or(2, usize::from);

        Self {
            load_workers: vec![Worker::default()],
            decode_workers: vec![Worker::default(); cores.saturating_sub(1).max(1)],
            stage_capacity: 16,
            read_strategy: ReadStrategy::default(),
        }
    }
}

impl Pipeline {
    /// Stage capacity, never below one slot.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.stage_capacity.max(1)
    }
}

/// Configuration of the GPU frame cache.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq, Setters)]
#[serde(deny_unknown_fields, default)]
#[must_use]
pub struct Cache {
    /// maximum number of frames resident in transfer buffers
    pub max_frames: usize,
    /// unused transfer buffers kept around for reuse
    pub max_idle_buffers: usize,
}

impl Default for Cache {
    fn default() -> Self {
        Self {
            max_frames: 32,
            max_idle_buffers: 8,
        }
    }
}

#[derive(Debug, Default, Deserialize, Serialize, Clone, PartialEq, Eq, Setters)]
#[serde(deny_unknown_fields, default)]
#[must_use]
pub struct Config {
    pub pipeline: Pipeline,
    pub cache: Cache,
    /// directory whose frames the daemon prefetches
    pub source: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum Error {
    /// No configuration directory is known for this user.
    #[error("no configuration directory available")]
    NoConfigDir,
    #[error("failed to read {path}: {1}", path = .0.display())]
    Io(PathBuf, #[source] io::Error),
    #[error("failed to parse {path}: {1}", path = .0.display())]
    Parse(PathBuf, #[source] ron::error::SpannedError),
}

impl Config {
    /// Creates a config with fallback defaults.
    pub fn fallback() -> Self {
        Self::default()
    }

    /// Location of the user's configuration file.
    #[must_use]
    pub fn path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(NAME).join(CONFIG_FILE))
    }

    /// Load the user's configuration file.
    ///
    /// # Errors
    ///
    /// Fails if the file is missing, unreadable, or does not parse.
    pub fn load() -> Result<Self, Error> {
        let path = Self::path().ok_or(Error::NoConfigDir)?;
        Self::load_from(&path)
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Fails if the file is unreadable or does not parse.
    pub fn load_from(path: &Path) -> Result<Self, Error> {
        let text = fs::read_to_string(path).map_err(|why| Error::Io(path.to_path_buf(), why))?;
        ron::from_str(&text).map_err(|why| Error::Parse(path.to_path_buf(), why))
    }

    /// Load the user's configuration, falling back to defaults on any error.
    pub fn load_or_fallback() -> Self {
        match Self::load() {
            Ok(config) => config,
            Err(Error::Io(path, why)) if why.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                Self::fallback()
            }
            Err(why) => {
                tracing::warn!(%why, "config file error, falling back to defaults");
                Self::fallback()
            }
        }
    }
}
