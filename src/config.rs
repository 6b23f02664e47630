// src/config.rs

//! Loader and epoch configuration.
//!
//! [`LoaderConfig`] is fixed for the lifetime of an enumerator and can be
//! parsed from TOML with `LOADER_*` environment variable overrides.
//! [`EpochConfig`] arrives from the training loop at every epoch start and
//! is immutable for the epoch's duration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

use crate::error::{LoaderError, Result};

/// How the window orders and assigns chunks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowStrategy {
    /// Original chunk and sequence order, sequence-level worker decimation.
    NoShuffle,
    /// Per-sweep chunk permutation, chunk-level sharding, and sequence
    /// shuffling inside the look-ahead window.
    #[default]
    ChunkBlockShuffle,
}

/// Size of the look-ahead randomization window.
///
/// Bounds how far ahead shuffling may reorder sequences, and with it the
/// loader's memory use, independent of dataset size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RandomizationWindow {
    /// This worker's chunks per window.
    Chunks(usize),
    /// This worker's cumulative samples per window; the chunk crossing the
    /// threshold is staged whole.
    Samples(u64),
}

/// Total size of one epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpochSize {
    /// Global sample count, split fairly across workers.
    Samples(u64),
    /// Number of full passes over the dataset.
    Sweeps(u64),
    /// No intrinsic end; the training loop decides when to stop.
    Unbounded,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    pub strategy: WindowStrategy,
    // Offset mixed into every derived seed, for decorrelating runs.
    pub seed_offset: u64,
    // Invalid sequences tolerated (per worker) before the run is aborted.
    pub max_invalid_sequences: u64,
    // Fetch the chunk payloads of one window on parallel threads.
    pub multithreaded_fetch: bool,
    pub randomization_window: RandomizationWindow,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            strategy: WindowStrategy::ChunkBlockShuffle,
            seed_offset: 0,
            max_invalid_sequences: 0,
            multithreaded_fetch: false,
            randomization_window: RandomizationWindow::Chunks(4),
        }
    }
}

impl FromStr for LoaderConfig {
    type Err = LoaderError;

    /// Parse configuration from a TOML string.
    fn from_str(s: &str) -> Result<Self> {
        toml::from_str(s)
            .map_err(|e| LoaderError::config_with_source("failed to parse TOML config", e))
    }
}

impl LoaderConfig {
    // Load configuration from a TOML file.
    //
    // # Errors
    //
    // Returns an error if the file cannot be read or parsed, or if the
    // parsed configuration is invalid.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            LoaderError::config_with_source(
                format!("failed to read config file '{}'", path.display()),
                e,
            )
        })?;
        let config: Self = content.parse()?;
        config.validate()?;
        Ok(config)
    }

    // Apply environment variable overrides.
    //
    // - `LOADER_STRATEGY` overrides `strategy` ("no_shuffle" or
    //   "chunk_block_shuffle")
    // - `LOADER_WINDOW_CHUNKS` / `LOADER_WINDOW_SAMPLES` override
    //   `randomization_window`
    // - `LOADER_SEED_OFFSET` overrides `seed_offset`
    // - `LOADER_MAX_INVALID_SEQUENCES` overrides `max_invalid_sequences`
    // - `LOADER_MULTITHREADED_FETCH` overrides `multithreaded_fetch`
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(val) = std::env::var("LOADER_STRATEGY") {
            match val.to_lowercase().as_str() {
                "no_shuffle" => self.strategy = WindowStrategy::NoShuffle,
                "chunk_block_shuffle" => self.strategy = WindowStrategy::ChunkBlockShuffle,
                _ => {} // ignore invalid values
            }
        }
        if let Ok(val) = std::env::var("LOADER_WINDOW_CHUNKS") {
            if let Ok(v) = val.parse() {
                self.randomization_window = RandomizationWindow::Chunks(v);
            }
        }
        if let Ok(val) = std::env::var("LOADER_WINDOW_SAMPLES") {
            if let Ok(v) = val.parse() {
                self.randomization_window = RandomizationWindow::Samples(v);
            }
        }
        if let Ok(val) = std::env::var("LOADER_SEED_OFFSET") {
            if let Ok(v) = val.parse() {
                self.seed_offset = v;
            }
        }
        if let Ok(val) = std::env::var("LOADER_MAX_INVALID_SEQUENCES") {
            if let Ok(v) = val.parse() {
                self.max_invalid_sequences = v;
            }
        }
        if let Ok(val) = std::env::var("LOADER_MULTITHREADED_FETCH") {
            if let Ok(v) = val.parse() {
                self.multithreaded_fetch = v;
            }
        }
        self
    }

    // Validate all configuration values.
    pub fn validate(&self) -> Result<()> {
        match self.randomization_window {
            RandomizationWindow::Chunks(0) => Err(LoaderError::config(
                "randomization_window.chunks must be greater than 0",
            )),
            RandomizationWindow::Samples(0) => Err(LoaderError::config(
                "randomization_window.samples must be greater than 0",
            )),
            _ => Ok(()),
        }
    }
}

/// Worker topology and epoch size, supplied at epoch start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochConfig {
    pub worker_count: usize,
    pub worker_rank: usize,
    pub epoch_size: EpochSize,
}

impl EpochConfig {
    /// Configuration for a run without sharding.
    pub fn single_worker(epoch_size: EpochSize) -> Self {
        Self {
            worker_count: 1,
            worker_rank: 0,
            epoch_size,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.worker_count == 0 {
            return Err(LoaderError::config("worker_count must be greater than 0"));
        }
        if self.worker_rank >= self.worker_count {
            return Err(LoaderError::config(format!(
                "worker_rank {} out of range (worker count: {})",
                self.worker_rank, self.worker_count
            )));
        }
        Ok(())
    }
}

/// This worker's share of a global sample budget.
///
/// The remainder is spread over the lowest ranks so that the shares of all
/// workers sum to `total` exactly.
pub fn per_worker_sample_share(total: u64, worker_count: usize, worker_rank: usize) -> u64 {
    let workers = worker_count as u64;
    total / workers + u64::from((worker_rank as u64) < total % workers)
}
