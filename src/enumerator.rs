// src/enumerator.rs

//! Epoch, sharding, and budget driver.
//!
//! The enumerator is the consumer-facing component: it drives epochs over
//! the window pipeline, applies the invalid-sequence policy, enforces
//! global/local sample budgets, and tracks sweep and epoch boundaries.
//!
//! # Example
//!
//! ```ignore
//! use loader_core::{Enumerator, EpochConfig, EpochSize, LoaderConfig};
//!
//! let mut enumerator = Enumerator::new(source, LoaderConfig::default())?;
//! enumerator.start_epoch(EpochConfig::single_worker(EpochSize::Sweeps(1)))?;
//!
//! loop {
//!     let batch = enumerator.next_sequences(1024, 1024)?;
//!     for sequence in &batch.sequences {
//!         let chunk = &batch.chunks[&sequence.chunk_id];
//!         // materialize the sequence from the chunk payload
//!     }
//!     if batch.at_epoch_end {
//!         break;
//!     }
//! }
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use crate::cleaner::{AcceptAll, SequenceCleaner};
use crate::config::{per_worker_sample_share, EpochConfig, EpochSize, LoaderConfig, WindowStrategy};
use crate::cursor::{self, CursorState, StateDict, KEY_SAMPLES_SEEN};
use crate::error::{LoaderError, Result};
use crate::source::{ChunkId, ChunkRef, ChunkSource, SequenceDescriptor};
use crate::window::{StagePosition, WindowManager};

/// Where the enumerator stands in the epoch lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpochPhase {
    NotStarted,
    InEpoch,
    EpochComplete,
}

/// One batch of sequence descriptors plus the chunk payloads they live in.
#[derive(Default)]
pub struct SequenceBatch {
    pub sequences: Vec<SequenceDescriptor>,
    pub chunks: HashMap<ChunkId, ChunkRef>,
    pub at_epoch_end: bool,
}

impl SequenceBatch {
    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty()
    }

    /// Samples carried by this batch.
    pub fn sample_count(&self) -> u64 {
        self.sequences
            .iter()
            .map(|s| u64::from(s.sample_count))
            .sum()
    }
}

impl std::fmt::Debug for SequenceBatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequenceBatch")
            .field("sequences", &self.sequences.len())
            .field("chunks", &self.chunks.len())
            .field("at_epoch_end", &self.at_epoch_end)
            .finish()
    }
}

/// Drives reproducible, shardable epochs over a chunked source.
pub struct Enumerator {
    source: Arc<dyn ChunkSource>,
    config: LoaderConfig,
    cleaner: Arc<dyn SequenceCleaner>,
    window: WindowManager,
    phase: EpochPhase,
    epoch: Option<EpochConfig>,
    /// Completed sweeps since construction; continues across epochs.
    sweep_index: u64,
    /// Sweep index when the current epoch started.
    epoch_start_sweep: u64,
    /// Samples delivered to this worker in the current epoch.
    samples_seen: u64,
    /// Cleaner-rejected sequences over the enumerator's lifetime.
    invalid_seen: u64,
}

impl Enumerator {
    /// Creates an enumerator that accepts every sequence.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an invalid loader config or an
    /// empty source.
    pub fn new(source: Arc<dyn ChunkSource>, config: LoaderConfig) -> Result<Self> {
        Self::with_cleaner(source, config, Arc::new(AcceptAll))
    }

    /// Creates an enumerator with an explicit invalid-sequence policy.
    pub fn with_cleaner(
        source: Arc<dyn ChunkSource>,
        config: LoaderConfig,
        cleaner: Arc<dyn SequenceCleaner>,
    ) -> Result<Self> {
        config.validate()?;
        if source.chunk_count() == 0 {
            return Err(LoaderError::config("source has no chunks"));
        }
        let window = WindowManager::new(source.clone(), config.clone());
        Ok(Self {
            source,
            config,
            cleaner,
            window,
            phase: EpochPhase::NotStarted,
            epoch: None,
            sweep_index: 0,
            epoch_start_sweep: 0,
            samples_seen: 0,
            invalid_seen: 0,
        })
    }

    /// Begin an epoch under the given worker topology and size.
    ///
    /// Per-epoch sample counters reset; the sweep timeline does not. A
    /// prefetch armed before the boundary keeps running when the topology is
    /// unchanged — the next epoch consumes the window it was already
    /// building.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an invalid topology, or when
    /// chunk-level sharding would leave a worker without any chunks.
    pub fn start_epoch(&mut self, epoch: EpochConfig) -> Result<()> {
        epoch.validate()?;
        if self.config.strategy == WindowStrategy::ChunkBlockShuffle
            && epoch.worker_count > self.source.chunk_count() as usize
        {
            return Err(LoaderError::config(format!(
                "worker_count {} exceeds chunk count {}; chunk-level sharding would starve workers",
                epoch.worker_count,
                self.source.chunk_count()
            )));
        }

        self.window.set_topology(epoch.worker_count, epoch.worker_rank);
        self.samples_seen = 0;
        self.epoch_start_sweep = self.sweep_index;
        self.epoch = Some(epoch);
        self.phase = EpochPhase::InEpoch;
        tracing::info!(
            worker_count = epoch.worker_count,
            worker_rank = epoch.worker_rank,
            epoch_size = ?epoch.epoch_size,
            sweep_index = self.sweep_index,
            "epoch started"
        );
        Ok(())
    }

    /// Pull the next batch of sequence descriptors.
    ///
    /// `global_sample_budget` bounds what the whole worker fleet may take
    /// from this call position; `local_sample_budget` bounds this worker
    /// alone. The pull stops at whichever budget is exhausted first or at a
    /// sweep boundary — except under an unbounded epoch, where the stream
    /// runs straight through sweeps until the budget is spent. At least one
    /// sequence is delivered per call while the epoch has data left, even
    /// when its sample count overshoots the budget.
    ///
    /// # Errors
    ///
    /// - [`LoaderError::ChunkFetch`] when the deserializer failed for a
    ///   chunk the stream needs; raised at the window join, attributed to
    ///   the chunk.
    /// - [`LoaderError::InvalidSequencesExceeded`] once the cleaner has
    ///   rejected more sequences than configured.
    /// - [`LoaderError::Config`] when no epoch has been started.
    pub fn next_sequences(
        &mut self,
        global_sample_budget: u64,
        local_sample_budget: u64,
    ) -> Result<SequenceBatch> {
        let epoch = match (self.phase, self.epoch) {
            (EpochPhase::NotStarted, _) | (EpochPhase::InEpoch, None) => {
                return Err(LoaderError::config(
                    "next_sequences called before start_epoch",
                ))
            }
            (EpochPhase::EpochComplete, _) => {
                return Ok(SequenceBatch {
                    at_epoch_end: true,
                    ..SequenceBatch::default()
                })
            }
            (EpochPhase::InEpoch, Some(epoch)) => epoch,
        };

        let mut budget = local_sample_budget.min(per_worker_sample_share(
            global_sample_budget,
            epoch.worker_count,
            epoch.worker_rank,
        ));
        if let EpochSize::Samples(total) = epoch.epoch_size {
            let share = per_worker_sample_share(total, epoch.worker_count, epoch.worker_rank);
            budget = budget.min(share.saturating_sub(self.samples_seen));
        }

        let mut batch = SequenceBatch::default();
        let mut collected = 0u64;

        while collected < budget && !self.is_end_reached(&epoch) {
            let descriptor = self.window.next_descriptor()?;

            if descriptor.is_end_of_sweep() {
                self.sweep_index += 1;
                tracing::debug!(sweep_index = self.sweep_index, "sweep completed");
                if matches!(epoch.epoch_size, EpochSize::Unbounded) {
                    continue;
                }
                // Sweep boundaries end the pull even with budget remaining.
                break;
            }

            if !self.cleaner.is_valid(&descriptor) {
                self.invalid_seen += 1;
                tracing::warn!(
                    chunk_id = descriptor.chunk_id,
                    index_in_chunk = descriptor.index_in_chunk,
                    dropped = self.invalid_seen,
                    "dropping invalid sequence"
                );
                if self.invalid_seen > self.config.max_invalid_sequences {
                    return Err(LoaderError::InvalidSequencesExceeded {
                        dropped: self.invalid_seen,
                        limit: self.config.max_invalid_sequences,
                    });
                }
                continue;
            }

            let chunk = self.window.chunk(descriptor.chunk_id).ok_or_else(|| {
                LoaderError::chunk_fetch(descriptor.chunk_id, "chunk not resident in active window")
            })?;
            batch.chunks.entry(descriptor.chunk_id).or_insert(chunk);
            collected += u64::from(descriptor.sample_count);
            self.samples_seen += u64::from(descriptor.sample_count);
            batch.sequences.push(descriptor);
        }

        batch.at_epoch_end = self.is_end_reached(&epoch);
        if batch.at_epoch_end {
            self.phase = EpochPhase::EpochComplete;
            tracing::info!(
                samples_seen = self.samples_seen,
                sweep_index = self.sweep_index,
                "epoch complete"
            );
        }
        Ok(batch)
    }

    fn is_end_reached(&self, epoch: &EpochConfig) -> bool {
        match epoch.epoch_size {
            EpochSize::Sweeps(sweeps) => self.sweep_index - self.epoch_start_sweep >= sweeps,
            EpochSize::Samples(total) => {
                self.samples_seen
                    >= per_worker_sample_share(total, epoch.worker_count, epoch.worker_rank)
            }
            EpochSize::Unbounded => false,
        }
    }

    /// Capture the cursor as a flat named-integer mapping.
    pub fn get_state(&self) -> StateDict {
        let start = self.window.window_start();
        let state = CursorState {
            sweep_index: self.sweep_index,
            chunk_position: start.chunk_position,
            sequence_position: start.sequence_position,
            position_in_window: self.window.consumed() as u64,
        };
        let mut dict = state.to_dict(self.config.strategy);
        dict.insert(KEY_SAMPLES_SEEN.to_string(), self.samples_seen);
        dict
    }

    /// Re-point the loader to a captured cursor.
    ///
    /// Discards any in-flight prefetch (its output is stale), reseeds the
    /// shuffle trajectory from the restored position, and re-arms the
    /// pipeline there. Restore after `start_epoch` to resume mid-epoch; the
    /// sweep budget of the current epoch restarts from the restored sweep.
    ///
    /// # Errors
    ///
    /// Returns [`LoaderError::State`] when a required field is missing —
    /// including a checkpoint taken under the other window strategy.
    pub fn set_state(&mut self, state: &StateDict) -> Result<()> {
        let restored = CursorState::from_dict(state, self.config.strategy)?;
        let samples_seen = cursor::require(state, KEY_SAMPLES_SEEN)?;

        self.window.restore(
            StagePosition {
                chunk_position: restored.chunk_position,
                sequence_position: restored.sequence_position,
            },
            restored.position_in_window,
        );
        self.sweep_index = restored.sweep_index;
        self.epoch_start_sweep = restored.sweep_index;
        self.samples_seen = samples_seen;
        if self.epoch.is_some() {
            self.phase = EpochPhase::InEpoch;
        }
        tracing::info!(
            sweep_index = restored.sweep_index,
            chunk_position = restored.chunk_position,
            "state restored"
        );
        Ok(())
    }

    pub fn phase(&self) -> EpochPhase {
        self.phase
    }

    /// Completed sweeps since construction.
    pub fn sweep_index(&self) -> u64 {
        self.sweep_index
    }

    /// Samples delivered to this worker in the current epoch.
    pub fn samples_seen(&self) -> u64 {
        self.samples_seen
    }

    /// Cleaner-rejected sequences so far.
    pub fn invalid_sequences(&self) -> u64 {
        self.invalid_seen
    }

    /// Total chunks in the underlying source.
    pub fn chunk_count(&self) -> u32 {
        self.source.chunk_count()
    }
}
