// src/cursor.rs

//! Cursor state and its flat checkpoint representation.
//!
//! The cursor is the minimal position from which the whole shuffle
//! trajectory can be reconstructed: together with the immutable seed offset
//! and worker topology it pins down every chunk permutation and every
//! in-window sequence order. Checkpoints are exchanged as a flat mapping of
//! named integer fields; persistence of that mapping is the caller's
//! business.
//!
//! The key set is an explicit contract per strategy — a strategy reads
//! exactly the keys it writes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::WindowStrategy;
use crate::error::{LoaderError, Result};

/// Flat checkpoint mapping handed to the persistence layer.
pub type StateDict = BTreeMap<String, u64>;

/// Completed sweeps, common to both strategies.
pub const KEY_SWEEP_INDEX: &str = "sweepIndex";
/// Samples delivered to this worker in the current epoch.
pub const KEY_SAMPLES_SEEN: &str = "numberOfSamplesSeenSoFar";
/// Consumed entries of the window that starts at the saved chunk position.
pub const KEY_POSITION_IN_WINDOW: &str = "currentSequencePositionInWindow";
/// Global chunk position of the active window (block shuffle).
pub const KEY_GLOBAL_CHUNK_POSITION: &str = "globalChunkPosition";
/// Global chunk position of the active window (no shuffle).
pub const KEY_CURRENT_CHUNK_POSITION: &str = "currentChunkPosition";
/// Within-sweep sequence position used for worker decimation (no shuffle).
pub const KEY_CURRENT_SEQUENCE_POSITION: &str = "currentSequencePosition";

/// Minimal resumable position in the shuffled stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorState {
    /// Completed sweeps.
    pub sweep_index: u64,
    /// Global chunk position where the active window begins.
    pub chunk_position: u64,
    /// Within-sweep sequence position at the window start; only meaningful
    /// for the no-shuffle strategy, always zero otherwise.
    pub sequence_position: u64,
    /// Entries of the active window already consumed.
    pub position_in_window: u64,
}

impl CursorState {
    /// Capture this cursor as a flat named-integer mapping.
    pub fn to_dict(&self, strategy: WindowStrategy) -> StateDict {
        let mut dict = StateDict::new();
        dict.insert(KEY_SWEEP_INDEX.to_string(), self.sweep_index);
        dict.insert(KEY_POSITION_IN_WINDOW.to_string(), self.position_in_window);
        match strategy {
            WindowStrategy::ChunkBlockShuffle => {
                dict.insert(KEY_GLOBAL_CHUNK_POSITION.to_string(), self.chunk_position);
            }
            WindowStrategy::NoShuffle => {
                dict.insert(KEY_CURRENT_CHUNK_POSITION.to_string(), self.chunk_position);
                dict.insert(
                    KEY_CURRENT_SEQUENCE_POSITION.to_string(),
                    self.sequence_position,
                );
            }
        }
        dict
    }

    /// Rebuild a cursor from a flat mapping.
    ///
    /// # Errors
    ///
    /// Returns [`LoaderError::State`] when a required field is missing.
    pub fn from_dict(dict: &StateDict, strategy: WindowStrategy) -> Result<Self> {
        let sweep_index = require(dict, KEY_SWEEP_INDEX)?;
        let position_in_window = require(dict, KEY_POSITION_IN_WINDOW)?;
        let (chunk_position, sequence_position) = match strategy {
            WindowStrategy::ChunkBlockShuffle => (require(dict, KEY_GLOBAL_CHUNK_POSITION)?, 0),
            WindowStrategy::NoShuffle => (
                require(dict, KEY_CURRENT_CHUNK_POSITION)?,
                require(dict, KEY_CURRENT_SEQUENCE_POSITION)?,
            ),
        };
        Ok(Self {
            sweep_index,
            chunk_position,
            sequence_position,
            position_in_window,
        })
    }
}

/// Fetch a required field from a state mapping.
pub fn require(dict: &StateDict, key: &str) -> Result<u64> {
    dict.get(key)
        .copied()
        .ok_or_else(|| LoaderError::state(format!("missing checkpoint field '{key}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_shuffle_roundtrip() {
        let cursor = CursorState {
            sweep_index: 3,
            chunk_position: 17,
            sequence_position: 0,
            position_in_window: 5,
        };
        let dict = cursor.to_dict(WindowStrategy::ChunkBlockShuffle);
        let restored = CursorState::from_dict(&dict, WindowStrategy::ChunkBlockShuffle).unwrap();
        assert_eq!(cursor, restored);
    }

    #[test]
    fn test_no_shuffle_roundtrip() {
        let cursor = CursorState {
            sweep_index: 1,
            chunk_position: 9,
            sequence_position: 27,
            position_in_window: 2,
        };
        let dict = cursor.to_dict(WindowStrategy::NoShuffle);
        let restored = CursorState::from_dict(&dict, WindowStrategy::NoShuffle).unwrap();
        assert_eq!(cursor, restored);
    }

    #[test]
    fn test_key_contract_per_strategy() {
        let cursor = CursorState::default();

        let block = cursor.to_dict(WindowStrategy::ChunkBlockShuffle);
        assert!(block.contains_key(KEY_SWEEP_INDEX));
        assert!(block.contains_key(KEY_POSITION_IN_WINDOW));
        assert!(block.contains_key(KEY_GLOBAL_CHUNK_POSITION));
        assert!(!block.contains_key(KEY_CURRENT_CHUNK_POSITION));

        let plain = cursor.to_dict(WindowStrategy::NoShuffle);
        assert!(plain.contains_key(KEY_CURRENT_CHUNK_POSITION));
        assert!(plain.contains_key(KEY_CURRENT_SEQUENCE_POSITION));
        assert!(!plain.contains_key(KEY_GLOBAL_CHUNK_POSITION));
    }

    #[test]
    fn test_missing_field_is_an_error() {
        let mut dict = CursorState::default().to_dict(WindowStrategy::ChunkBlockShuffle);
        dict.remove(KEY_GLOBAL_CHUNK_POSITION);

        let result = CursorState::from_dict(&dict, WindowStrategy::ChunkBlockShuffle);
        assert!(result.is_err());
        let message = result.unwrap_err().to_string();
        assert!(message.contains(KEY_GLOBAL_CHUNK_POSITION));
    }

    #[test]
    fn test_strategies_do_not_share_position_keys() {
        // A checkpoint taken under one strategy must not silently restore
        // under the other.
        let dict = CursorState::default().to_dict(WindowStrategy::ChunkBlockShuffle);
        assert!(CursorState::from_dict(&dict, WindowStrategy::NoShuffle).is_err());
    }
}
