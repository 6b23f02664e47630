// src/lib.rs

//! Randomized, resumable, distributed streaming data loader.
//!
//! This crate turns a deserializer exposing coarse-grained, immutable
//! chunks into a reproducible, shardable, shuffled stream of sequence
//! descriptors, consumed one epoch at a time by a training loop. Four
//! properties hold simultaneously:
//!
//! - two-level seeded shuffling (chunk order per sweep, sequence order
//!   inside a bounded look-ahead window), reproducible from a seed offset
//!   and a cursor position;
//! - asynchronous prefetch of the next window while the current one is
//!   consumed, overlapping deserialization latency with compute;
//! - deterministic sharding across a fixed set of workers, computed locally
//!   from position and rank with no communication;
//! - exact checkpoint/restore of the cursor, so a restarted job resumes at
//!   precisely the same logical position in the shuffled stream.
//!
//! The deserializer ([`ChunkSource`]), the invalid-sequence policy
//! ([`SequenceCleaner`]), checkpoint persistence, and the tensor decode are
//! external collaborators; this crate only moves descriptors and shared
//! chunk payloads.

pub mod cleaner;
pub mod config;
pub mod cursor;
pub mod enumerator;
pub mod error;
pub mod shuffle;
pub mod source;
pub mod window;

// Re-export commonly used types for convenience
pub use cleaner::{AcceptAll, DiscardEmpty, SequenceCleaner};
pub use config::{
    per_worker_sample_share, EpochConfig, EpochSize, LoaderConfig, RandomizationWindow,
    WindowStrategy,
};
pub use cursor::{CursorState, StateDict};
pub use enumerator::{Enumerator, EpochPhase, SequenceBatch};
pub use error::{LoaderError, Result};
pub use source::{
    Chunk, ChunkDescriptor, ChunkId, ChunkRef, ChunkSource, SequenceDescriptor, END_OF_SWEEP,
};
pub use window::{StagePosition, Window, WindowManager};
