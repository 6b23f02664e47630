// src/source.rs

//! Deserializer contract.
//!
//! The loader never parses an on-disk format itself. A [`ChunkSource`]
//! produces immutable chunk payloads and enumerates the sequences they
//! contain; everything else in this crate works in terms of the lightweight
//! descriptors defined here.

use std::sync::Arc;

use crate::error::Result;

/// Identifier of a chunk, stable for the lifetime of the dataset.
pub type ChunkId = u32;

/// Opaque, immutable chunk payload.
///
/// Payloads are produced once by the deserializer and only ever read after
/// that, so a single allocation can be shared between the active and the
/// staged window without locking.
pub trait Chunk: Send + Sync {}

/// Shared handle to a chunk payload.
pub type ChunkRef = Arc<dyn Chunk>;

/// Lightweight handle to a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkDescriptor {
    pub id: ChunkId,
    pub sequence_count: u32,
}

/// Describes one sequence inside a chunk.
///
/// A sequence is materialized lazily by the consumer; the loader only moves
/// descriptors around.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SequenceDescriptor {
    pub chunk_id: ChunkId,
    pub index_in_chunk: u32,
    pub sample_count: u32,
}

/// In-band marker separating sweeps in the sequence stream.
///
/// The triple of all-maximum field values can never occur in real data: a
/// real descriptor refers to an existing chunk and a real in-chunk index.
pub const END_OF_SWEEP: SequenceDescriptor = SequenceDescriptor {
    chunk_id: ChunkId::MAX,
    index_in_chunk: u32::MAX,
    sample_count: u32::MAX,
};

impl SequenceDescriptor {
    /// Whether this descriptor is the end-of-sweep marker.
    pub fn is_end_of_sweep(&self) -> bool {
        self.chunk_id == END_OF_SWEEP.chunk_id
            && self.index_in_chunk == END_OF_SWEEP.index_in_chunk
            && self.sample_count == END_OF_SWEEP.sample_count
    }
}

/// Source of chunk data, implemented by the deserializer.
///
/// Implementations must be pure functions of the chunk id: the same id
/// always yields the same payload and the same sequence enumeration, in a
/// stable order. Retry policy for transient I/O failures belongs to the
/// implementation; the loader treats a returned error as permanent.
pub trait ChunkSource: Send + Sync {
    /// Total number of chunks in the dataset.
    fn chunk_count(&self) -> u32;

    /// Fetch the payload of a chunk.
    ///
    /// # Errors
    ///
    /// Returns [`crate::LoaderError::ChunkFetch`] when the chunk cannot be
    /// produced.
    fn get_chunk(&self, id: ChunkId) -> Result<ChunkRef>;

    /// Enumerate the sequences contained in a chunk.
    fn sequences_for_chunk(&self, id: ChunkId) -> Result<Vec<SequenceDescriptor>>;
}
