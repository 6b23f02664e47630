// src/window/prefetch.rs

//! Background window staging.
//!
//! A staging walk is a pure function of its start position: every chunk
//! permutation and sequence order it produces is derived from explicit
//! seeds, so re-running the walk from a saved cursor regenerates the exact
//! same window. The walk never reads or writes the active window; its
//! result crosses the thread boundary as a [`StagedWindow`] inside the
//! task's `JoinHandle`, and a deserializer failure inside the task surfaces
//! when that handle is joined.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::config::{LoaderConfig, RandomizationWindow, WindowStrategy};
use crate::error::{LoaderError, Result};
use crate::shuffle;
use crate::source::{
    ChunkDescriptor, ChunkId, ChunkRef, ChunkSource, SequenceDescriptor, END_OF_SWEEP,
};

/// Walk cursor: global chunk position plus the within-sweep sequence
/// position used for sequence-level worker decimation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StagePosition {
    pub chunk_position: u64,
    pub sequence_position: u64,
}

/// Output of one staging walk.
pub(crate) struct StagedWindow {
    pub start: StagePosition,
    pub end: StagePosition,
    pub sequences: Vec<SequenceDescriptor>,
    pub chunks: HashMap<ChunkId, ChunkRef>,
    pub descriptors: Vec<ChunkDescriptor>,
}

/// Everything a staging task needs, owned, so nothing is borrowed across
/// the task boundary.
pub(crate) struct StageRequest {
    pub source: Arc<dyn ChunkSource>,
    pub config: LoaderConfig,
    pub worker_count: usize,
    pub worker_rank: usize,
    pub start: StagePosition,
    /// Payloads already held by the active window; reused instead of
    /// re-fetched when the walk revisits their chunk ids.
    pub resident: HashMap<ChunkId, ChunkRef>,
}

pub(crate) fn spawn_stage(request: StageRequest) -> JoinHandle<Result<StagedWindow>> {
    thread::spawn(move || stage_window(request))
}

/// Build the next window by walking forward from `request.start`.
///
/// The walk covers global chunk positions until it has collected the
/// configured randomization range of chunks (or samples) owned by this
/// worker. Positions owned by other workers advance the bookkeeping only.
/// Crossing the last chunk of a sweep pushes the end-of-sweep marker and,
/// for the shuffling strategy, re-derives a fresh chunk permutation for the
/// next sweep.
pub(crate) fn stage_window(request: StageRequest) -> Result<StagedWindow> {
    let StageRequest {
        source,
        config,
        worker_count,
        worker_rank,
        start,
        resident,
    } = request;

    let chunk_count = u64::from(source.chunk_count());
    debug_assert!(chunk_count > 0, "staging requires a non-empty source");
    let workers = worker_count as u64;
    let rank = worker_rank as u64;

    let mut position = start.chunk_position;
    let mut sequence_position = start.sequence_position;
    let start_sweep = position / chunk_count;

    let mut current_sweep = start_sweep;
    let mut order = sweep_order(&config, chunk_count, current_sweep);

    let mut remaining: u64 = match config.randomization_window {
        RandomizationWindow::Chunks(n) => n as u64,
        RandomizationWindow::Samples(n) => n,
    };

    let mut sequences: Vec<SequenceDescriptor> = Vec::new();
    let mut descriptors: Vec<ChunkDescriptor> = Vec::new();
    let mut chunks: HashMap<ChunkId, ChunkRef> = HashMap::new();
    let mut pending: Vec<ChunkId> = Vec::new();

    // Positions walked since the range last shrank. A full barren sweep
    // means this worker's shard contributes nothing (e.g. all-empty
    // sequences under a sample-sized window); the window ships as-is
    // rather than walking forever.
    let mut stalled = 0u64;

    while remaining > 0 && stalled < chunk_count {
        let sweep = position / chunk_count;
        if sweep != current_sweep {
            current_sweep = sweep;
            order = sweep_order(&config, chunk_count, current_sweep);
        }
        let sweep_position = position % chunk_count;
        let chunk_id = order[sweep_position as usize];

        let before = remaining;
        match config.strategy {
            WindowStrategy::ChunkBlockShuffle => {
                if sweep_position % workers == rank {
                    let descs = source.sequences_for_chunk(chunk_id)?;
                    let samples: u64 = descs.iter().map(|d| u64::from(d.sample_count)).sum();
                    descriptors.push(ChunkDescriptor {
                        id: chunk_id,
                        sequence_count: descs.len() as u32,
                    });
                    stage_chunk_payload(chunk_id, &resident, &mut chunks, &mut pending);
                    sequences.extend(descs);
                    remaining = match config.randomization_window {
                        RandomizationWindow::Chunks(_) => remaining - 1,
                        RandomizationWindow::Samples(_) => remaining.saturating_sub(samples),
                    };
                }
            }
            WindowStrategy::NoShuffle => {
                let descs = source.sequences_for_chunk(chunk_id)?;
                let total = descs.len() as u64;
                let mut retained_samples = 0u64;
                let mut retained = 0u32;
                for (index, desc) in descs.into_iter().enumerate() {
                    if (sequence_position + index as u64) % workers == rank {
                        retained_samples += u64::from(desc.sample_count);
                        retained += 1;
                        sequences.push(desc);
                    }
                }
                sequence_position += total;
                if retained > 0 {
                    descriptors.push(ChunkDescriptor {
                        id: chunk_id,
                        sequence_count: total as u32,
                    });
                    stage_chunk_payload(chunk_id, &resident, &mut chunks, &mut pending);
                }
                remaining = match config.randomization_window {
                    RandomizationWindow::Chunks(_) => remaining - 1,
                    RandomizationWindow::Samples(_) => remaining.saturating_sub(retained_samples),
                };
            }
        }
        stalled = if remaining < before { 0 } else { stalled + 1 };

        // Marker goes exactly after the last chunk's sequences, and the
        // decimation position restarts with the new sweep.
        if sweep_position == chunk_count - 1 {
            sequences.push(END_OF_SWEEP);
            sequence_position = 0;
        }
        position += 1;
    }

    fetch_payloads(
        source.as_ref(),
        &mut chunks,
        pending,
        config.multithreaded_fetch,
    )?;

    if config.strategy == WindowStrategy::ChunkBlockShuffle {
        shuffle_sweep_segments(
            &mut sequences,
            start.chunk_position,
            start_sweep,
            config.seed_offset,
        );
    }

    tracing::debug!(
        start = start.chunk_position,
        end = position,
        sequences = sequences.len(),
        chunks = chunks.len(),
        "window staged"
    );

    Ok(StagedWindow {
        start,
        end: StagePosition {
            chunk_position: position,
            sequence_position,
        },
        sequences,
        chunks,
        descriptors,
    })
}

/// Chunk visit order for one sweep.
fn sweep_order(config: &LoaderConfig, chunk_count: u64, sweep_index: u64) -> Vec<ChunkId> {
    match config.strategy {
        WindowStrategy::ChunkBlockShuffle => {
            shuffle::sweep_chunk_order(chunk_count as u32, sweep_index, config.seed_offset)
        }
        WindowStrategy::NoShuffle => (0..chunk_count as u32).collect(),
    }
}

/// Record that a staged sequence needs `id`'s payload: reuse a resident
/// handle when the active window already holds one, otherwise queue a fetch.
fn stage_chunk_payload(
    id: ChunkId,
    resident: &HashMap<ChunkId, ChunkRef>,
    chunks: &mut HashMap<ChunkId, ChunkRef>,
    pending: &mut Vec<ChunkId>,
) {
    if chunks.contains_key(&id) || pending.contains(&id) {
        return;
    }
    if let Some(chunk) = resident.get(&id) {
        chunks.insert(id, chunk.clone());
    } else {
        pending.push(id);
    }
}

fn fetch_payloads(
    source: &dyn ChunkSource,
    chunks: &mut HashMap<ChunkId, ChunkRef>,
    pending: Vec<ChunkId>,
    multithreaded: bool,
) -> Result<()> {
    if multithreaded && pending.len() > 1 {
        thread::scope(|scope| {
            let handles: Vec<_> = pending
                .iter()
                .map(|&id| (id, scope.spawn(move || source.get_chunk(id))))
                .collect();
            for (id, handle) in handles {
                let chunk = handle
                    .join()
                    .map_err(|_| LoaderError::chunk_fetch(id, "payload fetch thread panicked"))??;
                chunks.insert(id, chunk);
            }
            Ok(())
        })
    } else {
        for id in pending {
            let chunk = source.get_chunk(id)?;
            chunks.insert(id, chunk);
        }
        Ok(())
    }
}

/// Shuffle each per-sweep segment of the staged sequence list in place.
///
/// Segments are delimited by end-of-sweep markers, which stay where they
/// are; each segment gets its own seed so concatenated sweeps remain
/// independently randomized.
fn shuffle_sweep_segments(
    sequences: &mut [SequenceDescriptor],
    window_start: u64,
    start_sweep: u64,
    seed_offset: u64,
) {
    let mut segment_start = 0usize;
    let mut segment_index = 0u64;
    for i in 0..=sequences.len() {
        let at_boundary = i == sequences.len() || sequences[i].is_end_of_sweep();
        if !at_boundary {
            continue;
        }
        let seed = shuffle::sequence_order_seed(
            window_start,
            start_sweep + segment_index,
            segment_index,
            seed_offset,
        );
        shuffle::shuffle(&mut sequences[segment_start..i], seed);
        segment_start = i + 1;
        segment_index += 1;
    }
}
