// src/window/mod.rs

//! Double-buffered sequence windows.
//!
//! The manager owns one "active" window being consumed and keeps exactly one
//! staging task in flight building the next one. The only blocking point in
//! the pipeline is [`WindowManager::advance_if_exhausted`], which joins the
//! task, commits its window, and immediately re-arms the next staging walk.
//! The staging task never touches the committed cursor; advancing it is a
//! main-path commit.

mod prefetch;

pub use prefetch::StagePosition;

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::config::LoaderConfig;
use crate::error::{LoaderError, Result};
use crate::source::{ChunkDescriptor, ChunkId, ChunkRef, ChunkSource, SequenceDescriptor};

use prefetch::{StageRequest, StagedWindow};

/// A materialized look-ahead window: the shuffled descriptor stream plus
/// the payloads of every chunk the stream references.
#[derive(Default)]
pub struct Window {
    pub sequences: Vec<SequenceDescriptor>,
    pub chunks: HashMap<ChunkId, ChunkRef>,
    pub descriptors: Vec<ChunkDescriptor>,
}

/// Owns the active window and the prefetch pipeline producing the next one.
pub struct WindowManager {
    source: Arc<dyn ChunkSource>,
    config: LoaderConfig,
    worker_count: usize,
    worker_rank: usize,
    active: Window,
    consumed: usize,
    /// Where the active window's staging walk began.
    window_start: StagePosition,
    /// Where the next staging walk begins; advanced only by the commit in
    /// `advance_if_exhausted`.
    committed: StagePosition,
    inflight: Option<JoinHandle<Result<StagedWindow>>>,
    /// Entries to skip in the next committed window, set by a restore that
    /// points into the middle of a window.
    pending_skip: Option<u64>,
}

impl WindowManager {
    pub fn new(source: Arc<dyn ChunkSource>, config: LoaderConfig) -> Self {
        Self {
            source,
            config,
            worker_count: 1,
            worker_rank: 0,
            active: Window::default(),
            consumed: 0,
            window_start: StagePosition::default(),
            committed: StagePosition::default(),
            inflight: None,
            pending_skip: None,
        }
    }

    /// Install the worker topology for the coming epoch.
    ///
    /// A staging task armed under a different topology computed a stale
    /// shard assignment; it is discarded, not awaited. An unchanged
    /// topology keeps the in-flight task: the sweep timeline continues
    /// across epoch boundaries.
    pub fn set_topology(&mut self, worker_count: usize, worker_rank: usize) {
        if (worker_count, worker_rank) == (self.worker_count, self.worker_rank) {
            return;
        }
        self.inflight = None;
        self.worker_count = worker_count;
        self.worker_rank = worker_rank;
    }

    /// Whether the active window has no unconsumed sequences left.
    pub fn exhausted(&self) -> bool {
        self.consumed >= self.active.sequences.len()
    }

    /// If the active window is exhausted, block until the in-flight staging
    /// task completes, commit its window, and re-arm the next one.
    ///
    /// Returns `true` when a new window was committed.
    ///
    /// # Errors
    ///
    /// A deserializer failure captured by the staging task is re-raised
    /// here, attributed to the chunk that failed.
    pub fn advance_if_exhausted(&mut self) -> Result<bool> {
        if !self.exhausted() {
            return Ok(false);
        }

        let handle = match self.inflight.take() {
            Some(handle) => handle,
            None => prefetch::spawn_stage(self.stage_request()),
        };
        let staged = handle
            .join()
            .map_err(|_| LoaderError::state("window staging task panicked"))??;

        tracing::debug!(
            start = staged.start.chunk_position,
            end = staged.end.chunk_position,
            sequences = staged.sequences.len(),
            chunks = staged.chunks.len(),
            "window committed"
        );

        self.window_start = staged.start;
        self.committed = staged.end;
        self.active = Window {
            sequences: staged.sequences,
            chunks: staged.chunks,
            descriptors: staged.descriptors,
        };
        self.consumed = match self.pending_skip.take() {
            Some(skip) => (skip as usize).min(self.active.sequences.len()),
            None => 0,
        };

        self.inflight = Some(prefetch::spawn_stage(self.stage_request()));
        Ok(true)
    }

    /// Next descriptor in committed order; blocks on the staging task when
    /// the active window is exhausted.
    pub fn next_descriptor(&mut self) -> Result<SequenceDescriptor> {
        while self.exhausted() {
            self.advance_if_exhausted()?;
        }
        let descriptor = self.active.sequences[self.consumed];
        self.consumed += 1;
        Ok(descriptor)
    }

    /// Payload of a chunk resident in the active window.
    pub fn chunk(&self, id: ChunkId) -> Option<ChunkRef> {
        self.active.chunks.get(&id).cloned()
    }

    pub fn active_window(&self) -> &Window {
        &self.active
    }

    /// Entries of the active window consumed so far.
    ///
    /// Between a restore and its first commit this is the restored
    /// in-window position: the entries the regenerated window will skip.
    pub fn consumed(&self) -> usize {
        match self.pending_skip {
            Some(skip) => skip as usize,
            None => self.consumed,
        }
    }

    /// Position where the active window's staging walk began.
    pub fn window_start(&self) -> StagePosition {
        self.window_start
    }

    /// Re-point the pipeline to a restored cursor position.
    ///
    /// Any in-flight staging task is discarded without being awaited: its
    /// output is stale once the cursor moves. The walk re-armed here
    /// regenerates the window that was active when the state was captured,
    /// and the first commit skips the `position_in_window` entries that had
    /// already been consumed.
    pub fn restore(&mut self, position: StagePosition, position_in_window: u64) {
        self.inflight = None;
        self.active = Window::default();
        self.consumed = 0;
        self.window_start = position;
        self.committed = position;
        self.pending_skip = Some(position_in_window);
        self.inflight = Some(prefetch::spawn_stage(self.stage_request()));
    }

    fn stage_request(&self) -> StageRequest {
        StageRequest {
            source: self.source.clone(),
            config: self.config.clone(),
            worker_count: self.worker_count,
            worker_rank: self.worker_rank,
            start: self.committed,
            resident: self.active.chunks.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RandomizationWindow, WindowStrategy};
    use crate::source::Chunk;

    struct TestChunk;

    impl Chunk for TestChunk {}

    struct MockSource {
        chunks: u32,
        sequences_per_chunk: u32,
    }

    impl ChunkSource for MockSource {
        fn chunk_count(&self) -> u32 {
            self.chunks
        }

        fn get_chunk(&self, _id: ChunkId) -> Result<ChunkRef> {
            Ok(Arc::new(TestChunk))
        }

        fn sequences_for_chunk(&self, id: ChunkId) -> Result<Vec<SequenceDescriptor>> {
            Ok((0..self.sequences_per_chunk)
                .map(|index| SequenceDescriptor {
                    chunk_id: id,
                    index_in_chunk: index,
                    sample_count: 1,
                })
                .collect())
        }
    }

    fn make_manager(window_chunks: usize) -> WindowManager {
        let source: Arc<dyn ChunkSource> = Arc::new(MockSource {
            chunks: 4,
            sequences_per_chunk: 3,
        });
        let config = LoaderConfig {
            strategy: WindowStrategy::ChunkBlockShuffle,
            randomization_window: RandomizationWindow::Chunks(window_chunks),
            seed_offset: 42,
            ..LoaderConfig::default()
        };
        WindowManager::new(source, config)
    }

    fn drain(wm: &mut WindowManager, count: usize) -> Vec<SequenceDescriptor> {
        (0..count).map(|_| wm.next_descriptor().unwrap()).collect()
    }

    #[test]
    fn test_advance_commits_and_rearms() {
        let mut wm = make_manager(2);
        assert!(wm.exhausted());

        assert!(wm.advance_if_exhausted().unwrap());
        assert!(!wm.exhausted());
        assert_eq!(wm.active_window().sequences.len(), 6);

        // Not exhausted yet, so no new commit.
        assert!(!wm.advance_if_exhausted().unwrap());
    }

    #[test]
    fn test_stream_continues_across_windows() {
        let mut wm = make_manager(2);

        // One sweep: two windows of two chunks, marker at the end.
        let stream = drain(&mut wm, 13);
        assert!(stream.last().unwrap().is_end_of_sweep());
        assert_eq!(stream.iter().filter(|s| s.is_end_of_sweep()).count(), 1);

        let mut pairs: Vec<_> = stream
            .iter()
            .filter(|s| !s.is_end_of_sweep())
            .map(|s| (s.chunk_id, s.index_in_chunk))
            .collect();
        pairs.sort_unstable();
        let expected: Vec<_> = (0..4u32)
            .flat_map(|chunk| (0..3u32).map(move |index| (chunk, index)))
            .collect();
        assert_eq!(pairs, expected);
    }

    #[test]
    fn test_chunks_follow_the_stream() {
        let mut wm = make_manager(2);
        for _ in 0..13 {
            let descriptor = wm.next_descriptor().unwrap();
            if !descriptor.is_end_of_sweep() {
                assert!(wm.chunk(descriptor.chunk_id).is_some());
            }
        }
    }

    #[test]
    fn test_restore_replays_the_same_stream() {
        let mut reference = make_manager(2);
        let full = drain(&mut reference, 13);

        let mut interrupted = make_manager(2);
        let head = drain(&mut interrupted, 5);
        let start = interrupted.window_start();
        let in_window = interrupted.consumed() as u64;

        // Restore into a fresh manager at the captured position.
        let mut restored = make_manager(2);
        restored.restore(start, in_window);
        let tail = drain(&mut restored, 8);

        let mut replay = head;
        replay.extend(tail);
        assert_eq!(replay, full);
    }

    #[test]
    fn test_restore_discards_inflight_task() {
        let mut wm = make_manager(2);
        let _ = drain(&mut wm, 6); // consume the first window fully

        // Restore to the very beginning; the armed walk for the second
        // window is stale and must not leak into the stream.
        wm.restore(StagePosition::default(), 0);
        let replay = drain(&mut wm, 6);

        let mut fresh = make_manager(2);
        let baseline = drain(&mut fresh, 6);
        assert_eq!(replay, baseline);
    }

    #[test]
    fn test_topology_change_discards_staged_assignment() {
        let mut wm = make_manager(2);
        let _ = wm.advance_if_exhausted().unwrap();

        wm.set_topology(2, 1);
        // Pop past the active window so the next commit happens under the
        // new topology: only every other sweep position is owned now.
        let _ = drain(&mut wm, 7);
        let window = wm.active_window();
        assert_eq!(window.descriptors.len(), 2);
        for descriptor in window.sequences.iter().filter(|s| !s.is_end_of_sweep()) {
            assert!(window.chunks.contains_key(&descriptor.chunk_id));
        }
    }
}
