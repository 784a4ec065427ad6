use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

use crate::common::types::FrameId;

/// LRU-K page replacement policy over buffer pool frame ids.
///
/// Tracks up to K access timestamps per frame. The eviction victim is the
/// evictable frame with the largest backward K-distance: the gap between
/// the current timestamp and the K-th most recent access, or infinity for
/// frames with fewer than K recorded accesses. Ties break on the oldest
/// recorded timestamp.
pub struct LruKReplacer {
    inner: Mutex<ReplacerState>,
}

struct ReplacerState {
    k: usize,
    num_frames: usize,
    current_timestamp: u64,
    evictable_count: usize,
    frames: HashMap<FrameId, FrameNode>,
}

#[derive(Default)]
struct FrameNode {
    history: VecDeque<u64>,
    evictable: bool,
}

impl LruKReplacer {
    pub fn new(num_frames: usize, k: usize) -> Self {
        Self {
            inner: Mutex::new(ReplacerState {
                k,
                num_frames,
                current_timestamp: 0,
                evictable_count: 0,
                frames: HashMap::with_capacity(num_frames),
            }),
        }
    }

    /// Record an access to the frame at the next timestamp, trimming the
    /// history to the K most recent accesses.
    pub fn record_access(&self, frame_id: FrameId) {
        let mut state = self.inner.lock();
        debug_assert!(frame_id < state.num_frames);
        state.current_timestamp += 1;
        let timestamp = state.current_timestamp;
        let k = state.k;
        let node = state.frames.entry(frame_id).or_default();
        node.history.push_back(timestamp);
        if node.history.len() > k {
            node.history.pop_front();
        }
    }

    /// Flip the evictable flag, maintaining the evictable count. No-op for
    /// frames with no recorded history.
    pub fn set_evictable(&self, frame_id: FrameId, evictable: bool) {
        let mut guard = self.inner.lock();
        let state = &mut *guard;
        debug_assert!(frame_id < state.num_frames);
        let Some(node) = state.frames.get_mut(&frame_id) else {
            return;
        };
        if node.history.is_empty() {
            return;
        }
        if evictable && !node.evictable {
            node.evictable = true;
            state.evictable_count += 1;
        } else if !evictable && node.evictable {
            node.evictable = false;
            state.evictable_count -= 1;
        }
    }

    /// Drop the frame's record entirely. No-op for frames with no history
    /// or frames currently pinned (non-evictable).
    pub fn remove(&self, frame_id: FrameId) {
        let mut guard = self.inner.lock();
        let state = &mut *guard;
        let Some(node) = state.frames.get_mut(&frame_id) else {
            return;
        };
        if node.history.is_empty() || !node.evictable {
            return;
        }
        node.history.clear();
        node.evictable = false;
        state.evictable_count -= 1;
    }

    /// Evict the frame with the largest backward K-distance among the
    /// evictable frames, clearing its history.
    pub fn evict(&self) -> Option<FrameId> {
        let mut guard = self.inner.lock();
        let state = &mut *guard;
        if state.evictable_count == 0 {
            return None;
        }
        let now = state.current_timestamp;
        let k = state.k;

        // (frame, k-distance, oldest timestamp); None distance = infinity
        let mut victim: Option<(FrameId, Option<u64>, u64)> = None;
        for (&frame_id, node) in state.frames.iter() {
            if !node.evictable || node.history.is_empty() {
                continue;
            }
            let oldest = node.history[0];
            let distance = if node.history.len() < k {
                None
            } else {
                Some(now - oldest)
            };
            let better = match &victim {
                None => true,
                Some((_, best_distance, best_oldest)) => match (distance, best_distance) {
                    (None, Some(_)) => true,
                    (Some(_), None) => false,
                    (None, None) => oldest < *best_oldest,
                    (Some(d), Some(b)) => d > *b || (d == *b && oldest < *best_oldest),
                },
            };
            if better {
                victim = Some((frame_id, distance, oldest));
            }
        }

        let (frame_id, _, _) = victim?;
        log::trace!("evicting frame {frame_id}");
        if let Some(node) = state.frames.get_mut(&frame_id) {
            node.history.clear();
            node.evictable = false;
        }
        state.evictable_count -= 1;
        Some(frame_id)
    }

    /// Number of evictable frames
    pub fn size(&self) -> usize {
        self.inner.lock().evictable_count
    }
}
