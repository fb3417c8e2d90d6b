//! Bounded per-camera frame cache with a playback cursor

use bytes::Bytes;
use std::collections::{BTreeMap, VecDeque};
use std::ops::Bound;
use tracing::trace;

/// Default number of frames retained per camera
pub const DEFAULT_FRAME_CAPACITY: usize = 64;

/// Recent compressed frames keyed by image id.
///
/// Eviction is oldest-inserted first, but the frame under the playback
/// cursor is never evicted.
#[derive(Debug, Clone)]
pub struct FrameRingBuffer {
    capacity: usize,
    frames: BTreeMap<u64, Bytes>,
    order: VecDeque<u64>,
    cursor: Option<u64>,
}

impl FrameRingBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            frames: BTreeMap::new(),
            order: VecDeque::with_capacity(capacity + 1),
            cursor: None,
        }
    }

    pub fn insert(&mut self, id: u64, frame: Bytes) {
        if self.frames.insert(id, frame).is_some() {
            // Replaced in place, insertion order unchanged
            return;
        }
        self.order.push_back(id);

        while self.frames.len() > self.capacity {
            let Some(pos) = self.order.iter().position(|&old| Some(old) != self.cursor) else {
                break;
            };
            if let Some(evicted) = self.order.remove(pos) {
                self.frames.remove(&evicted);
                trace!(img_id = evicted, "Evicted frame");
            }
        }
    }

    /// Move the cursor to the next higher id present. Returns the new cursor
    /// id, or `None` when there is no newer frame.
    pub fn advance(&mut self) -> Option<u64> {
        let next = match self.cursor {
            Some(current) => self
                .frames
                .range((Bound::Excluded(current), Bound::Unbounded))
                .next()
                .map(|(id, _)| *id),
            None => self.frames.keys().next().copied(),
        }?;

        self.cursor = Some(next);
        Some(next)
    }

    /// Frame for exactly this id, if still retained
    pub fn get(&self, id: u64) -> Option<Bytes> {
        self.frames.get(&id).cloned()
    }

    pub fn cursor(&self) -> Option<u64> {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for FrameRingBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_FRAME_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(n: u8) -> Bytes {
        Bytes::from(vec![n; 4])
    }

    #[test]
    fn test_evicts_oldest() {
        let mut buffer = FrameRingBuffer::new(3);
        for id in 1..=4 {
            buffer.insert(id, frame(id as u8));
        }

        assert_eq!(buffer.len(), 3);
        assert!(buffer.get(1).is_none());
        assert_eq!(buffer.get(4), Some(frame(4)));
    }

    #[test]
    fn test_cursor_slot_survives_eviction() {
        let mut buffer = FrameRingBuffer::new(3);
        buffer.insert(1, frame(1));
        assert_eq!(buffer.advance(), Some(1));

        for id in 2..=6 {
            buffer.insert(id, frame(id as u8));
        }

        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.get(1), Some(frame(1)));
        assert!(buffer.get(2).is_none());
        assert_eq!(buffer.get(6), Some(frame(6)));

        // Cursor jumps over evicted ids
        assert_eq!(buffer.advance(), Some(5));
    }

    #[test]
    fn test_get_is_exact() {
        let mut buffer = FrameRingBuffer::new(4);
        buffer.insert(10, frame(1));
        buffer.insert(20, frame(2));

        assert!(buffer.get(15).is_none());
        assert_eq!(buffer.get(20), Some(frame(2)));
    }

    #[test]
    fn test_advance_stops_at_newest() {
        let mut buffer = FrameRingBuffer::new(4);
        assert_eq!(buffer.advance(), None);

        buffer.insert(7, frame(7));
        buffer.insert(3, frame(3));
        assert_eq!(buffer.advance(), Some(3));
        assert_eq!(buffer.advance(), Some(7));
        assert_eq!(buffer.advance(), None);
        assert_eq!(buffer.cursor(), Some(7));
    }
}
