//! Bounded frame buffer with drop-oldest overflow.
//!
//! The buffer favors recency over completeness: a push into a full buffer
//! evicts the oldest frame instead of blocking the producer. Readers wait on
//! a condition variable with a deadline, so `pop` never blocks forever.

use super::FrameRecord;
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

struct Slots {
    frames: VecDeque<FrameRecord>,
    dropped: u64,
}

/// Thread-safe FIFO holding the most recent frames.
pub struct FrameBuffer {
    slots: Mutex<Slots>,
    available: Condvar,
    capacity: usize,
}

impl FrameBuffer {
    /// Creates a buffer holding at most `capacity` frames (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: Mutex::new(Slots {
                frames: VecDeque::with_capacity(capacity),
                dropped: 0,
            }),
            available: Condvar::new(),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inserts a frame, evicting the oldest one when full.
    ///
    /// Returns `true` if a frame was dropped to make room.
    pub fn push(&self, frame: FrameRecord) -> bool {
        let mut slots = self.lock();

        let evicted = if slots.frames.len() >= self.capacity {
            slots.frames.pop_front();
            slots.dropped += 1;
            true
        } else {
            false
        };
        slots.frames.push_back(frame);
        drop(slots);

        self.available.notify_one();

        if evicted {
            tracing::trace!(capacity = self.capacity, "Buffer full, dropped oldest frame");
        }
        evicted
    }

    /// Removes the oldest frame, waiting up to `timeout` for one to arrive.
    pub fn pop(&self, timeout: Duration) -> Option<FrameRecord> {
        let deadline = Instant::now() + timeout;
        let mut slots = self.lock();

        loop {
            if let Some(frame) = slots.frames.pop_front() {
                return Some(frame);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }

            slots = self
                .available
                .wait_timeout(slots, remaining)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
    }

    /// Removes every buffered frame and returns how many were discarded.
    pub fn clear(&self) -> usize {
        let mut slots = self.lock();
        let count = slots.frames.len();
        slots.frames.clear();
        count
    }

    /// Number of frames currently buffered.
    pub fn len(&self) -> usize {
        self.lock().frames.len()
    }

    /// Returns true if no frames are buffered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of frames held.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total frames evicted because the buffer was full.
    pub fn dropped(&self) -> u64 {
        self.lock().dropped
    }
}

impl std::fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slots = self.lock();
        f.debug_struct("FrameBuffer")
            .field("capacity", &self.capacity)
            .field("len", &slots.frames.len())
            .field("dropped", &slots.dropped)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::RawFrame;
    use proptest::prelude::*;
    use std::sync::Arc;

    fn frame(sequence: u64) -> FrameRecord {
        FrameRecord::new(RawFrame::new(vec![sequence as u8; 4], 2, 2), sequence)
    }

    fn drain(buffer: &FrameBuffer) -> Vec<u64> {
        std::iter::from_fn(|| buffer.pop(Duration::ZERO))
            .map(|f| f.sequence())
            .collect()
    }

    #[test]
    fn test_overflow_keeps_newest() {
        let buffer = FrameBuffer::new(2);

        assert!(!buffer.push(frame(1))); // A
        assert!(!buffer.push(frame(2))); // B
        assert!(buffer.push(frame(3))); // C evicts A

        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.dropped(), 1);
        assert_eq!(drain(&buffer), vec![2, 3]);
    }

    #[test]
    fn test_pop_is_fifo_and_consuming() {
        let buffer = FrameBuffer::new(4);
        for seq in 1..=3 {
            buffer.push(frame(seq));
        }

        assert_eq!(buffer.pop(Duration::ZERO).map(|f| f.sequence()), Some(1));
        assert_eq!(buffer.pop(Duration::ZERO).map(|f| f.sequence()), Some(2));
        assert_eq!(buffer.pop(Duration::ZERO).map(|f| f.sequence()), Some(3));
        assert!(buffer.pop(Duration::ZERO).is_none());
    }

    #[test]
    fn test_pop_times_out_on_empty() {
        let buffer = FrameBuffer::new(2);
        let start = Instant::now();

        assert!(buffer.pop(Duration::from_secs(1)).is_none());

        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(950), "returned after {waited:?}");
        assert!(waited < Duration::from_secs(3), "returned after {waited:?}");
    }

    #[test]
    fn test_pop_wakes_on_push() {
        let buffer = Arc::new(FrameBuffer::new(2));
        let producer = Arc::clone(&buffer);

        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            producer.push(frame(42));
        });

        let start = Instant::now();
        let popped = buffer.pop(Duration::from_secs(5));
        handle.join().unwrap();

        assert_eq!(popped.map(|f| f.sequence()), Some(42));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_clear_reports_count() {
        let buffer = FrameBuffer::new(3);
        buffer.push(frame(1));
        buffer.push(frame(2));

        assert_eq!(buffer.clear(), 2);
        assert!(buffer.is_empty());
        assert_eq!(buffer.clear(), 0);
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let buffer = FrameBuffer::new(0);
        assert_eq!(buffer.capacity(), 1);
    }

    proptest! {
        #[test]
        fn prop_length_bounded_and_newest_retained(
            capacity in 1usize..8,
            pushes in 0u64..40,
        ) {
            let buffer = FrameBuffer::new(capacity);
            for seq in 0..pushes {
                buffer.push(frame(seq));
                prop_assert!(buffer.len() <= capacity);
            }

            let expected_dropped = pushes.saturating_sub(capacity as u64);
            prop_assert_eq!(buffer.dropped(), expected_dropped);

            let expected: Vec<u64> = (expected_dropped..pushes).collect();
            prop_assert_eq!(drain(&buffer), expected);
        }
    }
}
