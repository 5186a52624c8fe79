//! Audio frames and a lock-free ring buffer
//!
//! The ring buffer is a single-producer single-consumer queue used where a
//! real-time consumer (a device callback) must never block.

use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Audio frame containing interleaved samples
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    /// Interleaved audio samples (f32)
    pub samples: Vec<f32>,
    /// Number of channels
    pub channels: u16,
    /// Sample rate the samples are expressed at
    pub sample_rate: u32,
    /// Position of the first sample in microseconds since chain start
    pub timestamp: u64,
    /// Frame sequence number
    pub sequence: u32,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>, channels: u16, sample_rate: u32, timestamp: u64, sequence: u32) -> Self {
        Self {
            samples,
            channels,
            sample_rate,
            timestamp,
            sequence,
        }
    }

    /// Get number of samples per channel
    pub fn samples_per_channel(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    /// Get frame duration in microseconds
    pub fn duration_us(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        (self.samples_per_channel() as u64 * 1_000_000) / self.sample_rate as u64
    }
}

/// Lock-free ring buffer for audio frames
pub struct RingBuffer {
    queue: ArrayQueue<AudioFrame>,
    overflow_count: AtomicUsize,
    underrun_count: AtomicUsize,
}

impl RingBuffer {
    /// Create a new ring buffer with the specified capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
            overflow_count: AtomicUsize::new(0),
            underrun_count: AtomicUsize::new(0),
        }
    }

    /// Push a frame into the buffer
    /// Returns false if buffer is full (overflow)
    pub fn push(&self, frame: AudioFrame) -> bool {
        match self.queue.push(frame) {
            Ok(()) => true,
            Err(_) => {
                self.overflow_count.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Push a frame, evicting the oldest one when full
    pub fn force_push(&self, frame: AudioFrame) {
        if self.queue.force_push(frame).is_some() {
            self.overflow_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Pop a frame from the buffer
    /// Returns None if buffer is empty (underrun)
    pub fn pop(&self) -> Option<AudioFrame> {
        match self.queue.pop() {
            Some(frame) => Some(frame),
            None => {
                self.underrun_count.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Try to pop without counting underrun
    pub fn try_pop(&self) -> Option<AudioFrame> {
        self.queue.pop()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.queue.is_full()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    pub fn overflow_count(&self) -> usize {
        self.overflow_count.load(Ordering::Relaxed)
    }

    pub fn underrun_count(&self) -> usize {
        self.underrun_count.load(Ordering::Relaxed)
    }

    /// Get fill level as a fraction of capacity
    pub fn fill_level(&self) -> f32 {
        self.len() as f32 / self.capacity() as f32
    }
}

/// Thread-safe handle to a ring buffer
pub type SharedRingBuffer = Arc<RingBuffer>;

/// Create a new shared ring buffer
pub fn create_shared_buffer(capacity: usize) -> SharedRingBuffer {
    Arc::new(RingBuffer::new(capacity))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(sequence: u32) -> AudioFrame {
        AudioFrame::new(vec![0.0; 480], 2, 48_000, 0, sequence)
    }

    #[test]
    fn test_ring_buffer_basic() {
        let buffer = RingBuffer::new(4);

        assert!(buffer.push(frame(0)));
        assert!(buffer.push(frame(1)));
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.fill_level(), 0.5);

        assert_eq!(buffer.pop().unwrap().sequence, 0);
        assert_eq!(buffer.pop().unwrap().sequence, 1);
        assert!(buffer.is_empty());
        assert!(buffer.pop().is_none());
        assert_eq!(buffer.underrun_count(), 1);
    }

    #[test]
    fn test_ring_buffer_overflow() {
        let buffer = RingBuffer::new(2);
        assert!(buffer.push(frame(0)));
        assert!(buffer.push(frame(1)));
        assert!(!buffer.push(frame(2)));
        assert_eq!(buffer.overflow_count(), 1);

        buffer.force_push(frame(3));
        assert_eq!(buffer.overflow_count(), 2);
        assert_eq!(buffer.try_pop().unwrap().sequence, 1);
        assert_eq!(buffer.try_pop().unwrap().sequence, 3);
    }

    #[test]
    fn test_frame_duration() {
        let f = AudioFrame::new(vec![0.0; 882], 2, 44_100, 0, 0);
        assert_eq!(f.samples_per_channel(), 441);
        assert_eq!(f.duration_us(), 10_000);
    }
}
