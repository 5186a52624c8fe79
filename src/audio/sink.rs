//! Output sink adapters
//!
//! The engine consumes the output device only through [`OutputSink`]
//! (volume, mute, PCM frames) and the live equalizer through
//! [`EqualizerSink`].

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crate::audio::buffer::{AudioFrame, RingBuffer};
use crate::constants::EQ_CELLS;
use crate::error::StageError;

/// Hardware output: volume/mute control plus a PCM frame writer
pub trait OutputSink: Send + Sync {
    /// Set hardware volume, 0..=100
    fn set_volume(&self, volume: u8);

    fn set_muted(&self, muted: bool);

    /// Write one frame; may block to pace real-time output
    fn write(&self, frame: &AudioFrame) -> Result<(), StageError>;

    /// Sample rate frames must be delivered at
    fn sample_rate(&self) -> u32;
}

/// Live equalizer gain cells (10 bands x 2 channels, left cells first)
pub trait EqualizerSink: Send + Sync {
    fn set_gain(&self, cell: usize, gain_db: i8);

    fn set_gains(&self, gains_db: &[i8; EQ_CELLS]) {
        for (cell, gain) in gains_db.iter().enumerate() {
            self.set_gain(cell, *gain);
        }
    }
}

/// Sink that discards audio while pacing writes to real time
pub struct NullSink {
    sample_rate: u32,
    next_deadline: Mutex<Option<Instant>>,
}

impl NullSink {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            next_deadline: Mutex::new(None),
        }
    }
}

impl OutputSink for NullSink {
    fn set_volume(&self, volume: u8) {
        tracing::debug!("Null sink volume: {}", volume);
    }

    fn set_muted(&self, muted: bool) {
        tracing::debug!("Null sink mute: {}", muted);
    }

    fn write(&self, frame: &AudioFrame) -> Result<(), StageError> {
        let duration = Duration::from_micros(frame.duration_us());
        let now = Instant::now();
        let wait = {
            let mut deadline = self.next_deadline.lock();
            // Fell behind (or first frame): restart the clock
            let start = match *deadline {
                Some(d) if d > now => d,
                _ => now,
            };
            *deadline = Some(start + duration);
            start.saturating_duration_since(now)
        };
        if !wait.is_zero() {
            std::thread::sleep(wait);
        }
        Ok(())
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// Sink that records every control write, for tests and headless runs
pub struct RecordingSink {
    sample_rate: u32,
    volume_writes: Mutex<Vec<u8>>,
    mute_writes: Mutex<Vec<bool>>,
    gains: Mutex<[i8; EQ_CELLS]>,
    gain_writes: AtomicUsize,
    frames_written: AtomicUsize,
    recent: RingBuffer,
    fail_writes: AtomicBool,
}

impl RecordingSink {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            volume_writes: Mutex::new(Vec::new()),
            mute_writes: Mutex::new(Vec::new()),
            gains: Mutex::new([0; EQ_CELLS]),
            gain_writes: AtomicUsize::new(0),
            frames_written: AtomicUsize::new(0),
            recent: RingBuffer::new(16),
            fail_writes: AtomicBool::new(false),
        }
    }

    pub fn volume_writes(&self) -> Vec<u8> {
        self.volume_writes.lock().clone()
    }

    pub fn mute_writes(&self) -> Vec<bool> {
        self.mute_writes.lock().clone()
    }

    pub fn last_muted(&self) -> Option<bool> {
        self.mute_writes.lock().last().copied()
    }

    pub fn gains(&self) -> [i8; EQ_CELLS] {
        *self.gains.lock()
    }

    /// Number of individual gain cell writes
    pub fn gain_writes(&self) -> usize {
        self.gain_writes.load(Ordering::Relaxed)
    }

    pub fn frames_written(&self) -> usize {
        self.frames_written.load(Ordering::Relaxed)
    }

    /// Most recent frames written (up to 16)
    pub fn recent_frames(&self) -> Vec<AudioFrame> {
        let mut frames = Vec::with_capacity(self.recent.len());
        while let Some(frame) = self.recent.try_pop() {
            frames.push(frame);
        }
        frames
    }

    /// Make subsequent writes fail with an output error
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl OutputSink for RecordingSink {
    fn set_volume(&self, volume: u8) {
        self.volume_writes.lock().push(volume);
    }

    fn set_muted(&self, muted: bool) {
        self.mute_writes.lock().push(muted);
    }

    fn write(&self, frame: &AudioFrame) -> Result<(), StageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StageError::Output("device write failed".into()));
        }
        self.frames_written.fetch_add(1, Ordering::Relaxed);
        self.recent.force_push(frame.clone());
        Ok(())
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl EqualizerSink for RecordingSink {
    fn set_gain(&self, cell: usize, gain_db: i8) {
        if let Some(slot) = self.gains.lock().get_mut(cell) {
            *slot = gain_db;
            self.gain_writes.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_sink_tracks_writes() {
        let sink = RecordingSink::new(44_100);
        sink.set_volume(10);
        sink.set_volume(20);
        sink.set_muted(true);
        assert_eq!(sink.volume_writes(), vec![10, 20]);
        assert_eq!(sink.last_muted(), Some(true));

        let frame = AudioFrame::new(vec![0.1; 4], 2, 44_100, 0, 7);
        sink.write(&frame).unwrap();
        assert_eq!(sink.frames_written(), 1);
        assert_eq!(sink.recent_frames()[0].sequence, 7);

        sink.fail_writes(true);
        assert!(sink.write(&frame).is_err());
    }

    #[test]
    fn test_equalizer_sink_set_gains() {
        let sink = RecordingSink::new(44_100);
        let mut gains = [0i8; EQ_CELLS];
        gains[3] = 5;
        gains[13] = -4;
        sink.set_gains(&gains);
        assert_eq!(sink.gains(), gains);
        assert_eq!(sink.gain_writes(), EQ_CELLS);
        sink.set_gain(99, 1);
        assert_eq!(sink.gain_writes(), EQ_CELLS);
    }

    #[test]
    fn test_null_sink_paces_output() {
        let sink = NullSink::new(1_000);
        // 10 samples per channel at 1 kHz = 10 ms each
        let frame = AudioFrame::new(vec![0.0; 20], 2, 1_000, 0, 0);
        let start = Instant::now();
        for _ in 0..4 {
            sink.write(&frame).unwrap();
        }
        assert!(start.elapsed() >= Duration::from_millis(25));
    }
}
