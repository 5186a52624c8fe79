//! Live 10-band stereo equalizer
//!
//! [`SharedEqualizer`] holds the 20 gain cells written by the controller;
//! [`EqualizerStage`] reads them and runs a bank of peaking biquads.

use std::f32::consts::PI;
use std::sync::atomic::{AtomicI8, AtomicU64, Ordering};
use std::sync::Arc;

use crate::audio::buffer::AudioFrame;
use crate::audio::sink::EqualizerSink;
use crate::constants::{EQ_BANDS, EQ_BAND_FREQUENCIES, EQ_CELLS, EQ_GAIN_MAX_DB, EQ_GAIN_MIN_DB};
use crate::error::StageError;
use crate::pipeline::stage::Processor;

/// Bandwidth of each peaking filter
const BAND_Q: f32 = 1.41;

struct Cells {
    gains: [AtomicI8; EQ_CELLS],
    generation: AtomicU64,
}

/// Gain cells shared between the controller and the running equalizer stage
#[derive(Clone)]
pub struct SharedEqualizer {
    cells: Arc<Cells>,
}

impl SharedEqualizer {
    pub fn new() -> Self {
        Self {
            cells: Arc::new(Cells {
                gains: std::array::from_fn(|_| AtomicI8::new(0)),
                generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn gains(&self) -> [i8; EQ_CELLS] {
        std::array::from_fn(|i| self.cells.gains[i].load(Ordering::Relaxed))
    }

    /// Changes whenever any cell is written
    pub fn generation(&self) -> u64 {
        self.cells.generation.load(Ordering::Acquire)
    }
}

impl Default for SharedEqualizer {
    fn default() -> Self {
        Self::new()
    }
}

impl EqualizerSink for SharedEqualizer {
    fn set_gain(&self, cell: usize, gain_db: i8) {
        if let Some(slot) = self.cells.gains.get(cell) {
            slot.store(gain_db.clamp(EQ_GAIN_MIN_DB, EQ_GAIN_MAX_DB), Ordering::Relaxed);
            self.cells.generation.fetch_add(1, Ordering::Release);
        }
    }

    /// Store every cell, then publish them as one generation
    fn set_gains(&self, gains_db: &[i8; EQ_CELLS]) {
        for (slot, gain) in self.cells.gains.iter().zip(gains_db) {
            slot.store((*gain).clamp(EQ_GAIN_MIN_DB, EQ_GAIN_MAX_DB), Ordering::Relaxed);
        }
        self.cells.generation.fetch_add(1, Ordering::Release);
    }
}

/// RBJ peaking filter, transposed direct form II
#[derive(Debug, Clone, Copy, Default)]
struct Biquad {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
    z1: f32,
    z2: f32,
}

impl Biquad {
    fn peaking(sample_rate: u32, freq: f32, gain_db: f32) -> Option<Self> {
        let fs = sample_rate as f32;
        if gain_db == 0.0 || freq >= fs / 2.0 {
            return None;
        }
        let a = 10f32.powf(gain_db / 40.0);
        let w0 = 2.0 * PI * freq / fs;
        let alpha = w0.sin() / (2.0 * BAND_Q);
        let cos = w0.cos();
        let a0 = 1.0 + alpha / a;
        Some(Self {
            b0: (1.0 + alpha * a) / a0,
            b1: (-2.0 * cos) / a0,
            b2: (1.0 - alpha * a) / a0,
            a1: (-2.0 * cos) / a0,
            a2: (1.0 - alpha / a) / a0,
            z1: 0.0,
            z2: 0.0,
        })
    }

    #[inline]
    fn run(&mut self, x: f32) -> f32 {
        let y = self.b0 * x + self.z1;
        self.z1 = self.b1 * x - self.a1 * y + self.z2;
        self.z2 = self.b2 * x - self.a2 * y;
        y
    }
}

/// Equalizer stage applying the shared gain cells
pub struct EqualizerStage {
    shared: SharedEqualizer,
    generation: Option<u64>,
    sample_rate: u32,
    /// Active filters per channel (left cells 0..10, right cells 10..20)
    filters: [Vec<Biquad>; 2],
}

impl EqualizerStage {
    pub fn new(shared: SharedEqualizer) -> Self {
        Self {
            shared,
            generation: None,
            sample_rate: 0,
            filters: [Vec::new(), Vec::new()],
        }
    }

    fn rebuild(&mut self, sample_rate: u32) {
        let gains = self.shared.gains();
        for (channel, filters) in self.filters.iter_mut().enumerate() {
            *filters = (0..EQ_BANDS)
                .filter_map(|band| {
                    let gain = gains[channel * EQ_BANDS + band];
                    Biquad::peaking(sample_rate, EQ_BAND_FREQUENCIES[band], gain as f32)
                })
                .collect();
        }
        self.sample_rate = sample_rate;
        tracing::debug!("Equalizer filters rebuilt: {:?}", gains);
    }
}

impl Processor for EqualizerStage {
    type Input = AudioFrame;
    type Output = AudioFrame;

    fn process(&mut self, mut frame: AudioFrame) -> Result<Option<AudioFrame>, StageError> {
        if frame.channels == 0 {
            return Err(StageError::Decode("frame without channels".into()));
        }
        let generation = self.shared.generation();
        if self.generation != Some(generation) || self.sample_rate != frame.sample_rate {
            self.generation = Some(generation);
            self.rebuild(frame.sample_rate);
        }
        if self.filters.iter().all(Vec::is_empty) {
            return Ok(Some(frame));
        }

        let channels = frame.channels as usize;
        for chunk in frame.samples.chunks_exact_mut(channels) {
            for (c, sample) in chunk.iter_mut().enumerate().take(2) {
                let mut value = *sample;
                for filter in self.filters[c].iter_mut() {
                    value = filter.run(value);
                }
                *sample = value;
            }
        }
        Ok(Some(frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, rate: u32, len: usize) -> Vec<f32> {
        (0..len)
            .flat_map(|i| {
                let s = (2.0 * PI * freq * i as f32 / rate as f32).sin() * 0.25;
                [s, s]
            })
            .collect()
    }

    fn rms(samples: impl Iterator<Item = f32>) -> f32 {
        let (sum, n) = samples.fold((0.0, 0usize), |(s, n), x| (s + x * x, n + 1));
        (sum / n as f32).sqrt()
    }

    #[test]
    fn test_flat_is_passthrough() {
        let mut stage = EqualizerStage::new(SharedEqualizer::new());
        let frame = AudioFrame::new(sine(1_000.0, 48_000, 480), 2, 48_000, 0, 0);
        let out = stage.process(frame.clone()).unwrap().unwrap();
        assert_eq!(out.samples, frame.samples);
    }

    #[test]
    fn test_cell_gain_affects_only_its_channel() {
        let shared = SharedEqualizer::new();
        let mut stage = EqualizerStage::new(shared.clone());
        // +12 dB at 1 kHz on the left channel only
        shared.set_gain(5, 12);

        let frame = AudioFrame::new(sine(1_000.0, 48_000, 9_600), 2, 48_000, 0, 0);
        let out = stage.process(frame).unwrap().unwrap();

        // Skip the filter's settling time
        let tail = &out.samples[4_800..];
        let left = rms(tail.iter().step_by(2).copied());
        let right = rms(tail.iter().skip(1).step_by(2).copied());
        assert!(left > right * 3.0, "left {} right {}", left, right);
    }

    #[test]
    fn test_shared_cells_clamp_and_bump_generation() {
        let shared = SharedEqualizer::new();
        let before = shared.generation();
        shared.set_gain(0, 40);
        shared.set_gain(19, -40);
        shared.set_gain(20, 1);
        assert_eq!(shared.gains()[0], 13);
        assert_eq!(shared.gains()[19], -13);
        assert_eq!(shared.generation(), before + 2);
    }

    #[test]
    fn test_bulk_write_is_one_generation() {
        let shared = SharedEqualizer::new();
        let before = shared.generation();
        let mut gains = [6i8; EQ_CELLS];
        gains[10..].fill(-20);
        shared.set_gains(&gains);

        assert_eq!(shared.generation(), before + 1);
        let applied = shared.gains();
        assert!(applied[..10].iter().all(|&g| g == 6));
        assert!(applied[10..].iter().all(|&g| g == -13));
    }
}
