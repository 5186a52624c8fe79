//! Decoder and resampler stages

use bytes::Bytes;
use rubato::{FastFixedIn, PolynomialDegree, Resampler};

use crate::audio::buffer::AudioFrame;
use crate::error::StageError;
use crate::pipeline::stage::Processor;

/// Raw interleaved s16le PCM to float frames
///
/// Compressed formats are not decoded; the input must already be PCM.
pub struct PcmDecoder {
    channels: u16,
    sample_rate: u32,
    leftover: Vec<u8>,
    sequence: u32,
    frames_decoded: u64,
}

impl PcmDecoder {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            channels: channels.max(1),
            sample_rate,
            leftover: Vec::new(),
            sequence: 0,
            frames_decoded: 0,
        }
    }
}

impl Processor for PcmDecoder {
    type Input = Bytes;
    type Output = AudioFrame;

    fn process(&mut self, input: Bytes) -> Result<Option<AudioFrame>, StageError> {
        if self.sample_rate == 0 {
            return Err(StageError::Decode("sample rate is zero".into()));
        }
        self.leftover.extend_from_slice(&input);
        let frame_bytes = 2 * self.channels as usize;
        let usable = self.leftover.len() - self.leftover.len() % frame_bytes;
        if usable == 0 {
            return Ok(None);
        }

        let samples: Vec<f32> = self.leftover[..usable]
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0)
            .collect();
        self.leftover.drain(..usable);

        let timestamp = self.frames_decoded * 1_000_000 / self.sample_rate as u64;
        self.frames_decoded += (samples.len() / self.channels as usize) as u64;
        let frame = AudioFrame::new(samples, self.channels, self.sample_rate, timestamp, self.sequence);
        self.sequence = self.sequence.wrapping_add(1);
        Ok(Some(frame))
    }
}

/// Input frames per conversion chunk; about 21 ms at 48 kHz
pub const RESAMPLE_CHUNK_FRAMES: usize = 1024;

/// Streaming sample rate converter backed by rubato
///
/// rubato converts fixed-size planar chunks, so incoming frames are
/// de-interleaved into a per-channel backlog and converted whenever a full
/// chunk is available. The converter lives across frames and is rebuilt only
/// when the input format changes.
pub struct StreamResampler {
    target_rate: u32,
    chunk_frames: usize,
    converter: Option<Converter>,
    sequence: u32,
    frames_out: u64,
}

struct Converter {
    source_rate: u32,
    resampler: FastFixedIn<f32>,
    backlog: Vec<Vec<f32>>,
}

impl Converter {
    fn new(source_rate: u32, target_rate: u32, channels: usize, chunk_frames: usize) -> Result<Self, StageError> {
        let resampler = FastFixedIn::<f32>::new(
            target_rate as f64 / source_rate as f64,
            1.0,
            PolynomialDegree::Septic,
            chunk_frames,
            channels,
        )
        .map_err(|e| StageError::Decode(format!("failed to create resampler: {}", e)))?;
        Ok(Self {
            source_rate,
            resampler,
            backlog: vec![Vec::with_capacity(chunk_frames * 2); channels],
        })
    }

    fn matches(&self, source_rate: u32, channels: usize) -> bool {
        self.source_rate == source_rate && self.backlog.len() == channels
    }

    /// Convert every complete chunk in the backlog into interleaved output
    fn drain(&mut self) -> Result<Vec<f32>, StageError> {
        let mut out = Vec::new();
        loop {
            let needed = self.resampler.input_frames_next();
            if self.backlog.first().map_or(0, Vec::len) < needed {
                break;
            }
            let chunk: Vec<Vec<f32>> = self
                .backlog
                .iter_mut()
                .map(|channel| channel.drain(..needed).collect())
                .collect();
            let planar = self
                .resampler
                .process(&chunk, None)
                .map_err(|e| StageError::Decode(format!("resampling failed: {}", e)))?;
            interleave_into(&planar, &mut out);
        }
        Ok(out)
    }
}

fn deinterleave_into(samples: &[f32], backlog: &mut [Vec<f32>]) {
    let channels = backlog.len();
    for frame in samples.chunks_exact(channels) {
        for (channel, sample) in backlog.iter_mut().zip(frame) {
            channel.push(*sample);
        }
    }
}

fn interleave_into(planar: &[Vec<f32>], out: &mut Vec<f32>) {
    let frames = planar.first().map_or(0, Vec::len);
    out.reserve(frames * planar.len());
    for i in 0..frames {
        for channel in planar {
            out.push(channel[i]);
        }
    }
}

impl StreamResampler {
    pub fn new(target_rate: u32) -> Self {
        Self::with_chunk_frames(target_rate, RESAMPLE_CHUNK_FRAMES)
    }

    pub fn with_chunk_frames(target_rate: u32, chunk_frames: usize) -> Self {
        Self {
            target_rate,
            chunk_frames: chunk_frames.max(1),
            converter: None,
            sequence: 0,
            frames_out: 0,
        }
    }

    fn emit(&mut self, samples: Vec<f32>, channels: u16) -> AudioFrame {
        let timestamp = self.frames_out * 1_000_000 / self.target_rate.max(1) as u64;
        self.frames_out += (samples.len() / channels.max(1) as usize) as u64;
        let frame = AudioFrame::new(samples, channels, self.target_rate, timestamp, self.sequence);
        self.sequence = self.sequence.wrapping_add(1);
        frame
    }
}

impl Processor for StreamResampler {
    type Input = AudioFrame;
    type Output = AudioFrame;

    fn process(&mut self, frame: AudioFrame) -> Result<Option<AudioFrame>, StageError> {
        if frame.channels == 0 || frame.sample_rate == 0 || self.target_rate == 0 {
            return Err(StageError::Decode("invalid frame format".into()));
        }
        if frame.sample_rate == self.target_rate {
            if self.converter.take().is_some() {
                tracing::debug!("Input at {} Hz, resampler bypassed", self.target_rate);
            }
            let channels = frame.channels;
            return Ok(Some(self.emit(frame.samples, channels)));
        }

        let channels = frame.channels as usize;
        let reusable = self
            .converter
            .as_ref()
            .is_some_and(|c| c.matches(frame.sample_rate, channels));
        if !reusable {
            tracing::debug!(
                "Resampling {} Hz -> {} Hz ({} channels)",
                frame.sample_rate,
                self.target_rate,
                channels
            );
            self.converter = Some(Converter::new(
                frame.sample_rate,
                self.target_rate,
                channels,
                self.chunk_frames,
            )?);
        }
        let Some(converter) = self.converter.as_mut() else {
            return Ok(None);
        };

        deinterleave_into(&frame.samples, &mut converter.backlog);
        let out = converter.drain()?;
        if out.is_empty() {
            return Ok(None);
        }
        Ok(Some(self.emit(out, frame.channels)))
    }
}
