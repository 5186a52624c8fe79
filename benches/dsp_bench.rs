//! Stage processing throughput
//!
//! One iteration processes 100 ms of stereo audio; realtime needs well
//! under 100 ms per iteration.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use netradio_engine::audio::AudioFrame;
use netradio_engine::audio::EqualizerSink;
use netradio_engine::pipeline::dsp::{PcmDecoder, StreamResampler};
use netradio_engine::pipeline::equalizer::{EqualizerStage, SharedEqualizer};
use netradio_engine::pipeline::stage::Processor;

const CHANNELS: u16 = 2;

fn sine_frame(sample_rate: u32) -> AudioFrame {
    let frames = sample_rate as usize / 10;
    let samples = (0..frames * CHANNELS as usize)
        .map(|i| {
            let t = (i / CHANNELS as usize) as f32 / sample_rate as f32;
            (t * 440.0 * std::f32::consts::TAU).sin() * 0.5
        })
        .collect();
    AudioFrame::new(samples, CHANNELS, sample_rate, 0, 0)
}

fn bench_decode(c: &mut Criterion) {
    let pcm: Vec<u8> = sine_frame(44_100)
        .samples
        .iter()
        .flat_map(|s| ((s * i16::MAX as f32) as i16).to_le_bytes())
        .collect();
    let pcm = Bytes::from(pcm);

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(pcm.len() as u64));
    group.bench_function("s16le_44100", |b| {
        let mut decoder = PcmDecoder::new(44_100, CHANNELS);
        b.iter(|| black_box(decoder.process(pcm.clone())))
    });
    group.finish();
}

fn bench_resample(c: &mut Criterion) {
    let mut group = c.benchmark_group("resample");
    for (from, to) in [(44_100u32, 48_000u32), (48_000, 44_100), (22_050, 48_000)] {
        let frame = sine_frame(from);
        group.throughput(Throughput::Elements(frame.samples.len() as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}_to_{}", from, to)),
            &frame,
            |b, frame| {
                let mut resampler = StreamResampler::new(to);
                b.iter(|| black_box(resampler.process(frame.clone())))
            },
        );
    }
    group.finish();
}

fn bench_equalizer(c: &mut Criterion) {
    let shared = SharedEqualizer::new();
    for (cell, gain) in [(0, 6), (1, 4), (8, -3), (10, 6), (11, 4), (18, -3)] {
        shared.set_gain(cell, gain);
    }
    let frame = sine_frame(48_000);

    let mut group = c.benchmark_group("equalizer");
    group.throughput(Throughput::Elements(frame.samples.len() as u64));
    group.bench_function("ten_band_stereo", |b| {
        let mut stage = EqualizerStage::new(shared.clone());
        b.iter(|| black_box(stage.process(frame.clone())))
    });
    group.finish();
}

criterion_group!(benches, bench_decode, bench_resample, bench_equalizer);
criterion_main!(benches);
