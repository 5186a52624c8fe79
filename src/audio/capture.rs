//! Line-in capture
//!
//! Captures from an input device on a dedicated thread and hands frames to
//! the fetcher as s16le bytes, so line-in runs through the same chain as
//! network and file sources.

use bytes::{BufMut, BytesMut};
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::StreamConfig;
use futures_util::future::BoxFuture;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::audio::buffer::{create_shared_buffer, AudioFrame, SharedRingBuffer};
use crate::audio::device::find_device;
use crate::error::StageError;
use crate::pipeline::source::{SourceChunk, SourceReader};

/// Frames buffered between the capture callback and the reader
const CAPTURE_RING_FRAMES: usize = 64;

/// Reader pulling frames from a running capture stream
pub struct LineInReader {
    buffer: SharedRingBuffer,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl LineInReader {
    /// Open `device` (empty for the default input) at the requested format
    pub fn open(device: &str, sample_rate: u32, channels: u16) -> Result<Self, StageError> {
        let id = format!("input:{}", device);
        let device = find_device(&id)?;
        let config = StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let buffer = create_shared_buffer(CAPTURE_RING_FRAMES);
        let running = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<(), StageError>>(1);

        let handle = {
            let buffer = buffer.clone();
            let running = running.clone();
            thread::Builder::new()
                .name("capture-linein".into())
                .spawn(move || {
                    let sequence = AtomicU32::new(0);
                    let start_time = Instant::now();
                    let callback_buffer = buffer.clone();
                    let stream = device.build_input_stream(
                        &config,
                        move |data: &[f32], _: &cpal::InputCallbackInfo| {
                            let frame = AudioFrame::new(
                                data.to_vec(),
                                channels,
                                sample_rate,
                                start_time.elapsed().as_micros() as u64,
                                sequence.fetch_add(1, Ordering::Relaxed),
                            );
                            // Overflow is counted by the ring buffer
                            let _ = callback_buffer.push(frame);
                        },
                        |err| tracing::error!("Capture stream error: {}", err),
                        None,
                    );

                    let stream = match stream {
                        Ok(stream) => stream,
                        Err(e) => {
                            let _ = ready_tx.send(Err(StageError::Open(e.to_string())));
                            return;
                        }
                    };
                    if let Err(e) = stream.play() {
                        let _ = ready_tx.send(Err(StageError::Open(e.to_string())));
                        return;
                    }
                    let _ = ready_tx.send(Ok(()));

                    while running.load(Ordering::Relaxed) {
                        thread::sleep(Duration::from_millis(10));
                    }
                })
                .map_err(|e| StageError::Spawn(e.to_string()))?
        };

        ready_rx
            .recv()
            .map_err(|_| StageError::Open("capture thread exited".into()))??;

        tracing::info!("Line-in capture started at {} Hz, {} channels", sample_rate, channels);

        Ok(Self {
            buffer,
            running,
            thread_handle: Some(handle),
        })
    }
}

impl SourceReader for LineInReader {
    fn next_chunk(&mut self) -> BoxFuture<'_, Result<Option<SourceChunk>, StageError>> {
        Box::pin(async move {
            loop {
                if let Some(frame) = self.buffer.try_pop() {
                    let mut bytes = BytesMut::with_capacity(frame.samples.len() * 2);
                    for sample in &frame.samples {
                        bytes.put_i16_le((sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16);
                    }
                    return Ok(Some(SourceChunk::Data(bytes.freeze())));
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
    }
}

impl Drop for LineInReader {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}
