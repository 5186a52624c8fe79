//! Output device enumeration and the cpal-backed sink

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::buffer::{create_shared_buffer, AudioFrame, SharedRingBuffer};
use crate::error::StageError;
use crate::audio::sink::OutputSink;

/// Frames held between the writer thread and the device callback
const DEVICE_RING_FRAMES: usize = 32;

/// Description of an audio device
#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfo {
    pub id: String,
    pub name: String,
    pub is_input: bool,
    pub is_output: bool,
    pub is_default: bool,
}

/// List all available audio devices
pub fn list_devices() -> Vec<DeviceInfo> {
    let host = cpal::default_host();
    let mut devices = Vec::new();

    let default_input_name = host.default_input_device().and_then(|d| d.name().ok());
    let default_output_name = host.default_output_device().and_then(|d| d.name().ok());

    if let Ok(outputs) = host.output_devices() {
        for device in outputs {
            if let Ok(name) = device.name() {
                devices.push(DeviceInfo {
                    id: format!("output:{}", name),
                    is_default: default_output_name.as_ref() == Some(&name),
                    name,
                    is_input: false,
                    is_output: true,
                });
            }
        }
    }

    if let Ok(inputs) = host.input_devices() {
        for device in inputs {
            if let Ok(name) = device.name() {
                devices.push(DeviceInfo {
                    id: format!("input:{}", name),
                    is_default: default_input_name.as_ref() == Some(&name),
                    name,
                    is_input: true,
                    is_output: false,
                });
            }
        }
    }

    devices
}

/// Find a device by its ID (`output:<name>` / `input:<name>`), or the default
/// device of that direction when the name is empty or `default`
pub fn find_device(id: &str) -> Result<cpal::Device, StageError> {
    let host = cpal::default_host();

    let (is_input, name) = if let Some(name) = id.strip_prefix("input:") {
        (true, name)
    } else if let Some(name) = id.strip_prefix("output:") {
        (false, name)
    } else {
        (false, id)
    };

    if name.is_empty() || name == "default" {
        let device = if is_input {
            host.default_input_device()
        } else {
            host.default_output_device()
        };
        return device.ok_or_else(|| StageError::Open(format!("no default device for {}", id)));
    }

    let devices = if is_input {
        host.input_devices()
    } else {
        host.output_devices()
    }
    .map_err(|e| StageError::Open(e.to_string()))?;

    for device in devices {
        if device.name().ok().as_deref() == Some(name) {
            return Ok(device);
        }
    }

    Err(StageError::Open(format!("device not found: {}", id)))
}

/// Output sink rendering through a cpal output stream
///
/// The stream lives on its own thread; frames cross over through a lock-free
/// ring buffer so the device callback never blocks.
pub struct CpalSink {
    ring: SharedRingBuffer,
    volume: Arc<AtomicU8>,
    muted: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    sample_rate: u32,
    thread_handle: Option<JoinHandle<()>>,
}

impl CpalSink {
    /// Open the named output device (empty for the default device)
    pub fn open(device_id: &str) -> Result<Self, StageError> {
        let device = find_device(device_id)?;
        let supported = device
            .default_output_config()
            .map_err(|e| StageError::Open(e.to_string()))?;
        let config: cpal::StreamConfig = supported.config();
        let sample_rate = config.sample_rate.0;
        let device_channels = config.channels as usize;

        let ring = create_shared_buffer(DEVICE_RING_FRAMES);
        let volume = Arc::new(AtomicU8::new(0));
        let muted = Arc::new(AtomicBool::new(false));
        let running = Arc::new(AtomicBool::new(true));

        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<(), StageError>>(1);

        let handle = {
            let ring = ring.clone();
            let volume = volume.clone();
            let muted = muted.clone();
            let running = running.clone();
            thread::Builder::new()
                .name("output-device".into())
                .spawn(move || {
                    let mut current: Option<AudioFrame> = None;
                    let mut position = 0usize;
                    let callback_ring = ring.clone();

                    let stream = device.build_output_stream(
                        &config,
                        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                            let gain = if muted.load(Ordering::Relaxed) {
                                0.0
                            } else {
                                volume.load(Ordering::Relaxed) as f32 / 100.0
                            };
                            for out in data.chunks_mut(device_channels) {
                                if current.as_ref().map_or(true, |f| position >= f.samples_per_channel()) {
                                    current = callback_ring.pop();
                                    position = 0;
                                }
                                match current.as_ref() {
                                    Some(frame) => {
                                        let channels = frame.channels as usize;
                                        for (c, sample) in out.iter_mut().enumerate() {
                                            let src = c.min(channels - 1);
                                            *sample = frame.samples[position * channels + src] * gain;
                                        }
                                        position += 1;
                                    }
                                    None => out.iter_mut().for_each(|s| *s = 0.0),
                                }
                            }
                        },
                        |err| tracing::error!("Output stream error: {}", err),
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
                        thread::sleep(Duration::from_millis(20));
                    }
                    // Stream is dropped here, stopping output
                })
                .map_err(|e| StageError::Spawn(e.to_string()))?
        };

        ready_rx
            .recv()
            .map_err(|_| StageError::Open("output thread exited".into()))??;

        tracing::info!("Output device opened at {} Hz, {} channels", sample_rate, device_channels);

        Ok(Self {
            ring,
            volume,
            muted,
            running,
            sample_rate,
            thread_handle: Some(handle),
        })
    }
}

impl OutputSink for CpalSink {
    fn set_volume(&self, volume: u8) {
        self.volume.store(volume.min(100), Ordering::Relaxed);
    }

    fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
    }

    fn write(&self, frame: &AudioFrame) -> Result<(), StageError> {
        if frame.channels == 0 {
            return Err(StageError::Output("frame without channels".into()));
        }
        // Block the writer thread until the callback makes room
        while self.ring.is_full() {
            if !self.running.load(Ordering::Relaxed) {
                return Err(StageError::Output("device closed".into()));
            }
            thread::sleep(Duration::from_millis(2));
        }
        self.ring.push(frame.clone());
        Ok(())
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}
