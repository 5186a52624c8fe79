//! # Netradio Engine
//!
//! Streaming playback engine for internet radio, local files and line-in.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │   HTTP / WebSocket (ui)        binary           scheduled triggers        │
//! │           │                       │                     │                 │
//! │           └───────────┬───────────┴─────────────────────┘                 │
//! │                       ▼  Engine handle (commands + oneshot replies)       │
//! │  ┌────────────────────────────────────────────────────────────────────┐   │
//! │  │              Serializing task (engine::player::PlayerCore)         │   │
//! │  │   state machine ── buffer monitor ── reconnect supervisor          │   │
//! │  │         │                 ▲                    │                   │   │
//! │  │         │ start/stop      │ ticks              │ delayed resubmit  │   │
//! │  └─────────┼─────────────────┼────────────────────┼───────────────────┘   │
//! │            ▼                 │ stage events       ▼                       │
//! │  ┌────────────────────────────────────────────────────────────────────┐   │
//! │  │                 Stage chain (pipeline::chain)                      │   │
//! │  │  ┌─────────┐   ┌─────────┐   ┌──────────┐   ┌────────┐   ┌───────┐ │   │
//! │  │  │ Fetcher │──▶│ Decoder │──▶│Resampler │──▶│   EQ   │──▶│Output │ │   │
//! │  │  │ (tokio) │   │(thread) │   │ (thread) │   │(thread)│   │Writer │ │   │
//! │  │  └─────────┘   └─────────┘   └──────────┘   └────────┘   └───┬───┘ │   │
//! │  └──────────────────────────────────────────────────────────────┼─────┘   │
//! │                                                                 ▼         │
//! │        Volume/EQ controller ──────────────────────────▶  Output sink      │
//! │                                                                           │
//! │  status snapshots ──▶ Event notifier (broadcast) ──▶ subscribers          │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod config;
pub mod control;
pub mod engine;
pub mod error;
pub mod notify;
pub mod pipeline;
pub mod settings;
pub mod stations;
pub mod status;
pub mod ui;

pub use engine::Engine;
pub use error::{Error, Result};
pub use status::{PlaybackState, PlaybackStatus, SourceKind};

/// Application-wide constants
pub mod constants {
    use std::time::Duration;

    /// Default sample rate of raw PCM delivered by sources
    pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;

    /// Default channel count (stereo)
    pub const DEFAULT_CHANNELS: u16 = 2;

    /// Default output sample rate
    pub const DEFAULT_OUTPUT_SAMPLE_RATE: u32 = 48_000;

    /// Ticks before buffering is considered complete
    pub const DEFAULT_PREBUFFER_TICKS: u32 = 30;

    /// Buffer monitor tick period in milliseconds
    pub const DEFAULT_TICK_INTERVAL_MS: u64 = 100;

    /// Fill percentage below which playback logs an underrun warning
    pub const DEFAULT_LOW_WATER_PERCENT: u8 = 30;

    /// Delay before a dropped network stream is resubmitted
    pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 500;

    /// Volume slider debounce
    pub const DEFAULT_VOLUME_DEBOUNCE_MS: u64 = 50;

    /// Settings persistence debounce
    pub const DEFAULT_SAVE_DEBOUNCE_MS: u64 = 1000;

    /// Capacity of the queues between stages (items)
    pub const DEFAULT_STAGE_QUEUE_CAPACITY: usize = 16;

    /// Capacity of the output writer's input queue (frames)
    pub const DEFAULT_OUTPUT_QUEUE_CAPACITY: usize = 64;

    /// Fetch chunk size in bytes
    pub const DEFAULT_CHUNK_BYTES: usize = 4096;

    /// Volume used when nothing is persisted
    pub const DEFAULT_VOLUME: u8 = 50;

    /// Default HTTP port for the control surface
    pub const DEFAULT_HTTP_PORT: u16 = 8080;

    /// Equalizer bands per channel
    pub const EQ_BANDS: usize = 10;

    /// Equalizer gain cells (bands x 2 channels)
    pub const EQ_CELLS: usize = EQ_BANDS * 2;

    /// Gain cell limits in dB
    pub const EQ_GAIN_MIN_DB: i8 = -13;
    pub const EQ_GAIN_MAX_DB: i8 = 13;

    /// UI scale of a band level; 12 is 0 dB
    pub const EQ_LEVEL_MIN: u8 = 0;
    pub const EQ_LEVEL_FLAT: u8 = 12;
    pub const EQ_LEVEL_MAX: u8 = 24;

    /// Maximum balance attenuation in dB
    pub const BALANCE_MAX_ATTEN_DB: i32 = 12;

    /// Center frequencies of the equalizer bands in Hz
    pub const EQ_BAND_FREQUENCIES: [f32; EQ_BANDS] = [
        31.0, 62.0, 125.0, 250.0, 500.0, 1_000.0, 2_000.0, 4_000.0, 8_000.0, 16_000.0,
    ];

    /// Number of user preset slots
    pub const CUSTOM_PRESET_SLOTS: usize = 3;

    /// Poll timeout used by stage threads between flag checks
    pub const QUEUE_POLL_INTERVAL: Duration = Duration::from_millis(20);

    /// Capacity of the status broadcast channel
    pub const STATUS_CHANNEL_CAPACITY: usize = 64;
}
