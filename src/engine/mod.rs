//! Playback engine
//!
//! [`Engine`] is a cheap, cloneable handle. Every mutation is sent to one
//! serializing task (see `player`) and answered through a oneshot reply; reads
//! come from snapshots that task keeps current.

mod player;
pub mod monitor;
pub mod reconnect;

use futures_util::future::BoxFuture;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::audio::sink::{NullSink, OutputSink};
use crate::config::EngineConfig;
use crate::constants::{EQ_BANDS, EQ_CELLS, STATUS_CHANNEL_CAPACITY};
use crate::control::controller::VolumeEqController;
use crate::control::eq::{EqPreset, EqualizerTable};
use crate::error::{Error, Result};
use crate::notify::{EventNotifier, SubscriptionId};
use crate::pipeline::chain::{ChainId, ChainParams};
use crate::pipeline::equalizer::SharedEqualizer;
use crate::pipeline::source::{DefaultSourceProvider, SourceProvider};
use crate::settings::{DebouncedStore, MemoryBackend, SettingsStore};
use crate::stations::{StationDirectory, StationList};
use crate::status::PlaybackStatus;

use self::player::PlayerCore;
use self::monitor::BufferMonitor;
use self::reconnect::{ReconnectSupervisor, Resubmit};

/// User-facing operations, executed in arrival order
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Play(String),
    Stop,
    Pause,
    Resume,
    PlayNext,
    SetVolume(i32),
    Mute(bool),
    SetEqBand { band: usize, level: i32 },
    SetAllBands([i32; EQ_BANDS]),
    ApplyPreset(EqPreset),
    SetBalance(i32),
    SaveCustomPreset { slot: usize, name: String },
    LoadCustomPreset(usize),
    DeleteCustomPreset(usize),
    Flush,
}

pub(crate) enum EngineMsg {
    Command(Command, oneshot::Sender<Result<()>>),
    Tick(ChainId),
    Reconnect {
        source: String,
        done: oneshot::Sender<Result<()>>,
    },
    Shutdown(oneshot::Sender<()>),
}

/// State readable without going through the serializing task
pub(crate) struct EngineShared {
    pub(crate) status: RwLock<PlaybackStatus>,
    pub(crate) equalizer: RwLock<EqualizerTable>,
    pub(crate) buffer_level: AtomicU8,
    pub(crate) notifier: EventNotifier,
}

/// Handle to a running engine
#[derive(Clone)]
pub struct Engine {
    tx: mpsc::UnboundedSender<EngineMsg>,
    shared: Arc<EngineShared>,
    gains: SharedEqualizer,
}

impl Engine {
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    async fn send(&self, command: Command) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(EngineMsg::Command(command, reply))
            .map_err(|_| Error::EngineClosed)?;
        rx.await.map_err(|_| Error::EngineClosed)?
    }

    /// Start buffering `source`; replaces whatever is playing
    pub async fn play(&self, source: impl Into<String>) -> Result<()> {
        self.send(Command::Play(source.into())).await
    }

    pub async fn stop(&self) -> Result<()> {
        self.send(Command::Stop).await
    }

    pub async fn pause(&self) -> Result<()> {
        self.send(Command::Pause).await
    }

    pub async fn resume(&self) -> Result<()> {
        self.send(Command::Resume).await
    }

    /// Play the station after the current one
    pub async fn play_next(&self) -> Result<()> {
        self.send(Command::PlayNext).await
    }

    /// Clamped to 0..=100; the hardware write is debounced
    pub async fn set_volume(&self, volume: i32) -> Result<()> {
        self.send(Command::SetVolume(volume)).await
    }

    pub async fn mute(&self, muted: bool) -> Result<()> {
        self.send(Command::Mute(muted)).await
    }

    /// `level` is 0..=24 with 12 flat
    pub async fn set_eq_band(&self, band: usize, level: i32) -> Result<()> {
        self.send(Command::SetEqBand { band, level }).await
    }

    pub async fn set_all_bands(&self, levels: [i32; EQ_BANDS]) -> Result<()> {
        self.send(Command::SetAllBands(levels)).await
    }

    pub async fn apply_preset(&self, preset: EqPreset) -> Result<()> {
        self.send(Command::ApplyPreset(preset)).await
    }

    /// -100 (left only) ..= 100 (right only)
    pub async fn set_balance(&self, balance: i32) -> Result<()> {
        self.send(Command::SetBalance(balance)).await
    }

    pub async fn save_custom_preset(&self, slot: usize, name: impl Into<String>) -> Result<()> {
        self.send(Command::SaveCustomPreset {
            slot,
            name: name.into(),
        })
        .await
    }

    pub async fn load_custom_preset(&self, slot: usize) -> Result<()> {
        self.send(Command::LoadCustomPreset(slot)).await
    }

    pub async fn delete_custom_preset(&self, slot: usize) -> Result<()> {
        self.send(Command::DeleteCustomPreset(slot)).await
    }

    /// Write pending volume and settings immediately
    pub async fn flush(&self) -> Result<()> {
        self.send(Command::Flush).await
    }

    /// Stop playback, flush settings and end the engine task
    pub async fn shutdown(&self) -> Result<()> {
        let (done, rx) = oneshot::channel();
        self.tx
            .send(EngineMsg::Shutdown(done))
            .map_err(|_| Error::EngineClosed)?;
        rx.await.map_err(|_| Error::EngineClosed)
    }

    pub fn is_running(&self) -> bool {
        !self.tx.is_closed()
    }

    pub fn status(&self) -> PlaybackStatus {
        self.shared.status.read().clone()
    }

    /// 0..=100
    pub fn buffer_level(&self) -> u8 {
        self.shared.buffer_level.load(Ordering::Acquire)
    }

    pub fn equalizer(&self) -> EqualizerTable {
        self.shared.equalizer.read().clone()
    }

    /// Gains currently applied by the equalizer stage, in dB
    pub fn equalizer_cells(&self) -> [i8; EQ_CELLS] {
        self.gains.gains()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlaybackStatus> {
        self.shared.notifier.subscribe()
    }

    pub fn subscribe_fn<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(PlaybackStatus) + Send + Sync + 'static,
    {
        self.shared.notifier.subscribe_fn(callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.shared.notifier.unsubscribe(id)
    }
}

/// Wires collaborators into an [`Engine`]
pub struct EngineBuilder {
    config: EngineConfig,
    sink: Option<Arc<dyn OutputSink>>,
    provider: Option<Arc<dyn SourceProvider>>,
    settings: Option<Arc<dyn SettingsStore>>,
    stations: Option<Arc<dyn StationDirectory>>,
}

impl EngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            sink: None,
            provider: None,
            settings: None,
            stations: None,
        }
    }

    pub fn sink(mut self, sink: Arc<dyn OutputSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn provider(mut self, provider: Arc<dyn SourceProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn settings(mut self, settings: Arc<dyn SettingsStore>) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn stations(mut self, stations: Arc<dyn StationDirectory>) -> Self {
        self.stations = Some(stations);
        self
    }

    /// Spawn the engine task; must be called from within a tokio runtime
    pub fn start(self) -> Result<Engine> {
        let config = self.config;
        config.validate()?;
        tokio::runtime::Handle::try_current()
            .map_err(|e| Error::Fatal(format!("engine needs a tokio runtime: {}", e)))?;

        let sink = match self.sink {
            Some(sink) => sink,
            None => Arc::new(NullSink::new(config.output_sample_rate)),
        };
        let provider = match self.provider {
            Some(provider) => provider,
            None => Arc::new(DefaultSourceProvider::new(&config)?),
        };
        let settings = match self.settings {
            Some(settings) => settings,
            None => Arc::new(DebouncedStore::open(MemoryBackend::new(), config.save_debounce())?),
        };
        let stations = self
            .stations
            .unwrap_or_else(|| Arc::new(StationList::default()));

        let gains = SharedEqualizer::new();
        let controller = VolumeEqController::new(
            sink.clone(),
            Arc::new(gains.clone()),
            settings.clone(),
            config.volume_debounce(),
        );
        let volume = settings.volume().unwrap_or(config.default_volume).min(100);
        controller.apply_initial(volume);
        sink.set_muted(false);

        let status = PlaybackStatus::new(volume);
        let shared = Arc::new(EngineShared {
            status: RwLock::new(status.clone()),
            equalizer: RwLock::new(controller.table().clone()),
            buffer_level: AtomicU8::new(0),
            notifier: EventNotifier::new(STATUS_CHANNEL_CAPACITY),
        });

        let (tx, messages) = mpsc::unbounded_channel();
        let (stage_tx, stage_events) = mpsc::unbounded_channel();

        let weak = tx.downgrade();
        let resubmit: Resubmit = Arc::new(move |source: String| -> BoxFuture<'static, Result<()>> {
            let weak = weak.clone();
            Box::pin(async move {
                let tx = weak.upgrade().ok_or(Error::EngineClosed)?;
                let (done, rx) = oneshot::channel();
                tx.send(EngineMsg::Reconnect { source, done })
                    .map_err(|_| Error::EngineClosed)?;
                drop(tx);
                rx.await.map_err(|_| Error::EngineClosed)?
            })
        });

        let params = ChainParams::from_config(&config, Some(gains.clone()), sink.sample_rate());
        let core = PlayerCore {
            monitor: BufferMonitor::new(config.prebuffer_ticks, config.low_water_percent),
            reconnect: ReconnectSupervisor::new(config.reconnect_delay(), resubmit),
            self_tx: tx.downgrade(),
            config,
            shared: shared.clone(),
            status,
            chain: None,
            ticker: None,
            ended_chain: None,
            ended_while_buffering: false,
            reconnect_on_resume: false,
            desired: None,
            controller,
            sink,
            provider,
            settings,
            stations,
            params,
            stage_tx,
        };
        tokio::spawn(core.run(messages, stage_events));

        tracing::info!("Engine started (volume {})", volume);
        Ok(Engine { tx, shared, gains })
    }
}
