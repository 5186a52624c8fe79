//! The serializing task
//!
//! `PlayerCore` owns the authoritative [`PlaybackStatus`], the active chain,
//! the buffer monitor and the volume/EQ controller. Commands, stage events,
//! monitor ticks and reconnect requests are all handled here one at a time,
//! so every published snapshot follows the transition that produced it.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::audio::sink::OutputSink;
use crate::config::EngineConfig;
use crate::control::controller::VolumeEqController;
use crate::engine::monitor::BufferMonitor;
use crate::engine::reconnect::ReconnectSupervisor;
use crate::engine::{Command, EngineMsg, EngineShared};
use crate::error::{Error, Result};
use crate::pipeline::chain::{ChainHandle, ChainId, ChainParams, StageChain};
use crate::pipeline::source::{Source, SourceProvider};
use crate::pipeline::stage::{StageEvent, StageEventKind, StageKind};
use crate::settings::SettingsStore;
use crate::stations::StationDirectory;
use crate::status::{PlaybackState, PlaybackStatus, SourceKind};

pub(crate) struct PlayerCore {
    pub(crate) config: EngineConfig,
    pub(crate) shared: Arc<EngineShared>,
    pub(crate) status: PlaybackStatus,
    pub(crate) chain: Option<ChainHandle>,
    pub(crate) ticker: Option<JoinHandle<()>>,
    pub(crate) monitor: BufferMonitor,
    pub(crate) reconnect: ReconnectSupervisor,
    /// Chain whose unexpected end scheduled the pending reconnect
    pub(crate) ended_chain: Option<ChainId>,
    /// The network stream ended before prebuffering completed
    pub(crate) ended_while_buffering: bool,
    /// A reconnect came due while paused
    pub(crate) reconnect_on_resume: bool,
    /// Source the user last asked for; cleared by stop and errors
    pub(crate) desired: Option<String>,
    pub(crate) controller: VolumeEqController,
    pub(crate) sink: Arc<dyn OutputSink>,
    pub(crate) provider: Arc<dyn SourceProvider>,
    pub(crate) settings: Arc<dyn SettingsStore>,
    pub(crate) stations: Arc<dyn StationDirectory>,
    pub(crate) params: ChainParams,
    pub(crate) stage_tx: mpsc::UnboundedSender<StageEvent>,
    pub(crate) self_tx: mpsc::WeakUnboundedSender<EngineMsg>,
}

impl PlayerCore {
    pub(crate) async fn run(
        mut self,
        mut messages: mpsc::UnboundedReceiver<EngineMsg>,
        mut stage_events: mpsc::UnboundedReceiver<StageEvent>,
    ) {
        tracing::info!("Engine task started");
        loop {
            tokio::select! {
                message = messages.recv() => match message {
                    Some(message) => {
                        if !self.handle(message).await {
                            break;
                        }
                    }
                    None => {
                        self.shutdown().await;
                        break;
                    }
                },
                Some(event) = stage_events.recv() => self.on_stage_event(event).await,
            }
        }
        tracing::info!("Engine task finished");
    }

    /// Returns false once the engine has shut down
    async fn handle(&mut self, message: EngineMsg) -> bool {
        match message {
            EngineMsg::Command(command, reply) => {
                let result = self.execute(command).await;
                if let Err(e) = &result {
                    tracing::warn!("Command rejected: {}", e);
                }
                let _ = reply.send(result);
            }
            EngineMsg::Tick(chain) => self.on_tick(chain),
            EngineMsg::Reconnect { source, done } => {
                let result = self.on_reconnect(source).await;
                let _ = done.send(result);
            }
            EngineMsg::Shutdown(done) => {
                self.shutdown().await;
                let _ = done.send(());
                return false;
            }
        }
        true
    }

    async fn execute(&mut self, command: Command) -> Result<()> {
        match command {
            Command::Play(source) => self.play(&source).await,
            Command::Stop => self.stop().await,
            Command::Pause => {
                self.pause();
                Ok(())
            }
            Command::Resume => self.resume().await,
            Command::PlayNext => {
                let next = self
                    .stations
                    .next_source_after(&self.status.current_source)
                    .ok_or_else(|| Error::InvalidState("no stations configured".into()))?;
                self.play(&next).await
            }
            Command::SetVolume(volume) => {
                self.status.volume = self.controller.set_volume(volume);
                self.publish();
                Ok(())
            }
            Command::Mute(muted) => {
                self.status.muted = muted;
                self.apply_mute();
                self.publish();
                Ok(())
            }
            Command::SetEqBand { band, level } => {
                self.controller.set_eq_band(band, level)?;
                self.publish_equalizer();
                Ok(())
            }
            Command::SetAllBands(levels) => {
                self.controller.set_all_bands(levels);
                self.publish_equalizer();
                Ok(())
            }
            Command::ApplyPreset(preset) => {
                self.controller.apply_preset(preset)?;
                self.publish_equalizer();
                Ok(())
            }
            Command::SetBalance(balance) => {
                self.controller.set_balance(balance);
                self.publish_equalizer();
                Ok(())
            }
            Command::SaveCustomPreset { slot, name } => {
                self.controller.save_custom_preset(slot, &name)?;
                self.publish_equalizer();
                Ok(())
            }
            Command::LoadCustomPreset(slot) => {
                self.controller.load_custom_preset(slot)?;
                self.publish_equalizer();
                Ok(())
            }
            Command::DeleteCustomPreset(slot) => {
                self.controller.delete_custom_preset(slot)?;
                self.publish_equalizer();
                Ok(())
            }
            Command::Flush => {
                self.controller.flush_volume();
                self.settings.flush()?;
                Ok(())
            }
        }
    }

    /// Tear down any current chain and start buffering `identifier`
    async fn play(&mut self, identifier: &str) -> Result<()> {
        if self.status.state == PlaybackState::Error {
            return Err(Error::InvalidState(
                "player is in error state, stop it first".into(),
            ));
        }
        let source = Source::parse(identifier)?;

        self.teardown().await;
        self.sink.set_muted(true);
        self.monitor.reset();
        self.set_buffer_level(0);

        let chain = match StageChain::start(
            &source.identifier,
            &self.params,
            self.provider.clone(),
            self.sink.clone(),
            self.stage_tx.clone(),
        ) {
            Ok(chain) => chain,
            Err(e) => {
                tracing::error!("Failed to start chain for {}: {}", source.identifier, e);
                self.desired = None;
                if self.status.state.is_active() {
                    self.set_state(PlaybackState::Stopped);
                }
                self.apply_mute();
                return Err(e);
            }
        };

        self.ticker = Some(self.spawn_ticker(chain.id()));
        self.chain = Some(chain);
        self.desired = Some(source.identifier.clone());

        self.status.source = source.kind;
        self.status.current_source = source.identifier.clone();
        self.status.title.clear();
        self.status.artist.clear();
        self.set_state(PlaybackState::Buffering);

        self.settings.set_last_source(&source.identifier);
        self.settings.schedule_save();
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        match self.status.state {
            PlaybackState::Buffering
            | PlaybackState::Playing
            | PlaybackState::Paused
            | PlaybackState::Error => {
                self.teardown().await;
                self.desired = None;
                self.monitor.reset();
                self.set_buffer_level(0);
                self.set_state(PlaybackState::Stopped);
                self.apply_mute();
            }
            state => tracing::debug!("Stop ignored in state {}", state),
        }
        Ok(())
    }

    fn pause(&mut self) {
        match (&self.chain, self.status.state) {
            (Some(chain), PlaybackState::Playing) => {
                chain.pause();
                self.set_state(PlaybackState::Paused);
            }
            (_, state) => tracing::debug!("Pause ignored in state {}", state),
        }
    }

    async fn resume(&mut self) -> Result<()> {
        if self.chain.is_none() || self.status.state != PlaybackState::Paused {
            tracing::debug!("Resume ignored in state {}", self.status.state);
            return Ok(());
        }
        if std::mem::take(&mut self.reconnect_on_resume) {
            if let Some(source) = self.desired.clone() {
                tracing::info!("Resuming with a reconnect to {}", source);
                return self.play(&source).await;
            }
        }
        if let Some(chain) = &self.chain {
            chain.resume();
        }
        self.set_state(PlaybackState::Playing);
        Ok(())
    }

    /// Stop the ticker and the chain; returns once every stage has exited
    async fn teardown(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
        if let Some(chain) = self.chain.take() {
            chain.stop().await;
        }
        self.ended_chain = None;
        self.ended_while_buffering = false;
        self.reconnect_on_resume = false;
    }

    fn on_tick(&mut self, chain_id: ChainId) {
        let Some(chain) = self.chain.as_ref().filter(|c| c.id() == chain_id) else {
            return;
        };
        match self.status.state {
            PlaybackState::Buffering => {
                let ready = self.monitor.on_buffering_tick(chain.output_fill());
                if ready {
                    chain.open_output();
                }
                self.set_buffer_level(self.monitor.percent());
                if ready {
                    tracing::info!("Prebuffer complete, starting output");
                    self.set_state(PlaybackState::Playing);
                    self.apply_mute();
                    if self.ended_while_buffering {
                        self.ended_while_buffering = false;
                        self.schedule_reconnect(chain_id);
                    }
                }
            }
            PlaybackState::Playing => {
                let level = self.monitor.on_playing_tick(chain.output_fill());
                self.set_buffer_level(level);
            }
            _ => {}
        }
    }

    async fn on_stage_event(&mut self, event: StageEvent) {
        let current = self.chain.as_ref().map(|c| c.id());
        if current != Some(event.chain) {
            tracing::trace!("Dropping event from stale chain {}", event.chain);
            return;
        }

        match event.kind {
            StageEventKind::DataReady => {
                tracing::debug!("Stage {} has data", event.stage.name());
            }
            StageEventKind::Metadata { title, artist } => {
                tracing::info!("Now playing: {} - {}", artist, title);
                self.status.title = title;
                self.status.artist = artist;
                self.publish();
            }
            StageEventKind::Error(message) => {
                tracing::error!("Stage {} failed: {}", event.stage.name(), message);
                self.teardown().await;
                self.desired = None;
                self.monitor.reset();
                self.set_buffer_level(0);
                self.set_state(PlaybackState::Error);
                self.apply_mute();
            }
            StageEventKind::Finished => match event.stage {
                StageKind::Fetcher | StageKind::Output => self.on_chain_finished(event).await,
                stage => tracing::debug!("Stage {} finished", stage.name()),
            },
        }
    }

    async fn on_chain_finished(&mut self, event: StageEvent) {
        if self.status.source == SourceKind::NetworkStream {
            if self.status.state == PlaybackState::Buffering {
                self.ended_while_buffering = true;
            } else {
                self.schedule_reconnect(event.chain);
            }
        } else if event.stage == StageKind::Output {
            tracing::info!("Playback finished");
            self.teardown().await;
            self.desired = None;
            self.monitor.reset();
            self.set_buffer_level(0);
            self.set_state(PlaybackState::Stopped);
            self.apply_mute();
        }
    }

    fn schedule_reconnect(&mut self, chain: ChainId) {
        let scheduled = self.reconnect.on_unexpected_end(
            self.status.state,
            self.status.source,
            &self.status.current_source,
        );
        if scheduled {
            self.ended_chain = Some(chain);
        }
    }

    /// Resubmission from the reconnect supervisor
    ///
    /// Skipped when the user changed what should be playing during the delay,
    /// deferred to `resume` when the user paused.
    async fn on_reconnect(&mut self, source: String) -> Result<()> {
        let current = self.chain.as_ref().map(|c| c.id());
        let still_wanted = self.desired.as_deref() == Some(source.as_str())
            && self.ended_chain.is_some()
            && self.ended_chain == current;
        if still_wanted && self.status.state == PlaybackState::Paused {
            tracing::info!("Reconnect to {} deferred until resume", source);
            self.reconnect_on_resume = true;
            return Ok(());
        }
        if !still_wanted || self.status.state != PlaybackState::Playing {
            tracing::info!("Reconnect to {} skipped, player state changed", source);
            return Ok(());
        }
        tracing::info!("Reconnecting to {}", source);
        self.play(&source).await
    }

    async fn shutdown(&mut self) {
        self.teardown().await;
        self.desired = None;
        self.controller.flush_volume();
        if let Err(e) = self.settings.flush() {
            tracing::error!("Failed to flush settings on shutdown: {}", e);
        }
        if self.status.state.is_active() {
            self.monitor.reset();
            self.set_buffer_level(0);
            self.set_state(PlaybackState::Stopped);
        }
    }

    fn spawn_ticker(&self, chain: ChainId) -> JoinHandle<()> {
        let tx = self.self_tx.clone();
        let period = self.config.tick_interval();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let Some(tx) = tx.upgrade() else { break };
                if tx.send(EngineMsg::Tick(chain)).is_err() {
                    break;
                }
            }
        })
    }

    /// Sink is muted while buffering regardless of the user's mute
    fn apply_mute(&self) {
        let muted = self.status.muted || self.status.state == PlaybackState::Buffering;
        self.sink.set_muted(muted);
    }

    fn set_state(&mut self, state: PlaybackState) {
        if self.status.state != state {
            tracing::info!("State: {} -> {}", self.status.state, state);
            self.status.state = state;
        }
        self.publish();
    }

    fn set_buffer_level(&self, percent: u8) {
        self.shared.buffer_level.store(percent, Ordering::Release);
    }

    fn publish(&mut self) {
        self.status.touch();
        *self.shared.status.write() = self.status.clone();
        self.shared.notifier.publish(self.status.clone());
    }

    fn publish_equalizer(&self) {
        *self.shared.equalizer.write() = self.controller.table().clone();
    }
}
