//! Volume and equalizer controller
//!
//! Owned by the engine's serializing task. Volume reaches the sink through a
//! short debounce; equalizer edits are applied immediately. Every change is
//! also handed to the settings store for a deferred write.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use crate::audio::sink::{EqualizerSink, OutputSink};
use crate::constants::EQ_BANDS;
use crate::control::debounce::Debouncer;
use crate::control::eq::{EqPreset, EqualizerTable};
use crate::error::Result;
use crate::settings::SettingsStore;

pub struct VolumeEqController {
    sink: Arc<dyn OutputSink>,
    equalizer: Arc<dyn EqualizerSink>,
    settings: Arc<dyn SettingsStore>,
    table: EqualizerTable,
    pending_volume: Arc<Mutex<Option<u8>>>,
    volume_debounce: Debouncer,
}

impl VolumeEqController {
    pub fn new(
        sink: Arc<dyn OutputSink>,
        equalizer: Arc<dyn EqualizerSink>,
        settings: Arc<dyn SettingsStore>,
        volume_debounce: Duration,
    ) -> Self {
        let table = settings.eq_table();
        Self {
            sink,
            equalizer,
            settings,
            table,
            pending_volume: Arc::new(Mutex::new(None)),
            volume_debounce: Debouncer::new("volume", volume_debounce),
        }
    }

    /// Push the stored volume and every gain cell to the hardware
    pub fn apply_initial(&self, volume: u8) {
        self.sink.set_volume(volume.min(100));
        self.equalizer.set_gains(&self.table.cells());
    }

    pub fn table(&self) -> &EqualizerTable {
        &self.table
    }

    /// Clamp, remember and debounce a volume change; returns the clamped value
    pub fn set_volume(&self, volume: i32) -> u8 {
        let volume = volume.clamp(0, 100) as u8;
        *self.pending_volume.lock() = Some(volume);

        let pending = self.pending_volume.clone();
        let sink = self.sink.clone();
        self.volume_debounce.schedule(move || {
            if let Some(volume) = pending.lock().take() {
                tracing::debug!("Hardware volume -> {}", volume);
                sink.set_volume(volume);
            }
        });

        self.settings.set_volume_persisted(volume);
        self.settings.schedule_save();
        volume
    }

    /// Write any pending volume now
    pub fn flush_volume(&self) {
        self.volume_debounce.cancel();
        if let Some(volume) = self.pending_volume.lock().take() {
            tracing::debug!("Hardware volume -> {} (flush)", volume);
            self.sink.set_volume(volume);
        }
    }

    /// Change one band; only that band's two cells are rewritten
    pub fn set_eq_band(&mut self, band: usize, level: i32) -> Result<()> {
        self.table.set_band(band, level)?;
        self.equalizer.set_gain(band, self.table.cell_gain(band));
        self.equalizer
            .set_gain(band + EQ_BANDS, self.table.cell_gain(band + EQ_BANDS));
        self.persist();
        Ok(())
    }

    pub fn set_all_bands(&mut self, levels: [i32; EQ_BANDS]) {
        self.table.set_all(levels);
        self.reapply();
        self.persist();
    }

    pub fn apply_preset(&mut self, preset: EqPreset) -> Result<()> {
        self.table.apply_preset(preset)?;
        tracing::info!("Equalizer preset {}", preset.name());
        self.reapply();
        self.persist();
        Ok(())
    }

    /// Clamp and apply a balance; returns the clamped value
    pub fn set_balance(&mut self, balance: i32) -> i8 {
        let balance = self.table.set_balance(balance);
        self.reapply();
        self.persist();
        balance
    }

    pub fn save_custom_preset(&mut self, slot: usize, name: &str) -> Result<()> {
        self.table.save_custom(slot, name)?;
        self.persist();
        Ok(())
    }

    pub fn load_custom_preset(&mut self, slot: usize) -> Result<()> {
        self.table.load_custom(slot)?;
        self.reapply();
        self.persist();
        Ok(())
    }

    pub fn delete_custom_preset(&mut self, slot: usize) -> Result<()> {
        self.table.delete_custom(slot)?;
        self.persist();
        Ok(())
    }

    fn reapply(&self) {
        self.equalizer.set_gains(&self.table.cells());
    }

    fn persist(&self) {
        self.settings.set_eq_table_persisted(&self.table);
        self.settings.schedule_save();
    }
}
