//! Persisted settings
//!
//! The engine talks to storage only through [`SettingsStore`]. The default
//! [`DebouncedStore`] keeps settings in memory and coalesces writes to its
//! backend behind a quiet period.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::control::debounce::Debouncer;
use crate::control::eq::EqualizerTable;
use crate::error::SettingsError;

/// Everything that survives a restart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistedSettings {
    /// `None` until the user first changes the volume
    pub volume: Option<u8>,
    pub equalizer: EqualizerTable,
    pub last_source: Option<String>,
    /// Resume the last source at startup
    pub autostart: bool,
}

impl Default for PersistedSettings {
    fn default() -> Self {
        Self {
            volume: None,
            equalizer: EqualizerTable::default(),
            last_source: None,
            autostart: true,
        }
    }
}

/// Settings contract used by the engine
pub trait SettingsStore: Send + Sync {
    fn volume(&self) -> Option<u8>;
    fn set_volume_persisted(&self, volume: u8);
    fn eq_table(&self) -> EqualizerTable;
    fn set_eq_table_persisted(&self, table: &EqualizerTable);
    fn last_source(&self) -> Option<String>;
    fn set_last_source(&self, source: &str);
    fn autostart(&self) -> bool;
    /// Request a deferred write
    fn schedule_save(&self);
    /// Write now if anything changed
    fn flush(&self) -> Result<(), SettingsError>;
}

/// Raw storage for a settings blob
pub trait SettingsBackend: Send + Sync + 'static {
    fn load(&self) -> Result<Option<PersistedSettings>, SettingsError>;
    fn save(&self, settings: &PersistedSettings) -> Result<(), SettingsError>;
}

/// JSON file on disk, replaced atomically on save
pub struct JsonFileBackend {
    path: PathBuf,
}

impl JsonFileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsBackend for JsonFileBackend {
    fn load(&self) -> Result<Option<PersistedSettings>, SettingsError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(&self.path)?;
        Ok(Some(serde_json::from_str(&text)?))
    }

    fn save(&self, settings: &PersistedSettings) -> Result<(), SettingsError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(settings)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// In-memory backend that counts saves
#[derive(Default)]
pub struct MemoryBackend {
    stored: Mutex<Option<PersistedSettings>>,
    saves: AtomicUsize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_settings(settings: PersistedSettings) -> Self {
        Self {
            stored: Mutex::new(Some(settings)),
            saves: AtomicUsize::new(0),
        }
    }

    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn stored(&self) -> Option<PersistedSettings> {
        self.stored.lock().clone()
    }
}

impl SettingsBackend for MemoryBackend {
    fn load(&self) -> Result<Option<PersistedSettings>, SettingsError> {
        Ok(self.stored.lock().clone())
    }

    fn save(&self, settings: &PersistedSettings) -> Result<(), SettingsError> {
        *self.stored.lock() = Some(settings.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl<B: SettingsBackend> SettingsBackend for Arc<B> {
    fn load(&self) -> Result<Option<PersistedSettings>, SettingsError> {
        (**self).load()
    }

    fn save(&self, settings: &PersistedSettings) -> Result<(), SettingsError> {
        (**self).save(settings)
    }
}

struct StoreState<B> {
    backend: B,
    settings: Mutex<PersistedSettings>,
    dirty: AtomicBool,
}

impl<B: SettingsBackend> StoreState<B> {
    fn save_if_dirty(&self) -> Result<(), SettingsError> {
        if !self.dirty.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let snapshot = self.settings.lock().clone();
        match self.backend.save(&snapshot) {
            Ok(()) => {
                tracing::info!("Settings saved");
                Ok(())
            }
            Err(e) => {
                self.dirty.store(true, Ordering::SeqCst);
                Err(e)
            }
        }
    }
}

/// Settings store with deferred, coalesced writes
pub struct DebouncedStore<B: SettingsBackend> {
    state: Arc<StoreState<B>>,
    debouncer: Debouncer,
}

impl<B: SettingsBackend> DebouncedStore<B> {
    /// Load from `backend` (defaults when it holds nothing)
    pub fn open(backend: B, save_delay: Duration) -> Result<Self, SettingsError> {
        let settings = backend.load()?.unwrap_or_default();
        Ok(Self {
            state: Arc::new(StoreState {
                backend,
                settings: Mutex::new(settings),
                dirty: AtomicBool::new(false),
            }),
            debouncer: Debouncer::new("settings-save", save_delay),
        })
    }

    pub fn snapshot(&self) -> PersistedSettings {
        self.state.settings.lock().clone()
    }

    pub fn is_dirty(&self) -> bool {
        self.state.dirty.load(Ordering::SeqCst)
    }

    fn update(&self, apply: impl FnOnce(&mut PersistedSettings)) {
        apply(&mut self.state.settings.lock());
        self.state.dirty.store(true, Ordering::SeqCst);
    }
}

impl<B: SettingsBackend> SettingsStore for DebouncedStore<B> {
    fn volume(&self) -> Option<u8> {
        self.state.settings.lock().volume
    }

    fn set_volume_persisted(&self, volume: u8) {
        self.update(|s| s.volume = Some(volume.min(100)));
    }

    fn eq_table(&self) -> EqualizerTable {
        self.state.settings.lock().equalizer.clone()
    }

    fn set_eq_table_persisted(&self, table: &EqualizerTable) {
        self.update(|s| s.equalizer = table.clone());
    }

    fn last_source(&self) -> Option<String> {
        self.state.settings.lock().last_source.clone()
    }

    fn set_last_source(&self, source: &str) {
        self.update(|s| s.last_source = Some(source.to_string()));
    }

    fn autostart(&self) -> bool {
        self.state.settings.lock().autostart
    }

    fn schedule_save(&self) {
        let state = self.state.clone();
        self.debouncer.schedule(move || {
            if let Err(e) = state.save_if_dirty() {
                tracing::error!("Failed to save settings: {}", e);
            }
        });
    }

    fn flush(&self) -> Result<(), SettingsError> {
        self.debouncer.cancel();
        self.state.save_if_dirty()
    }
}
