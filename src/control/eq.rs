//! Equalizer table, built-in presets and balance math
//!
//! Band levels are kept on the UI scale `0..=24` where 12 is 0 dB. The 20
//! gain cells sent to the equalizer (10 left, then 10 right) are derived from
//! the levels plus the balance offset and clamped to `-13..=13` dB.

use serde::{Deserialize, Serialize};

use crate::constants::{
    BALANCE_MAX_ATTEN_DB, CUSTOM_PRESET_SLOTS, EQ_BANDS, EQ_CELLS, EQ_GAIN_MAX_DB, EQ_GAIN_MIN_DB,
    EQ_LEVEL_FLAT, EQ_LEVEL_MAX, EQ_LEVEL_MIN,
};
use crate::error::{Error, Result};

/// Band metadata for display
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Band {
    pub frequency_hz: u32,
    pub label: &'static str,
}

pub const BANDS: [Band; EQ_BANDS] = [
    Band { frequency_hz: 31, label: "31" },
    Band { frequency_hz: 62, label: "62" },
    Band { frequency_hz: 125, label: "125" },
    Band { frequency_hz: 250, label: "250" },
    Band { frequency_hz: 500, label: "500" },
    Band { frequency_hz: 1_000, label: "1k" },
    Band { frequency_hz: 2_000, label: "2k" },
    Band { frequency_hz: 4_000, label: "4k" },
    Band { frequency_hz: 8_000, label: "8k" },
    Band { frequency_hz: 16_000, label: "16k" },
];

/// Band levels on the UI scale
pub type BandLevels = [u8; EQ_BANDS];

/// Equalizer presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EqPreset {
    Flat,
    Rock,
    Pop,
    Jazz,
    Classical,
    BassBoost,
    Vocal,
    Electronic,
    Acoustic,
    /// Any table edited by hand
    Custom,
}

impl EqPreset {
    pub const BUILT_IN: [EqPreset; 9] = [
        EqPreset::Flat,
        EqPreset::Rock,
        EqPreset::Pop,
        EqPreset::Jazz,
        EqPreset::Classical,
        EqPreset::BassBoost,
        EqPreset::Vocal,
        EqPreset::Electronic,
        EqPreset::Acoustic,
    ];

    pub fn name(self) -> &'static str {
        match self {
            EqPreset::Flat => "Flat",
            EqPreset::Rock => "Rock",
            EqPreset::Pop => "Pop",
            EqPreset::Jazz => "Jazz",
            EqPreset::Classical => "Classical",
            EqPreset::BassBoost => "Bass+",
            EqPreset::Vocal => "Vocal",
            EqPreset::Electronic => "Electronic",
            EqPreset::Acoustic => "Acoustic",
            EqPreset::Custom => "Custom",
        }
    }

    /// Serialized form
    pub fn key(self) -> &'static str {
        match self {
            EqPreset::Flat => "flat",
            EqPreset::Rock => "rock",
            EqPreset::Pop => "pop",
            EqPreset::Jazz => "jazz",
            EqPreset::Classical => "classical",
            EqPreset::BassBoost => "bass_boost",
            EqPreset::Vocal => "vocal",
            EqPreset::Electronic => "electronic",
            EqPreset::Acoustic => "acoustic",
            EqPreset::Custom => "custom",
        }
    }

    /// Band levels of a built-in preset; `None` for `Custom`
    pub fn levels(self) -> Option<BandLevels> {
        let levels = match self {
            EqPreset::Flat => [12; EQ_BANDS],
            EqPreset::Rock => [15, 14, 10, 9, 11, 13, 15, 15, 14, 14],
            EqPreset::Pop => [10, 11, 13, 15, 15, 14, 12, 11, 12, 12],
            EqPreset::Jazz => [14, 13, 11, 13, 10, 12, 12, 13, 14, 14],
            EqPreset::Classical => [12, 12, 12, 12, 12, 10, 9, 9, 11, 13],
            EqPreset::BassBoost => [18, 17, 15, 13, 12, 12, 12, 12, 12, 12],
            EqPreset::Vocal => [9, 10, 12, 14, 16, 16, 15, 13, 11, 10],
            EqPreset::Electronic => [16, 15, 12, 10, 11, 10, 12, 14, 15, 16],
            EqPreset::Acoustic => [13, 13, 12, 12, 13, 13, 12, 12, 13, 12],
            EqPreset::Custom => return None,
        };
        Some(levels)
    }
}

impl TryFrom<u8> for EqPreset {
    type Error = Error;

    fn try_from(id: u8) -> Result<Self> {
        EqPreset::BUILT_IN
            .get(id as usize)
            .copied()
            .ok_or_else(|| Error::InvalidArgument(format!("unknown preset id {}", id)))
    }
}

impl std::str::FromStr for EqPreset {
    type Err = Error;

    /// Accepts the display name (`Bass+`) or the serialized key (`bass_boost`)
    fn from_str(name: &str) -> Result<Self> {
        let wanted = name.trim().to_ascii_lowercase();
        EqPreset::BUILT_IN
            .into_iter()
            .chain(std::iter::once(EqPreset::Custom))
            .find(|p| p.name().to_ascii_lowercase() == wanted || p.key() == wanted)
            .ok_or_else(|| Error::InvalidArgument(format!("unknown preset {}", name)))
    }
}

/// A user-saved band configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomPreset {
    pub name: String,
    pub levels: BandLevels,
}

/// Equalizer state owned by the controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EqualizerTable {
    levels: BandLevels,
    balance: i8,
    preset: EqPreset,
    custom: [Option<CustomPreset>; CUSTOM_PRESET_SLOTS],
}

impl Default for EqualizerTable {
    fn default() -> Self {
        Self {
            levels: [EQ_LEVEL_FLAT; EQ_BANDS],
            balance: 0,
            preset: EqPreset::Flat,
            custom: Default::default(),
        }
    }
}

fn clamp_level(level: i32) -> u8 {
    level.clamp(EQ_LEVEL_MIN as i32, EQ_LEVEL_MAX as i32) as u8
}

impl EqualizerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn levels(&self) -> BandLevels {
        self.levels
    }

    pub fn balance(&self) -> i8 {
        self.balance
    }

    pub fn preset(&self) -> EqPreset {
        self.preset
    }

    pub fn custom_presets(&self) -> &[Option<CustomPreset>; CUSTOM_PRESET_SLOTS] {
        &self.custom
    }

    /// Set one band; the table becomes custom
    pub fn set_band(&mut self, band: usize, level: i32) -> Result<()> {
        let slot = self
            .levels
            .get_mut(band)
            .ok_or_else(|| Error::InvalidArgument(format!("band {} out of range 0..=9", band)))?;
        *slot = clamp_level(level);
        self.preset = EqPreset::Custom;
        Ok(())
    }

    /// Overwrite every band; the table becomes custom
    pub fn set_all(&mut self, levels: [i32; EQ_BANDS]) {
        self.levels = levels.map(clamp_level);
        self.preset = EqPreset::Custom;
    }

    /// Overwrite every band from a built-in preset
    pub fn apply_preset(&mut self, preset: EqPreset) -> Result<()> {
        let levels = preset.levels().ok_or_else(|| {
            Error::InvalidArgument("custom is not a built-in preset".into())
        })?;
        self.levels = levels;
        self.preset = preset;
        Ok(())
    }

    /// Clamp and store the balance
    pub fn set_balance(&mut self, balance: i32) -> i8 {
        self.balance = balance.clamp(-100, 100) as i8;
        self.balance
    }

    /// dB gain of a band before balance
    pub fn band_gain_db(&self, band: usize) -> i8 {
        self.levels[band] as i8 - EQ_LEVEL_FLAT as i8
    }

    /// (left, right) attenuation in dB from the balance
    ///
    /// Balance toward one side attenuates the opposite channel.
    pub fn attenuation(&self) -> (i8, i8) {
        let b = self.balance as i32;
        let atten = (b * BALANCE_MAX_ATTEN_DB / 100) as i8;
        if b < 0 {
            (0, atten)
        } else {
            (-atten, 0)
        }
    }

    /// Gain of one cell (0..10 left, 10..20 right), balance included
    pub fn cell_gain(&self, cell: usize) -> i8 {
        let (left, right) = self.attenuation();
        let (band, offset) = if cell < EQ_BANDS {
            (cell, left)
        } else {
            (cell - EQ_BANDS, right)
        };
        (self.band_gain_db(band) + offset).clamp(EQ_GAIN_MIN_DB, EQ_GAIN_MAX_DB)
    }

    /// All 20 gain cells
    pub fn cells(&self) -> [i8; EQ_CELLS] {
        std::array::from_fn(|cell| self.cell_gain(cell))
    }

    fn slot_mut(&mut self, slot: usize) -> Result<&mut Option<CustomPreset>> {
        self.custom
            .get_mut(slot)
            .ok_or_else(|| Error::InvalidArgument(format!("preset slot {} out of range", slot)))
    }

    /// Store the current levels in a user slot
    pub fn save_custom(&mut self, slot: usize, name: &str) -> Result<()> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidArgument("preset name is empty".into()));
        }
        let levels = self.levels;
        *self.slot_mut(slot)? = Some(CustomPreset {
            name: name.to_string(),
            levels,
        });
        Ok(())
    }

    /// Load a user slot into the table
    pub fn load_custom(&mut self, slot: usize) -> Result<()> {
        let levels = self
            .slot_mut(slot)?
            .as_ref()
            .map(|preset| preset.levels)
            .ok_or_else(|| Error::InvalidArgument(format!("preset slot {} is empty", slot)))?;
        self.levels = levels;
        self.preset = EqPreset::Custom;
        Ok(())
    }

    pub fn delete_custom(&mut self, slot: usize) -> Result<()> {
        *self.slot_mut(slot)? = None;
        Ok(())
    }
}
