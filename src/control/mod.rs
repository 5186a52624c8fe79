//! Volume and equalizer control

pub mod controller;
pub mod debounce;
pub mod eq;

pub use controller::VolumeEqController;
pub use debounce::Debouncer;
pub use eq::{Band, CustomPreset, EqPreset, EqualizerTable, BANDS};
