//! Audio subsystem module

pub mod buffer;
pub mod sink;

#[cfg(feature = "device-io")]
pub mod capture;
#[cfg(feature = "device-io")]
pub mod device;

pub use buffer::{AudioFrame, RingBuffer};
pub use sink::{EqualizerSink, NullSink, OutputSink, RecordingSink};

#[cfg(feature = "device-io")]
pub use device::{list_devices, CpalSink};
