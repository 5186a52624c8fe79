//! Pipeline stage chain
//!
//! Sources, bounded queues, processing stages and the chain that links them.

pub mod chain;
pub mod dsp;
pub mod equalizer;
pub mod icy;
pub mod queue;
pub mod source;
pub mod stage;

pub use chain::{ChainHandle, ChainId, ChainParams, StageChain};
pub use equalizer::SharedEqualizer;
pub use icy::StreamMetadata;
pub use source::{DefaultSourceProvider, Source, SourceChunk, SourceProvider, SourceReader};
pub use stage::{StageEvent, StageEventKind, StageKind};
