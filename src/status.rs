//! Playback status model
//!
//! [`PlaybackStatus`] is owned and mutated only by the engine's serializing
//! task; every other component receives cloned snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Player state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    #[default]
    Idle,
    Buffering,
    Playing,
    Paused,
    Stopped,
    Error,
}

impl PlaybackState {
    /// States in which a stage chain is expected to exist
    pub fn is_active(self) -> bool {
        matches!(
            self,
            PlaybackState::Buffering | PlaybackState::Playing | PlaybackState::Paused
        )
    }
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PlaybackState::Idle => "idle",
            PlaybackState::Buffering => "buffering",
            PlaybackState::Playing => "playing",
            PlaybackState::Paused => "paused",
            PlaybackState::Stopped => "stopped",
            PlaybackState::Error => "error",
        };
        f.write_str(name)
    }
}

/// Where the audio comes from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    #[default]
    None,
    NetworkStream,
    LocalFile,
    BluetoothInput,
    LineInput,
}

impl SourceKind {
    /// Classify a source identifier
    pub fn detect(identifier: &str) -> Self {
        let lower = identifier.trim().to_ascii_lowercase();
        if lower.is_empty() {
            SourceKind::None
        } else if lower.starts_with("http://") || lower.starts_with("https://") {
            SourceKind::NetworkStream
        } else if lower.starts_with("linein:") || lower.starts_with("aux:") {
            SourceKind::LineInput
        } else if lower.starts_with("bt:") {
            SourceKind::BluetoothInput
        } else {
            SourceKind::LocalFile
        }
    }
}

/// Immutable snapshot of the player
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackStatus {
    pub state: PlaybackState,
    pub source: SourceKind,
    /// 0..=100
    pub volume: u8,
    pub muted: bool,
    /// URL or path of the current source, empty when none
    pub current_source: String,
    pub title: String,
    pub artist: String,
    pub updated_at: DateTime<Utc>,
}

impl PlaybackStatus {
    pub fn new(volume: u8) -> Self {
        Self {
            state: PlaybackState::Idle,
            source: SourceKind::None,
            volume: volume.min(100),
            muted: false,
            current_source: String::new(),
            title: String::new(),
            artist: String::new(),
            updated_at: Utc::now(),
        }
    }

    /// Stamp the snapshot before it is published
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

impl Default for PlaybackStatus {
    fn default() -> Self {
        Self::new(crate::constants::DEFAULT_VOLUME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_source_kind() {
        assert_eq!(SourceKind::detect("http://stream.example/radio"), SourceKind::NetworkStream);
        assert_eq!(SourceKind::detect("HTTPS://x"), SourceKind::NetworkStream);
        assert_eq!(SourceKind::detect("/music/song.pcm"), SourceKind::LocalFile);
        assert_eq!(SourceKind::detect("file:///music/a.raw"), SourceKind::LocalFile);
        assert_eq!(SourceKind::detect("linein:default"), SourceKind::LineInput);
        assert_eq!(SourceKind::detect("bt:phone"), SourceKind::BluetoothInput);
        assert_eq!(SourceKind::detect("  "), SourceKind::None);
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let status = PlaybackStatus::new(40);
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["state"], "idle");
        assert_eq!(json["source"], "none");
        assert_eq!(json["volume"], 40);
    }

    #[test]
    fn test_active_states() {
        assert!(PlaybackState::Buffering.is_active());
        assert!(PlaybackState::Paused.is_active());
        assert!(!PlaybackState::Error.is_active());
        assert!(!PlaybackState::Stopped.is_active());
    }
}
