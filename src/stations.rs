//! Station directory used by "next station"

use crate::config::StationEntry;

pub trait StationDirectory: Send + Sync {
    /// Source to play after `current`, `None` when the directory is empty
    fn next_source_after(&self, current: &str) -> Option<String>;
}

/// Ordered, wrap-around station list
#[derive(Debug, Clone, Default)]
pub struct StationList {
    stations: Vec<StationEntry>,
}

impl StationList {
    pub fn new(stations: Vec<StationEntry>) -> Self {
        Self { stations }
    }

    pub fn stations(&self) -> &[StationEntry] {
        &self.stations
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }
}

impl StationDirectory for StationList {
    fn next_source_after(&self, current: &str) -> Option<String> {
        if self.stations.is_empty() {
            return None;
        }
        // Unknown current source starts over from the first station
        let next = self
            .stations
            .iter()
            .position(|s| s.url == current)
            .map_or(0, |i| (i + 1) % self.stations.len());
        let station = &self.stations[next];
        tracing::info!("Next station: {}", station.name);
        Some(station.url.clone())
    }
}
