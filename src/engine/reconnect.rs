//! Automatic recovery from dropped network streams
//!
//! At most one recovery is in flight. It waits a fixed delay, resubmits the
//! source, and always clears the guard afterwards. There is no retry bound
//! and no backoff.

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::status::{PlaybackState, SourceKind};

/// Resubmits a source through the serializing task
pub type Resubmit = Arc<dyn Fn(String) -> BoxFuture<'static, Result<()>> + Send + Sync>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconnectGuard {
    pub in_flight: bool,
    pub target: Option<String>,
}

/// Clears the guard when the recovery task ends, however it ends
struct ClearOnDrop(Arc<Mutex<ReconnectGuard>>);

impl Drop for ClearOnDrop {
    fn drop(&mut self) {
        let mut guard = self.0.lock();
        guard.in_flight = false;
        guard.target = None;
    }
}

pub struct ReconnectSupervisor {
    guard: Arc<Mutex<ReconnectGuard>>,
    delay: Duration,
    resubmit: Resubmit,
}

impl ReconnectSupervisor {
    pub fn new(delay: Duration, resubmit: Resubmit) -> Self {
        Self {
            guard: Arc::new(Mutex::new(ReconnectGuard::default())),
            delay,
            resubmit,
        }
    }

    pub fn guard(&self) -> ReconnectGuard {
        self.guard.lock().clone()
    }

    pub fn is_in_flight(&self) -> bool {
        self.guard.lock().in_flight
    }

    /// A chain ended on its own; schedule recovery if it qualifies
    ///
    /// Returns true when a recovery task was spawned.
    pub fn on_unexpected_end(&self, state: PlaybackState, kind: SourceKind, source: &str) -> bool {
        if state != PlaybackState::Playing || kind != SourceKind::NetworkStream || source.is_empty() {
            return false;
        }
        {
            let mut guard = self.guard.lock();
            if guard.in_flight {
                tracing::debug!("Reconnect to {:?} already in flight", guard.target);
                return false;
            }
            guard.in_flight = true;
            guard.target = Some(source.to_string());
        }

        tracing::warn!("Stream {} ended, reconnecting in {:?}", source, self.delay);

        let clear = ClearOnDrop(self.guard.clone());
        let resubmit = self.resubmit.clone();
        let delay = self.delay;
        let source = source.to_string();
        tokio::spawn(async move {
            let _clear = clear;
            tokio::time::sleep(delay).await;
            match resubmit(source.clone()).await {
                Ok(()) => tracing::info!("Reconnect to {} submitted", source),
                Err(e) => tracing::warn!("Reconnect to {} failed: {}", source, e),
            }
        });
        true
    }
}
