//! Status fan-out to subscribers
//!
//! Snapshots go out on a broadcast channel. A slow subscriber only loses
//! snapshots; publishing never waits for anyone.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::status::PlaybackStatus;

/// Handle for a callback subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(Uuid);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub struct EventNotifier {
    tx: broadcast::Sender<PlaybackStatus>,
    subscriptions: DashMap<SubscriptionId, JoinHandle<()>>,
}

impl EventNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            subscriptions: DashMap::new(),
        }
    }

    /// Send a snapshot to every subscriber; returns how many received it
    pub fn publish(&self, status: PlaybackStatus) -> usize {
        // No receivers is not an error
        self.tx.send(status).unwrap_or(0)
    }

    /// Receive every snapshot published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<PlaybackStatus> {
        self.tx.subscribe()
    }

    /// Run `callback` on its own task for every snapshot
    ///
    /// Must be called from within a tokio runtime.
    pub fn subscribe_fn<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(PlaybackStatus) + Send + Sync + 'static,
    {
        // Drop entries whose task already ended, e.g. a panicking callback
        self.subscriptions.retain(|_, handle| !handle.is_finished());

        let id = SubscriptionId(Uuid::new_v4());
        let mut rx = self.tx.subscribe();
        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(status) => callback(status),
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!("Subscriber {} lagged, {} snapshots dropped", id, missed);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
        self.subscriptions.insert(id, handle);
        id
    }

    /// Stop a callback subscription; false if it was unknown
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        match self.subscriptions.remove(&id) {
            Some((_, handle)) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Callback subscriptions currently held
    pub fn callback_count(&self) -> usize {
        self.subscriptions.len()
    }
}

impl Drop for EventNotifier {
    fn drop(&mut self) {
        for entry in self.subscriptions.iter() {
            entry.value().abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::PlaybackState;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::Duration;

    fn status(state: PlaybackState) -> PlaybackStatus {
        PlaybackStatus {
            state,
            ..PlaybackStatus::default()
        }
    }

    #[tokio::test]
    async fn test_callbacks_see_every_transition_in_order() {
        let notifier = EventNotifier::new(16);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let id = notifier.subscribe_fn(move |s| sink.lock().push(s.state));

        for state in [PlaybackState::Buffering, PlaybackState::Playing, PlaybackState::Stopped] {
            notifier.publish(status(state));
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(
            *seen.lock(),
            vec![PlaybackState::Buffering, PlaybackState::Playing, PlaybackState::Stopped]
        );

        assert!(notifier.unsubscribe(id));
        assert!(!notifier.unsubscribe(id));
        tokio::time::sleep(Duration::from_millis(20)).await;
        notifier.publish(status(PlaybackState::Playing));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(seen.lock().len(), 3);
    }

    #[tokio::test]
    async fn test_slow_subscriber_never_blocks_publisher() {
        let notifier = EventNotifier::new(2);
        let mut rx = notifier.subscribe();
        for _ in 0..10 {
            notifier.publish(status(PlaybackState::Playing));
        }
        assert!(matches!(rx.recv().await, Err(RecvError::Lagged(8))));
        assert!(rx.recv().await.is_ok());
    }

    #[tokio::test]
    async fn test_ended_callback_tasks_are_pruned() {
        let notifier = EventNotifier::new(4);
        notifier.subscribe_fn(|status| {
            if status.state == PlaybackState::Error {
                panic!("callback gave up");
            }
        });
        assert_eq!(notifier.callback_count(), 1);

        notifier.publish(status(PlaybackState::Error));
        tokio::time::sleep(Duration::from_millis(50)).await;

        let kept = notifier.subscribe_fn(|_| {});
        assert_eq!(notifier.callback_count(), 1);
        assert!(notifier.unsubscribe(kept));
        assert_eq!(notifier.callback_count(), 0);
    }

    #[test]
    fn test_publish_without_subscribers() {
        let notifier = EventNotifier::new(4);
        assert_eq!(notifier.publish(PlaybackStatus::default()), 0);
    }
}
