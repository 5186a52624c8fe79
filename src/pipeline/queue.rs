//! Bounded queues connecting neighbouring stages
//!
//! Pushes and pops block with a short poll timeout so worker threads can
//! observe their chain's running flag between waits.

use crossbeam_channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender, TrySendError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::constants::QUEUE_POLL_INTERVAL;

/// Create a bounded queue with the given capacity (in items)
pub fn bounded<T>(capacity: usize) -> (QueueWriter<T>, QueueReader<T>) {
    let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
    let seen = Arc::new(AtomicBool::new(false));
    (
        QueueWriter {
            tx,
            seen: seen.clone(),
        },
        QueueReader { rx, seen },
    )
}

/// Producer end of a stage queue
pub struct QueueWriter<T> {
    tx: Sender<T>,
    seen: Arc<AtomicBool>,
}

/// Result of a non-blocking push
pub enum TryPush<T> {
    Pushed,
    Full(T),
    Closed,
}

impl<T> QueueWriter<T> {
    /// Push an item, waiting while the queue is full
    ///
    /// Returns false when the consumer is gone or `running` was cleared.
    pub fn push(&self, item: T, running: &AtomicBool) -> bool {
        let mut item = item;
        loop {
            match self.tx.send_timeout(item, QUEUE_POLL_INTERVAL) {
                Ok(()) => {
                    self.seen.store(true, Ordering::Release);
                    return true;
                }
                Err(SendTimeoutError::Timeout(back)) => {
                    if !running.load(Ordering::Acquire) {
                        return false;
                    }
                    item = back;
                }
                Err(SendTimeoutError::Disconnected(_)) => return false,
            }
        }
    }

    /// Push without waiting
    pub fn try_push(&self, item: T) -> TryPush<T> {
        match self.tx.try_send(item) {
            Ok(()) => {
                self.seen.store(true, Ordering::Release);
                TryPush::Pushed
            }
            Err(TrySendError::Full(back)) => TryPush::Full(back),
            Err(TrySendError::Disconnected(_)) => TryPush::Closed,
        }
    }
}

/// Result of a timed pop
#[derive(Debug)]
pub enum Pop<T> {
    Item(T),
    Empty,
    /// Every producer is gone and the queue is drained
    Closed,
}

/// Consumer end of a stage queue
pub struct QueueReader<T> {
    rx: Receiver<T>,
    seen: Arc<AtomicBool>,
}

impl<T> QueueReader<T> {
    pub fn pop(&self, timeout: Duration) -> Pop<T> {
        match self.rx.recv_timeout(timeout) {
            Ok(item) => Pop::Item(item),
            Err(RecvTimeoutError::Timeout) => Pop::Empty,
            Err(RecvTimeoutError::Disconnected) => Pop::Closed,
        }
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Read-only view of this queue's fill level
    pub fn gauge(&self) -> FillGauge<T> {
        FillGauge {
            rx: self.rx.clone(),
            seen: self.seen.clone(),
        }
    }
}

/// Fill-level view of a queue
///
/// Holding a gauge never keeps producers alive: it only clones the receiving
/// side.
pub struct FillGauge<T> {
    rx: Receiver<T>,
    seen: Arc<AtomicBool>,
}

impl<T> Clone for FillGauge<T> {
    fn clone(&self) -> Self {
        Self {
            rx: self.rx.clone(),
            seen: self.seen.clone(),
        }
    }
}

impl<T> FillGauge<T> {
    /// Fill ratio in percent, or `None` until data has entered the queue
    pub fn percent(&self) -> Option<u8> {
        if !self.seen.load(Ordering::Acquire) {
            return None;
        }
        let capacity = self.rx.capacity().unwrap_or(1).max(1);
        Some(((self.rx.len() * 100) / capacity).min(100) as u8)
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn capacity(&self) -> usize {
        self.rx.capacity().unwrap_or(0)
    }
}
