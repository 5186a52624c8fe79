//! Cancellable delayed execution

use parking_lot::Mutex;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Runs the most recently scheduled action once calls quiesce for `delay`
///
/// Scheduling aborts any pending action, so a burst of calls produces one
/// execution of the last one.
pub struct Debouncer {
    name: &'static str,
    delay: Duration,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl Debouncer {
    pub fn new(name: &'static str, delay: Duration) -> Self {
        Self {
            name,
            delay,
            pending: Mutex::new(None),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Replace any pending action with `action`, run after the quiet period
    ///
    /// Outside a tokio runtime the action runs immediately.
    pub fn schedule<F>(&self, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                tracing::warn!("Debouncer {} used outside a runtime, running now", self.name);
                action();
                return;
            }
        };

        let mut pending = self.pending.lock();
        if let Some(previous) = pending.take() {
            previous.abort();
        }
        let delay = self.delay;
        *pending = Some(runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            action();
        }));
    }

    /// Drop the pending action; true if one had not run yet
    pub fn cancel(&self) -> bool {
        match self.pending.lock().take() {
            Some(handle) => {
                let was_pending = !handle.is_finished();
                handle.abort();
                was_pending
            }
            None => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending
            .lock()
            .as_ref()
            .map_or(false, |handle| !handle.is_finished())
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        if let Some(handle) = self.pending.get_mut().take() {
            handle.abort();
        }
    }
}
