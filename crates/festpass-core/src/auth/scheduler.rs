//! One-shot refresh timer with cancel-and-replace semantics.
//!
//! At most one timer is outstanding: arming a new one aborts the previous
//! task first. A timer that fires detaches itself from the slot before
//! running its job, so the job may re-arm the scheduler without aborting
//! itself.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

/// How long before expiry the access token is renewed.
pub const REFRESH_LEAD: Duration = Duration::from_secs(60);

/// Lower bound on the delay, for tokens that are already (nearly) expired.
pub const MIN_REFRESH_DELAY: Duration = Duration::from_secs(1);

/// Delay until the refresh for a token expiring at `exp` (epoch seconds):
/// `max(1s, exp - now - 60s)`.
pub fn refresh_delay(exp: i64, now: DateTime<Utc>) -> Duration {
    let lead_ms = REFRESH_LEAD.as_millis() as i64;
    let min_ms = MIN_REFRESH_DELAY.as_millis() as i64;
    let ms = exp
        .saturating_mul(1000)
        .saturating_sub(now.timestamp_millis())
        .saturating_sub(lead_ms);
    Duration::from_millis(ms.max(min_ms) as u64)
}

struct Armed {
    id: u64,
    deadline: Instant,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct Slot {
    armed: Mutex<Option<Armed>>,
    next_id: AtomicU64,
}

impl Slot {
    fn lock(&self) -> MutexGuard<'_, Option<Armed>> {
        self.armed.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Detach timer `id` without aborting it. False if it was replaced or cancelled.
    fn release(&self, id: u64) -> bool {
        let mut armed = self.lock();
        if armed.as_ref().map(|a| a.id) == Some(id) {
            armed.take();
            true
        } else {
            false
        }
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        if let Some(armed) = self.lock().take() {
            armed.handle.abort();
        }
    }
}

#[derive(Default)]
pub struct RefreshScheduler {
    slot: Arc<Slot>,
}

impl RefreshScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `job` after `delay`, cancelling any pending timer. Returns the timer id.
    ///
    /// Must be called from within a tokio runtime.
    pub fn arm<F, Fut>(&self, delay: Duration, job: F) -> u64
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = self.slot.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let deadline = Instant::now() + delay;
        let slot: Weak<Slot> = Arc::downgrade(&self.slot);

        // Held across the spawn so the task cannot fire before it is registered
        let mut armed = self.slot.lock();
        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let released = slot.upgrade().map(|s| s.release(id)).unwrap_or(false);
            if released {
                debug!(timer = id, "Refresh timer fired");
                job().await;
            }
        });

        if let Some(previous) = armed.replace(Armed { id, deadline, handle }) {
            previous.handle.abort();
            debug!(timer = previous.id, replaced_by = id, "Cancelled pending refresh timer");
        }
        id
    }

    /// Abort the pending timer, if any. Returns whether one was pending.
    pub fn cancel(&self) -> bool {
        match self.slot.lock().take() {
            Some(armed) => {
                armed.handle.abort();
                debug!(timer = armed.id, "Refresh timer cancelled");
                true
            }
            None => false,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Id of the pending timer
    pub fn armed_id(&self) -> Option<u64> {
        self.slot.lock().as_ref().map(|a| a.id)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.slot.lock().as_ref().map(|a| a.deadline)
    }

    /// Time left until the pending timer fires
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline()
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }
}
