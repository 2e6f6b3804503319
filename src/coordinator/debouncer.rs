//! Trailing-edge debouncer shared by all features.
//!
//! Every trigger takes a ticket and sleeps for the window. When it wakes, it
//! fires only if no later trigger took a ticket in the meantime; otherwise
//! the earlier call is dropped before it was ever issued.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    latest: AtomicU64,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            latest: AtomicU64::new(0),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Wait out the quiet period for a new trigger.
    ///
    /// Returns `true` if this trigger is the last one of its burst and should
    /// execute, `false` if a newer trigger (or [`cancel`](Self::cancel))
    /// superseded it.
    pub async fn settle(&self) -> bool {
        let ticket = self.latest.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.window.is_zero() {
            tokio::time::sleep(self.window).await;
        }
        self.latest.load(Ordering::SeqCst) == ticket
    }

    /// Drop any trigger currently waiting.
    pub fn cancel(&self) {
        self.latest.fetch_add(1, Ordering::SeqCst);
    }
}
