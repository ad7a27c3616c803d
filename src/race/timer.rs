//! Session Timer
//!
//! Single countdown for the whole race, started when the second player is
//! admitted. Fires at most once; cancellation is synchronous (task abort),
//! so a firing that races a just-resolved victory lands in the arbiter's
//! already-resolved branch and does nothing.

use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

/// Countdown clock for one race.
#[derive(Debug, Default)]
pub struct RaceTimer {
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl RaceTimer {
    /// Create an idle timer.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.handle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start the countdown; `on_fire` runs once after `duration`.
    ///
    /// The timer is started exactly once per race; a second start is
    /// ignored.
    pub fn start<F>(&self, duration: Duration, on_fire: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut handle = self.lock();
        if handle.is_some() {
            debug!("race timer already started, ignoring");
            return;
        }

        *handle = Some(tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            on_fire.await;
        }));
    }

    /// Cancel the countdown. A no-op if the timer never started or has
    /// already fired.
    pub fn cancel(&self) {
        if let Some(handle) = self.lock().take() {
            handle.abort();
            debug!("race timer cancelled");
        }
    }

    /// Whether the countdown was ever started.
    pub fn is_started(&self) -> bool {
        self.lock().is_some()
    }
}
