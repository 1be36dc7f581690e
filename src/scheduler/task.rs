//! Cancellable scheduled tasks
//!
//! Background polling is modelled as explicit start/stop/restart task
//! objects instead of ambient interval handles, so a network switch can
//! cancel everything deterministically.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::task::JoinHandle;

type TaskFn = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// A named interval task. The closure runs once per tick; ticks never
/// overlap because the next tick waits for the previous run to finish.
pub struct PollTask {
    name: &'static str,
    interval: Duration,
    run: TaskFn,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl PollTask {
    pub fn new<F>(name: &'static str, interval: Duration, run: F) -> Self
    where
        F: Fn() -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        Self {
            name,
            interval,
            run: Arc::new(run),
            handle: Mutex::new(None),
        }
    }

    /// Start the interval loop. The first tick fires immediately. A no-op
    /// when already running.
    pub fn start(&self) {
        let mut handle = self.handle.lock().unwrap_or_else(|e| e.into_inner());
        if handle.as_ref().map(|h| !h.is_finished()).unwrap_or(false) {
            return;
        }

        log::debug!("Starting poll task {} ({:?})", self.name, self.interval);
        let run = Arc::clone(&self.run);
        let interval = self.interval;
        *handle = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                run().await;
            }
        }));
    }

    /// Cancel the loop. A no-op when not running.
    pub fn stop(&self) {
        let mut handle = self.handle.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = handle.take() {
            log::debug!("Stopping poll task {}", self.name);
            handle.abort();
        }
    }

    /// Cancel and start again, resetting the tick phase.
    pub fn restart(&self) {
        self.stop();
        self.start();
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for PollTask {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Runs a task once after a fixed delay, coalescing triggers that arrive
/// while the delay is pending.
pub struct Debouncer {
    delay: Duration,
    run: TaskFn,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Debouncer {
    pub fn new<F>(delay: Duration, run: F) -> Self
    where
        F: Fn() -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        Self {
            delay,
            run: Arc::new(run),
            handle: Mutex::new(None),
        }
    }

    /// Schedule the task to run after the delay, replacing any pending run.
    pub fn trigger(&self) {
        let mut handle = self.handle.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = handle.take() {
            previous.abort();
        }
        let run = Arc::clone(&self.run);
        let delay = self.delay;
        *handle = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            run().await;
        }));
    }

    /// Drop any pending run.
    pub fn cancel(&self) {
        let mut handle = self.handle.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = handle.take() {
            previous.abort();
        }
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}
