//! Cancellation signals and joinable background tasks.
//!
//! A [`StopSignal`] is set once by its owner and observed by any number of
//! [`StopListener`]s. Both background loops and the batch interrupt use it.

use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::harness::{HarnessError, HarnessResult};

/// Create a connected signal/listener pair
pub fn stop_signal() -> (StopSignal, StopListener) {
    let (tx, rx) = watch::channel(false);
    (StopSignal(tx), StopListener { rx, _anchor: None })
}

/// Write side of a one-shot cancellation flag
#[derive(Debug)]
pub struct StopSignal(watch::Sender<bool>);

impl StopSignal {
    /// Raise the flag. Idempotent.
    pub fn trigger(&self) {
        self.0.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.0.borrow()
    }

    pub fn listener(&self) -> StopListener {
        StopListener {
            rx: self.0.subscribe(),
            _anchor: None,
        }
    }
}

/// Read side of a cancellation flag
#[derive(Debug, Clone)]
pub struct StopListener {
    rx: watch::Receiver<bool>,
    /// Keeps the sender of a [`StopListener::never`] listener alive
    _anchor: Option<Arc<watch::Sender<bool>>>,
}

impl StopListener {
    /// A listener that is never triggered
    pub fn never() -> Self {
        let (tx, rx) = watch::channel(false);
        StopListener {
            rx,
            _anchor: Some(Arc::new(tx)),
        }
    }

    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once the flag is raised or its signal is dropped
    pub async fn stopped(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// A spawned polling loop paired with its own stop signal
#[derive(Debug)]
pub struct BackgroundTask<T> {
    name: &'static str,
    stop: StopSignal,
    handle: JoinHandle<T>,
}

impl<T: Send + 'static> BackgroundTask<T> {
    /// Spawn `body` with a fresh stop listener
    pub fn spawn<F, Fut>(name: &'static str, body: F) -> Self
    where
        F: FnOnce(StopListener) -> Fut,
        Fut: std::future::Future<Output = T> + Send + 'static,
    {
        let (stop, listener) = stop_signal();
        let handle = tokio::spawn(body(listener));
        Self { name, stop, handle }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Signal the loop and wait until it has fully exited
    pub async fn stop(self) -> HarnessResult<T> {
        self.stop.trigger();
        self.handle.await.map_err(|e| HarnessError::TaskJoin {
            task: self.name,
            reason: e.to_string(),
        })
    }
}
