use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// A producer that keeps a [`QuoteStore`](crate::store::QuoteStore) current.
///
/// Lifecycle:
/// - `start` is called exactly once and spawns the background update loop.
/// - `add_symbol` / `remove_symbol` may be called at any time after `start`;
///   removal also evicts the symbol from the store immediately.
/// - `stop` is idempotent. Once it returns the source never writes again.
#[async_trait]
pub trait DataSource: Send + Sync {
    async fn start(&self, symbols: Vec<String>) -> Result<()>;
    async fn stop(&self);
    async fn add_symbol(&self, symbol: &str) -> Result<()>;
    async fn remove_symbol(&self, symbol: &str) -> Result<()>;
    fn symbols(&self) -> Vec<String>;
    fn kind(&self) -> &'static str;
}

/// Background task plus the watch channel used to ask it to exit.
pub(crate) struct UpdateLoop {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl UpdateLoop {
    pub(crate) fn spawn<F, Fut>(body: F) -> Self
    where
        F: FnOnce(watch::Receiver<bool>) -> Fut,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(body(shutdown_rx));
        Self { shutdown, task }
    }

    /// Signals the loop and waits for it to exit. Falls back to aborting the
    /// task if the receiver is already gone.
    pub(crate) async fn shutdown(self) {
        if self.shutdown.send(true).is_err() {
            self.task.abort();
        }
        let _ = self.task.await;
    }
}

/// Slot holding the running loop; taking it out makes `stop` idempotent.
#[derive(Default)]
pub(crate) struct LoopSlot(Mutex<Option<UpdateLoop>>);

impl LoopSlot {
    pub(crate) fn install(&self, update_loop: UpdateLoop) {
        *self.lock() = Some(update_loop);
    }

    pub(crate) fn take(&self) -> Option<UpdateLoop> {
        self.lock().take()
    }

    /// Runs `f` only while a loop is installed. The slot stays locked for the
    /// duration, so a concurrent `take` waits until `f` has finished.
    pub(crate) fn with_running<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        let slot = self.lock();
        slot.is_some().then(f)
    }

    fn lock(&self) -> MutexGuard<'_, Option<UpdateLoop>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Resolves once shutdown has been requested or the sender is dropped.
pub(crate) async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}
