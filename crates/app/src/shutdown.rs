use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::signal;
use tokio::sync::Notify;

/// Ctrl-C-driven shutdown signal, installed once at process start.
///
/// Grounded on the teacher's `ShutdownHandler`/`ShutdownGuard` split: a
/// background task waits on `signal::ctrl_c()` and flips an `AtomicBool` plus
/// wakes anyone `.wait()`-ing, so the main loop and the Supervisor's stop
/// path don't need to poll.
pub struct ShutdownGuard {
    requested: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl ShutdownGuard {
    pub fn install() -> Self {
        let requested = Arc::new(AtomicBool::new(false));
        let notify = Arc::new(Notify::new());

        let requested_for_task = Arc::clone(&requested);
        let notify_for_task = Arc::clone(&notify);
        tokio::spawn(async move {
            if signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown requested via ctrl-c");
                requested_for_task.store(true, Ordering::SeqCst);
                notify_for_task.notify_waiters();
            }
        });

        Self { requested, notify }
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    pub async fn wait(&self) {
        self.notify.notified().await;
    }
}
