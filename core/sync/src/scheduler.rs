//! Replay scheduling on reconnect and on request.

use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use crate::connectivity::{ConnectivityTracker, Subscription};
use crate::engine::SyncReport;

/// Why a replay pass was triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayTrigger {
    /// Connectivity went from offline to online.
    Reconnected,
    /// Someone asked for a pass explicitly.
    Requested,
}

/// Front half of the scheduler: feeds triggers to the background loop.
///
/// The trigger channel holds a single entry. While a pass is pending, more
/// triggers are dropped, so a burst of reconnects causes one extra pass at
/// most.
pub struct ReplayScheduler {
    trigger_tx: mpsc::Sender<ReplayTrigger>,
    shutdown_tx: watch::Sender<bool>,
    tracker: Arc<ConnectivityTracker>,
    subscription: Mutex<Option<Subscription>>,
}

impl ReplayScheduler {
    /// Create a scheduler that triggers a pass whenever `tracker` reports a
    /// reconnect. Spawn the returned handle's [`ReplaySchedulerHandle::run`].
    pub fn new(tracker: Arc<ConnectivityTracker>) -> (Self, ReplaySchedulerHandle) {
        let (trigger_tx, trigger_rx) = mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let reconnect_tx = trigger_tx.clone();
        let subscription = tracker.on_reconnect(move || {
            if reconnect_tx.try_send(ReplayTrigger::Reconnected).is_err() {
                debug!("Replay already pending, reconnect coalesced");
            }
        });

        let scheduler = Self {
            trigger_tx,
            shutdown_tx,
            tracker,
            subscription: Mutex::new(Some(subscription)),
        };
        let handle = ReplaySchedulerHandle {
            trigger_rx,
            shutdown_rx,
        };

        (scheduler, handle)
    }

    /// Ask for a replay pass.
    ///
    /// # Returns
    /// `false` if a pass was already pending (or the loop is gone) and this
    /// request was folded into it.
    pub fn request_sync(&self) -> bool {
        self.trigger_tx.try_send(ReplayTrigger::Requested).is_ok()
    }

    /// Stop reacting to reconnects and end the background loop.
    ///
    /// A pass already running finishes first.
    pub fn shutdown(&self) {
        self.detach();
        let _ = self.shutdown_tx.send(true);
    }

    fn detach(&self) {
        let taken = self
            .subscription
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(subscription) = taken {
            self.tracker.unsubscribe(subscription);
        }
    }
}

impl Drop for ReplayScheduler {
    fn drop(&mut self) {
        self.detach();
    }
}

/// Background half of the scheduler.
pub struct ReplaySchedulerHandle {
    trigger_rx: mpsc::Receiver<ReplayTrigger>,
    shutdown_rx: watch::Receiver<bool>,
}

impl ReplaySchedulerHandle {
    /// Run the scheduler loop until shutdown.
    ///
    /// This should be spawned in a tokio task. `sync_fn` runs once per
    /// trigger, never concurrently with itself.
    pub async fn run<F, Fut>(mut self, sync_fn: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = SyncReport> + Send,
    {
        info!("Replay scheduler started");

        loop {
            if *self.shutdown_rx.borrow() {
                break;
            }

            tokio::select! {
                biased;

                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        break;
                    }
                }

                trigger = self.trigger_rx.recv() => {
                    let Some(trigger) = trigger else { break };
                    debug!("Replay triggered: {:?}", trigger);

                    let report = sync_fn().await;
                    if report.skipped {
                        debug!("Replay pass skipped");
                    } else if report.attempted > 0 {
                        info!(
                            "Replay pass finished: {} synced, {} failed",
                            report.succeeded, report.failed
                        );
                    }
                }
            }
        }

        info!("Replay scheduler shutting down");
    }
}
