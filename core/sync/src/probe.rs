//! Periodic reachability probe feeding a [`ConnectivityTracker`].

use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};
use url::Url;

use stocksync_common::{Error, Result};

use crate::config::ProbeConfig;
use crate::connectivity::ConnectivityTracker;

/// Pings a URL and reports the outcome to a tracker.
///
/// Any HTTP response, whatever its status, counts as reachable. Only a
/// transport failure or a timeout counts as offline.
pub struct ConnectivityProbe {
    http: Client,
    url: Url,
    interval: Duration,
    tracker: Arc<ConnectivityTracker>,
}

impl ConnectivityProbe {
    /// # Errors
    /// - The probe URL is invalid
    /// - The HTTP client cannot be built
    pub fn new(config: &ProbeConfig, tracker: Arc<ConnectivityTracker>) -> Result<Self> {
        let url = Url::parse(&config.url)
            .map_err(|e| Error::InvalidInput(format!("Invalid probe URL {}: {}", config.url, e)))?;

        let http = Client::builder()
            .timeout(config.timeout)
            .user_agent("StockSync/0.1")
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            url,
            interval: config.interval,
            tracker,
        })
    }

    /// Probe without touching the tracker.
    pub async fn check(&self) -> bool {
        match self.http.get(self.url.clone()).send().await {
            Ok(response) => {
                debug!("Probe answered with {}", response.status());
                true
            }
            Err(e) => {
                debug!("Probe failed: {}", e);
                false
            }
        }
    }

    /// Probe once and report the result.
    pub async fn check_once(&self) -> bool {
        let reachable = self.check().await;
        self.tracker.report(reachable);
        reachable
    }

    /// Probe right away, then every interval, until the handle is stopped.
    pub fn spawn(self) -> ProbeHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(self.run(shutdown_rx));
        ProbeHandle { shutdown_tx, task }
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Connectivity probe started ({:?} interval)", self.interval);

        loop {
            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }

                _ = ticker.tick() => {
                    self.check_once().await;
                }
            }
        }

        info!("Connectivity probe stopped");
    }
}

/// Control handle of a spawned probe.
pub struct ProbeHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ProbeHandle {
    /// Stop probing and wait for the loop to exit.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.task.await;
    }
}
