//! Periodic background reconciliation.
//!
//! Consent and catalog each get their own loop, so a slow or failing pass on
//! one target never delays the other. A loop sleeps for the interval, runs one
//! pass, and repeats until the stop signal flips. The first pass comes one
//! interval after start because startup has just reconciled both caches.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::repos::StoreError;
use super::sync::Synchronizer;

pub struct BackgroundSync {
    stop: watch::Sender<bool>,
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl BackgroundSync {
    pub fn start(sync: Arc<Synchronizer>, interval: Duration) -> Self {
        let (stop, stop_rx) = watch::channel(false);

        let consent_sync = Arc::clone(&sync);
        let consent = spawn_loop("consent", interval, stop_rx.clone(), move || {
            let sync = Arc::clone(&consent_sync);
            async move { sync.sync_consent().await.map(drop) }
        });

        let catalog = spawn_loop("catalog", interval, stop_rx, move || {
            let sync = Arc::clone(&sync);
            async move { sync.sync_catalog().await.map(drop) }
        });

        info!(
            interval_secs = interval.as_secs(),
            "Background synchronization started"
        );
        Self {
            stop,
            handles: vec![("consent", consent), ("catalog", catalog)],
        }
    }

    /// Signal both loops and wait for them to finish.
    ///
    /// A loop that is sleeping wakes up at once. A pass that is already
    /// running completes first; its cache mutation is applied whole or not at all.
    pub async fn stop(self) {
        // Receivers only disappear when their loop has already exited.
        let _ = self.stop.send(true);
        for (target, handle) in self.handles {
            if let Err(err) = handle.await {
                warn!(target_name = target, error = %err, "Background sync loop ended abnormally");
            }
        }
        info!("Background synchronization stopped");
    }
}

fn spawn_loop<F, Fut>(
    target: &'static str,
    interval: Duration,
    mut stop: watch::Receiver<bool>,
    mut pass: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), StoreError>> + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            if *stop.borrow_and_update() {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                    continue;
                }
            }
            // Failures are logged by the synchronizer; the next tick retries.
            if pass().await.is_err() {
                debug!(target_name = target, "Background pass failed, retrying next interval");
            }
        }
        debug!(target_name = target, "Background sync loop exited");
    })
}
