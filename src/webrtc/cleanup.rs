//! Periodic eviction of stale viewers and idle capture sessions

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::manager::PeerSessionManager;
use crate::capture::CaptureManager;
use crate::events::EventBus;

/// Outcome of one cleanup cycle
#[derive(Debug, Clone, Default)]
pub struct CleanupReport {
    /// Viewers whose peer session was torn down
    pub evicted: Vec<String>,
    /// Devices whose idle capture session was released
    pub reaped: Vec<String>,
    /// Teardowns that panicked
    pub errors: usize,
}

impl CleanupReport {
    pub fn is_empty(&self) -> bool {
        self.evicted.is_empty() && self.reaped.is_empty() && self.errors == 0
    }
}

/// Background cleanup task
pub struct CleanupLoop {
    peers: Arc<PeerSessionManager>,
    capture: Arc<CaptureManager>,
    events: Arc<EventBus>,
    interval: Duration,
}

impl CleanupLoop {
    pub fn new(
        peers: Arc<PeerSessionManager>,
        capture: Arc<CaptureManager>,
        events: Arc<EventBus>,
        interval: Duration,
    ) -> Self {
        Self {
            peers,
            capture,
            events,
            interval,
        }
    }

    /// Run a single cycle
    pub async fn run_once(&self) -> CleanupReport {
        let mut report = CleanupReport::default();
        let mut tasks = JoinSet::new();

        for session in self.peers.sessions() {
            let Some(reason) = self.peers.expiry_reason(&session) else {
                continue;
            };
            debug!(
                "Evicting peer session of {} ({})",
                session.viewer_id(),
                reason
            );
            let peers = self.peers.clone();
            tasks.spawn(async move {
                peers
                    .close_session(&session, reason)
                    .await
                    .then(|| session.viewer_id().to_string())
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Some(viewer_id)) => report.evicted.push(viewer_id),
                Ok(None) => {}
                Err(e) => {
                    report.errors += 1;
                    warn!("Peer session teardown failed: {}", e);
                    self.events
                        .error("cleanup", format!("peer session teardown failed: {}", e));
                }
            }
        }

        report.reaped = self.capture.reap_idle().await;

        if !report.is_empty() {
            info!(
                "Cleanup: {} viewers evicted, {} capture sessions released, {} errors",
                report.evicted.len(),
                report.reaped.len(),
                report.errors
            );
        }
        report
    }

    /// Run until cancelled; a cycle in flight is completed first
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        info!("Cleanup loop started (every {:?})", self.interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.run_once().await;
                }
            }
        }
        info!("Cleanup loop stopped");
    }
}
