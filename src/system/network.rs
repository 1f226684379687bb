//! Network reachability monitor
//!
//! Probes connectivity on a background task and publishes path changes through
//! a watch channel. Platform integrations that get reachability callbacks can
//! push them with [`NetworkMonitor::report`] instead of relying on the probe.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Whether a usable network path exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PathStatus {
    /// Nothing observed yet
    Unknown,
    /// A usable route exists
    Satisfied,
    /// No usable route
    Unsatisfied,
}

/// One reachability check
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    async fn check(&self) -> PathStatus;
}

/// Opens a TCP connection to a well-known endpoint
#[derive(Debug, Clone)]
pub struct TcpProbe {
    address: String,
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(address: impl Into<String>, timeout: Duration) -> Self {
        Self {
            address: address.into(),
            timeout,
        }
    }
}

#[async_trait]
impl ReachabilityProbe for TcpProbe {
    async fn check(&self) -> PathStatus {
        match timeout(self.timeout, TcpStream::connect(&self.address)).await {
            Ok(Ok(_)) => PathStatus::Satisfied,
            Ok(Err(e)) => {
                tracing::debug!("Reachability probe to {} failed: {}", self.address, e);
                PathStatus::Unsatisfied
            }
            Err(_) => {
                tracing::debug!("Reachability probe to {} timed out", self.address);
                PathStatus::Unsatisfied
            }
        }
    }
}

/// Observes reachability and fans changes out to subscribers
pub struct NetworkMonitor {
    status: Arc<watch::Sender<PathStatus>>,
    probe: Arc<dyn ReachabilityProbe>,
    period: Duration,
    started: AtomicBool,
    shutdown: CancellationToken,
}

impl NetworkMonitor {
    pub fn new(probe: Arc<dyn ReachabilityProbe>, period: Duration) -> Self {
        let (status, _) = watch::channel(PathStatus::Unknown);
        Self {
            status: Arc::new(status),
            probe,
            period,
            started: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        }
    }

    /// Begin probing on a background task. Later calls are no-ops.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> bool {
        if self.started.swap(true, Ordering::SeqCst) {
            return false;
        }

        let status = Arc::clone(&self.status);
        let probe = Arc::clone(&self.probe);
        let shutdown = self.shutdown.clone();
        let period = self.period;

        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let observed = probe.check().await;
                        publish(&status, observed);
                    }
                }
            }
            tracing::debug!("Network monitor stopped");
        });

        tracing::info!("Network monitor started (every {:?})", self.period);
        true
    }

    /// Stop the background probe.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    /// Record an externally observed path status.
    pub fn report(&self, observed: PathStatus) {
        publish(&self.status, observed);
    }

    pub fn status(&self) -> PathStatus {
        *self.status.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<PathStatus> {
        self.status.subscribe()
    }
}

impl Drop for NetworkMonitor {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn publish(status: &watch::Sender<PathStatus>, observed: PathStatus) {
    let changed = status.send_if_modified(|current| {
        if *current == observed {
            return false;
        }
        *current = observed;
        true
    });
    if changed {
        match observed {
            PathStatus::Unsatisfied => tracing::warn!("Network path lost"),
            PathStatus::Satisfied => tracing::info!("Network path available"),
            PathStatus::Unknown => {}
        }
    }
}
