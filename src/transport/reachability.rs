//! Network reachability probe
//!
//! A probe is a short TCP connect to a well-known host. The monitor keeps the
//! last result so callers that only need a cheap answer can read it without
//! touching the network, and logs each online/offline edge once.

use crate::observability::metrics;
use crate::transport::Reachability;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Edge between two consecutive probe results
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    WentOnline,
    WentOffline,
}

/// TCP-connect reachability monitor
#[derive(Debug)]
pub struct ReachabilityMonitor {
    host: String,
    port: u16,
    timeout: Duration,
    online: AtomicBool,
}

impl ReachabilityMonitor {
    /// Create a monitor. The network is assumed offline until the first probe.
    pub fn new(host: impl Into<String>, port: u16, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            timeout,
            online: AtomicBool::new(false),
        }
    }

    pub fn target(&self) -> (&str, u16) {
        (&self.host, self.port)
    }

    /// Store a probe result, returning the edge if the state changed
    pub fn record(&self, online: bool) -> Option<Transition> {
        let previous = self.online.swap(online, Ordering::SeqCst);
        metrics().network_probed(online);
        match (previous, online) {
            (false, true) => Some(Transition::WentOnline),
            (true, false) => Some(Transition::WentOffline),
            _ => None,
        }
    }

    async fn try_connect(&self) -> Result<(), String> {
        let address = (self.host.as_str(), self.port);
        match tokio::time::timeout(self.timeout, TcpStream::connect(address)).await {
            Ok(Ok(stream)) => {
                drop(stream);
                Ok(())
            }
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("timed out after {:?}", self.timeout)),
        }
    }
}

#[async_trait::async_trait]
impl Reachability for ReachabilityMonitor {
    async fn probe(&self) -> bool {
        let outcome = self.try_connect().await;
        let online = outcome.is_ok();

        match (self.record(online), outcome) {
            (Some(Transition::WentOnline), _) => {
                info!(host = %self.host, port = self.port, "Network reachable");
            }
            (Some(Transition::WentOffline), Err(reason)) => {
                warn!(host = %self.host, port = self.port, reason = %reason, "Network unreachable");
            }
            (_, Err(reason)) => {
                debug!(host = %self.host, port = self.port, reason = %reason, "Network still unreachable");
            }
            (_, Ok(())) => {
                debug!(host = %self.host, port = self.port, "Network probe succeeded");
            }
        }

        online
    }

    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}
