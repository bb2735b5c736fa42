//! The serving side of replication, and an in-process transport to it.
//!
//! `ReplicationEndpoint` answers pull and push requests from peers.
//! `LocalPeer` calls an endpoint directly, which is how nodes running in one
//! process replicate with each other.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use sovereign_contracts::{
    error::{KernelError, KernelResult},
    event::Event,
    replication::PushReport,
};

use crate::{ingest::Ingestor, transport::PeerTransport};

pub struct ReplicationEndpoint {
    ingestor: Arc<Ingestor>,
}

impl ReplicationEndpoint {
    pub fn new(ingestor: Arc<Ingestor>) -> Self {
        Self { ingestor }
    }

    pub fn node_id(&self) -> &str {
        self.ingestor.services().node_id()
    }

    /// Committed events strictly newer than `since`, in (timestamp, id) order.
    pub fn serve_pull(&self, since: Option<DateTime<Utc>>) -> KernelResult<Vec<Event>> {
        let events = self.ingestor.services().events_since(since)?;
        debug!(node_id = %self.node_id(), served = events.len(), "served pull");
        Ok(events)
    }

    /// Ingest events pushed by `from`.
    pub fn serve_push(&self, from: &str, events: Vec<Event>) -> KernelResult<PushReport> {
        let received_count = events.len();
        let report = self.ingestor.ingest_batch(from, events)?;
        Ok(PushReport {
            received_count,
            conflicts_resolved: report.conflicts_resolved(),
        })
    }
}

/// A peer reached by calling its endpoint in-process.
///
/// Reachability and latency can be changed at runtime to simulate
/// partitions and slow links.
pub struct LocalPeer {
    endpoint: Arc<ReplicationEndpoint>,
    caller: String,
    remote: String,
    reachable: AtomicBool,
    delay: Option<Duration>,
}

impl LocalPeer {
    /// A transport from the node `caller` to the node behind `endpoint`.
    pub fn new(caller: impl Into<String>, endpoint: Arc<ReplicationEndpoint>) -> Self {
        let remote = endpoint.node_id().to_string();
        Self {
            endpoint,
            caller: caller.into(),
            remote,
            reachable: AtomicBool::new(true),
            delay: None,
        }
    }

    /// Sleep for `delay` before every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    fn connect(&self) -> KernelResult<()> {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(KernelError::PeerUnreachable {
                node_id: self.remote.clone(),
                reason: "link is down".to_string(),
            })
        }
    }
}

impl PeerTransport for LocalPeer {
    fn node_id(&self) -> &str {
        &self.remote
    }

    fn pull(&self, since: Option<DateTime<Utc>>) -> KernelResult<Vec<Event>> {
        self.connect()?;
        self.endpoint.serve_pull(since)
    }

    fn push(&self, events: Vec<Event>) -> KernelResult<PushReport> {
        self.connect()?;
        self.endpoint.serve_push(&self.caller, events)
    }
}
