//! The seam between the coordinator and a remote peer.
//!
//! Calls are blocking. The scheduler runs every peer exchange on the
//! blocking pool under a timeout, so a slow transport never stalls the
//! runtime or another peer.

use chrono::{DateTime, Utc};

use sovereign_contracts::{error::KernelResult, event::Event, replication::PushReport};

pub trait PeerTransport: Send + Sync {
    /// Identity of the peer on the other end.
    fn node_id(&self) -> &str;

    /// Events the peer holds that are strictly newer than `since`.
    ///
    /// Fails with `PeerUnreachable` when the peer cannot be reached.
    fn pull(&self, since: Option<DateTime<Utc>>) -> KernelResult<Vec<Event>>;

    /// Offer `events` to the peer.
    fn push(&self, events: Vec<Event>) -> KernelResult<PushReport>;
}
