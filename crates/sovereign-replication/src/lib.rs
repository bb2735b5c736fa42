//! # sovereign-replication
//!
//! Multi-node replication for the Sovereign kernel.
//!
//! Nodes exchange events over a `PeerTransport` in rounds of pull then push.
//! Received events go through the `Ingestor`, which appends new events,
//! drops duplicates, holds events whose causal dependencies have not arrived,
//! and hands conflicts to a `ConflictResolver`: two versions of one
//! identifier, or a remote write that cannot be projected because local
//! writes to the same aggregate got there first. A resolver's
//! verdict is recorded as a `ConflictResolvedEvent` with a deterministic id,
//! so nodes that settle the same conflict independently record it once.
//!
//! The `ReplicationScheduler` drives rounds from a `Ticker` on the tokio
//! runtime, with a per-peer deadline and cooperative cancellation.

pub mod coordinator;
pub mod endpoint;
pub mod ingest;
pub mod resolver;
pub mod scheduler;
pub mod transport;

pub use coordinator::{PeerState, ReplicationCoordinator, RoundReport};
pub use endpoint::{LocalPeer, ReplicationEndpoint};
pub use ingest::{IngestOutcome, IngestReport, Ingestor};
pub use resolver::{
    Arbiter, ArbiterVerdict, ArbitratedResolver, LastWriteWins, PreferredOriginArbiter,
};
pub use scheduler::{
    IntervalTicker, ManualTicker, ManualTickerHandle, PeerOutcome, ReplicationScheduler, Ticker,
};
pub use transport::PeerTransport;

// ── Tests ─────────────────────────────────────────────────────────────────────
