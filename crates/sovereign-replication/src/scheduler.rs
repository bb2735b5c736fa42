//! Periodic replication.
//!
//! Each tick starts one round: every peer is synced concurrently on the
//! blocking pool, under a shared deadline. A peer that misses the deadline
//! has its round cancelled, keeps its cursor, and is retried next tick.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use sovereign_contracts::config::ReplicationConfig;

use crate::coordinator::{ReplicationCoordinator, RoundReport};

/// A source of replication ticks.
pub trait Ticker: Send {
    /// Wait for the next tick. Returns false once no more ticks will come.
    fn tick(&mut self) -> impl Future<Output = bool> + Send;
}

/// Ticks on a fixed period. The first tick fires immediately.
pub struct IntervalTicker {
    interval: Interval,
}

impl IntervalTicker {
    pub fn new(period: Duration) -> Self {
        let mut interval = time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval }
    }
}

impl Ticker for IntervalTicker {
    async fn tick(&mut self) -> bool {
        self.interval.tick().await;
        true
    }
}

/// Ticks only when its handle says so.
pub struct ManualTicker {
    rx: mpsc::UnboundedReceiver<()>,
}

#[derive(Clone)]
pub struct ManualTickerHandle {
    tx: mpsc::UnboundedSender<()>,
}

impl ManualTicker {
    /// The ticker stops once every handle has been dropped and the queued
    /// ticks are drained.
    pub fn channel() -> (ManualTickerHandle, ManualTicker) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ManualTickerHandle { tx }, ManualTicker { rx })
    }
}

impl ManualTickerHandle {
    pub fn tick(&self) {
        let _ = self.tx.send(());
    }
}

impl Ticker for ManualTicker {
    async fn tick(&mut self) -> bool {
        self.rx.recv().await.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerOutcome {
    Synced(RoundReport),
    Failed(String),
    TimedOut,
}

pub struct ReplicationScheduler {
    coordinator: Arc<ReplicationCoordinator>,
    round_timeout: Duration,
}

impl ReplicationScheduler {
    pub fn new(coordinator: Arc<ReplicationCoordinator>, round_timeout: Duration) -> Self {
        Self {
            coordinator,
            round_timeout,
        }
    }

    pub fn from_config(coordinator: Arc<ReplicationCoordinator>, config: &ReplicationConfig) -> Self {
        Self::new(coordinator, Duration::from_millis(config.round_timeout_ms))
    }

    /// Run a round on every tick until `shutdown` is cancelled or the ticker
    /// runs dry. Returns the number of rounds run.
    pub async fn run<T: Ticker>(&self, mut ticker: T, shutdown: CancellationToken) -> usize {
        let mut rounds = 0;
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    debug!("replication scheduler cancelled");
                    break;
                }
                more = ticker.tick() => {
                    if !more {
                        break;
                    }
                }
            }
            self.run_round(&shutdown).await;
            rounds += 1;
        }
        info!(rounds, "replication scheduler stopped");
        rounds
    }

    /// One round with every peer, concurrently, under one deadline.
    pub async fn run_round(&self, shutdown: &CancellationToken) -> Vec<(String, PeerOutcome)> {
        let deadline = Instant::now() + self.round_timeout;

        let tasks: Vec<_> = self
            .coordinator
            .peer_ids()
            .into_iter()
            .map(|peer| {
                let token = shutdown.child_token();
                let coordinator = Arc::clone(&self.coordinator);
                let task_peer = peer.clone();
                let task_token = token.clone();
                let handle = tokio::task::spawn_blocking(move || {
                    coordinator.sync_peer(&task_peer, &task_token)
                });
                (peer, token, handle)
            })
            .collect();

        let mut outcomes = Vec::with_capacity(tasks.len());
        for (peer, token, handle) in tasks {
            let outcome = match time::timeout_at(deadline, handle).await {
                Ok(Ok(Ok(report))) => PeerOutcome::Synced(report),
                Ok(Ok(Err(e))) => PeerOutcome::Failed(e.to_string()),
                Ok(Err(e)) => PeerOutcome::Failed(format!("replication task failed: {}", e)),
                Err(_) => {
                    token.cancel();
                    warn!(peer = %peer, timeout_ms = self.round_timeout.as_millis() as u64, "replication round timed out");
                    PeerOutcome::TimedOut
                }
            };
            outcomes.push((peer, outcome));
        }
        outcomes
    }
}
