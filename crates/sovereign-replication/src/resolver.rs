//! Conflict resolvers.
//!
//! Both resolvers only ever produce a `Resolution`. Recording it as an event
//! is the ingestor's job, and the conflicting events themselves are never
//! touched.

use tracing::{debug, warn};

use sovereign_contracts::{
    error::{KernelError, KernelResult},
    event::Event,
    replication::Resolution,
};
use sovereign_core::traits::ConflictResolver;

fn resolution_error(reason: impl Into<String>) -> KernelError {
    KernelError::Resolution {
        reason: reason.into(),
    }
}

/// Candidates either claim one identity or compete for one aggregate; the
/// caller gathers them, so only emptiness is checked here.
fn check_candidates(candidates: &[Event]) -> KernelResult<()> {
    if candidates.is_empty() {
        return Err(resolution_error("no candidates to resolve"));
    }
    Ok(())
}

/// Index of the latest validly signed candidate by (timestamp, id, content digest).
fn latest_valid(candidates: &[Event]) -> Option<usize> {
    candidates
        .iter()
        .enumerate()
        .filter(|(_, c)| c.verify_signature())
        .max_by(|(_, a), (_, b)| {
            a.order_key()
                .cmp(&b.order_key())
                .then_with(|| a.content_digest().cmp(&b.content_digest()))
        })
        .map(|(i, _)| i)
}

/// Build the verdict naming `candidates[winner]` as accepted.
///
/// Superseded versions are deduplicated and sorted by content digest, so the
/// same conflict always yields the same payload.
fn verdict(
    candidates: &[Event],
    winner: usize,
    policy: &str,
    rationale: Option<String>,
) -> Resolution {
    let accepted = candidates[winner].clone();
    let accepted_digest = accepted.content_digest();

    let mut superseded: Vec<(String, Event)> = candidates
        .iter()
        .map(|c| (c.content_digest(), c.clone()))
        .filter(|(digest, _)| digest != &accepted_digest)
        .collect();
    superseded.sort_by(|a, b| a.0.cmp(&b.0));
    superseded.dedup_by(|a, b| a.0 == b.0);

    Resolution {
        accepted,
        superseded: superseded.into_iter().map(|(_, e)| e).collect(),
        policy: policy.to_string(),
        rationale,
        aggregate: None,
    }
}

// ── Last write wins ───────────────────────────────────────────────────────────

/// The default policy: the latest validly signed version wins.
///
/// Versions whose signature does not match their content are never accepted.
#[derive(Debug, Default, Clone, Copy)]
pub struct LastWriteWins;

impl LastWriteWins {
    pub const POLICY: &'static str = "last-write-wins";
}

impl ConflictResolver for LastWriteWins {
    fn policy(&self) -> &'static str {
        Self::POLICY
    }

    fn resolve(&self, conflicting: &[Event]) -> KernelResult<Resolution> {
        check_candidates(conflicting)?;
        let winner = latest_valid(conflicting).ok_or_else(|| {
            resolution_error(format!(
                "no version of '{}' carries a valid signature",
                conflicting[0].id
            ))
        })?;
        debug!(
            event_id = %conflicting[winner].id,
            candidates = conflicting.len(),
            "latest write selected"
        );
        Ok(verdict(conflicting, winner, Self::POLICY, None))
    }
}

// ── Delegated arbitration ─────────────────────────────────────────────────────

/// What an external arbiter answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArbiterVerdict {
    /// Index into the candidate slice.
    pub chosen: usize,
    pub rationale: String,
}

/// An advisory service the resolver can defer to.
pub trait Arbiter: Send + Sync {
    fn arbitrate(&self, candidates: &[Event]) -> KernelResult<ArbiterVerdict>;
}

/// Defers the pick to an `Arbiter` and records its rationale.
///
/// An arbiter error, an out-of-range pick, or a pick whose signature does not
/// verify is a `Resolution` error; the conflict stays open for the next round.
pub struct ArbitratedResolver<A: Arbiter> {
    arbiter: A,
}

impl<A: Arbiter> ArbitratedResolver<A> {
    pub const POLICY: &'static str = "arbitrated";

    pub fn new(arbiter: A) -> Self {
        Self { arbiter }
    }
}

impl<A: Arbiter> ConflictResolver for ArbitratedResolver<A> {
    fn policy(&self) -> &'static str {
        Self::POLICY
    }

    fn resolve(&self, conflicting: &[Event]) -> KernelResult<Resolution> {
        check_candidates(conflicting)?;

        let answer = self.arbiter.arbitrate(conflicting).map_err(|e| {
            warn!(event_id = %conflicting[0].id, error = %e, "arbiter failed");
            resolution_error(format!("arbiter failed: {}", e))
        })?;

        let Some(chosen) = conflicting.get(answer.chosen) else {
            return Err(resolution_error(format!(
                "arbiter chose candidate {} of {}",
                answer.chosen,
                conflicting.len()
            )));
        };
        if !chosen.verify_signature() {
            return Err(resolution_error(format!(
                "arbiter chose a version of '{}' whose signature does not verify",
                chosen.id
            )));
        }

        Ok(verdict(
            conflicting,
            answer.chosen,
            Self::POLICY,
            Some(answer.rationale),
        ))
    }
}

/// Prefers versions signed by one authority node.
///
/// Without an authority candidate it falls back to the latest valid write.
#[derive(Debug, Clone)]
pub struct PreferredOriginArbiter {
    authority: String,
}

impl PreferredOriginArbiter {
    pub fn new(authority: impl Into<String>) -> Self {
        Self {
            authority: authority.into(),
        }
    }
}

impl Arbiter for PreferredOriginArbiter {
    fn arbitrate(&self, candidates: &[Event]) -> KernelResult<ArbiterVerdict> {
        let from_authority: Vec<Event> = candidates
            .iter()
            .filter(|c| c.origin() == Some(self.authority.as_str()))
            .cloned()
            .collect();

        if let Some(pick) = latest_valid(&from_authority) {
            let digest = from_authority[pick].content_digest();
            let chosen = candidates
                .iter()
                .position(|c| c.content_digest() == digest && c.verify_signature())
                .ok_or_else(|| resolution_error("authority candidate vanished"))?;
            return Ok(ArbiterVerdict {
                chosen,
                rationale: format!("signed by authority '{}'", self.authority),
            });
        }

        let chosen = latest_valid(candidates).ok_or_else(|| {
            resolution_error("no candidate carries a valid signature")
        })?;
        Ok(ArbiterVerdict {
            chosen,
            rationale: format!(
                "no candidate from authority '{}'; latest write kept",
                self.authority
            ),
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
