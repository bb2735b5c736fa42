//! `HashChainAuditor`: the `Auditor` the kernel runs with.
//!
//! Appending stages the linked entry inside the caller's unit of work, so
//! an entry only becomes part of the chain when the whole unit commits.

use std::ops::RangeInclusive;

use tracing::debug;

use sovereign_contracts::{
    error::KernelResult,
    event::Event,
    ledger::{ChainHead, ChainVerification, LedgerEntry, GENESIS_HASH},
};
use sovereign_core::traits::{Auditor, UnitOfWork};

use crate::chain::{hash_entry, verify_entries, verify_head};

#[derive(Debug, Clone)]
pub struct HashChainAuditor {
    genesis_seed: String,
}

impl HashChainAuditor {
    /// Create an auditor whose first entry links to `genesis_seed`.
    pub fn new(genesis_seed: impl Into<String>) -> Self {
        Self {
            genesis_seed: genesis_seed.into(),
        }
    }

    pub fn genesis_seed(&self) -> &str {
        &self.genesis_seed
    }
}

impl Default for HashChainAuditor {
    fn default() -> Self {
        Self::new(GENESIS_HASH)
    }
}

impl Auditor for HashChainAuditor {
    fn append(&self, uow: &mut dyn UnitOfWork, event: Event) -> KernelResult<LedgerEntry> {
        let (sequence, previous_hash) = match uow.last_entry() {
            Some(last) => (last.sequence + 1, last.hash.clone()),
            None => (1, self.genesis_seed.clone()),
        };
        let hash = hash_entry(sequence, &event, &previous_hash);

        let entry = LedgerEntry {
            sequence,
            event,
            previous_hash,
            hash,
        };
        uow.append_entry(entry.clone())?;

        debug!(
            sequence,
            event_id = %entry.event.id,
            hash = %entry.hash,
            "ledger entry staged"
        );
        Ok(entry)
    }

    fn verify(
        &self,
        entries: &[LedgerEntry],
        range: Option<RangeInclusive<u64>>,
    ) -> ChainVerification {
        verify_entries(entries, &self.genesis_seed, range)
    }

    fn verify_head(&self, entries: &[LedgerEntry], head: &ChainHead) -> Option<u64> {
        verify_head(entries, head)
    }
}
