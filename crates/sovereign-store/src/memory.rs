//! In-memory implementation of `Storage`.
//!
//! `MemoryStore` keeps committed state in an `Arc` snapshot behind a `Mutex`
//! that is only held long enough to clone the `Arc` or to publish a commit.
//! A unit of work reads from the snapshot it began with and stages its
//! writes in an overlay. On `commit()` the overlay is published only if no
//! other unit committed in between; otherwise the unit fails with
//! `WriteConflict` and its writes are dropped. Dropping the unit without
//! committing discards the overlay as well.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tracing::debug;

use sovereign_contracts::{
    derived::DerivedState,
    error::{KernelError, KernelResult},
    event::{Event, EventId},
    ledger::{ChainHead, LedgerEntry},
};
use sovereign_core::traits::{Storage, UnitOfWork};

// ── Internal state ────────────────────────────────────────────────────────────

#[derive(Default, Clone)]
pub(crate) struct StoreState {
    /// Committed entries, in sequence order.
    pub(crate) entries: Vec<LedgerEntry>,

    /// Event id → position in `entries`.
    pub(crate) index: HashMap<EventId, usize>,

    pub(crate) derived: DerivedState,

    /// Bumped by every commit that changed something.
    pub(crate) revision: u64,

    /// Last entry committed through a unit of work. Raw edits leave it alone.
    pub(crate) head: Option<ChainHead>,
}

impl StoreState {
    fn reindex(&mut self) {
        self.index = self
            .entries
            .iter()
            .enumerate()
            .map(|(pos, entry)| (entry.event.id.clone(), pos))
            .collect();
    }
}

// ── Public store ──────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<Arc<StoreState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> KernelResult<MutexGuard<'_, Arc<StoreState>>> {
        self.state
            .lock()
            .map_err(|e| KernelError::storage(format!("store lock poisoned: {}", e)))
    }

    /// The committed state as of now. The lock is released on return.
    fn snapshot(&self) -> KernelResult<Arc<StoreState>> {
        Ok(Arc::clone(&*self.lock()?))
    }

    /// Number of committed ledger entries.
    pub fn len(&self) -> KernelResult<usize> {
        Ok(self.snapshot()?.entries.len())
    }

    pub fn is_empty(&self) -> KernelResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Edit committed entries directly, bypassing every kernel check.
    ///
    /// Stands in for someone with raw access to the storage medium; the
    /// auditor is expected to notice.
    pub fn tamper_with<F>(&self, edit: F) -> KernelResult<()>
    where
        F: FnOnce(&mut Vec<LedgerEntry>),
    {
        let mut guard = self.lock()?;
        let state = Arc::make_mut(&mut guard);
        edit(&mut state.entries);
        state.reindex();
        state.revision += 1;
        Ok(())
    }
}

impl Storage for MemoryStore {
    fn begin(&self) -> KernelResult<Box<dyn UnitOfWork + '_>> {
        Ok(Box::new(MemoryUnitOfWork {
            store: self,
            base: self.snapshot()?,
            staged: Vec::new(),
            staged_index: HashMap::new(),
            derived: None,
        }))
    }

    fn entries(&self) -> KernelResult<Vec<LedgerEntry>> {
        Ok(self.snapshot()?.entries.clone())
    }

    fn head(&self) -> KernelResult<Option<ChainHead>> {
        Ok(self.snapshot()?.head.clone())
    }

    fn events_since(&self, since: Option<DateTime<Utc>>) -> KernelResult<Vec<Event>> {
        let state = self.snapshot()?;
        let mut events: Vec<Event> = state
            .entries
            .iter()
            .filter(|entry| since.map_or(true, |s| entry.event.timestamp > s))
            .map(|entry| entry.event.clone())
            .collect();
        events.sort_by(|a, b| a.order_key().cmp(&b.order_key()));
        Ok(events)
    }

    fn derived_snapshot(&self) -> KernelResult<DerivedState> {
        Ok(self.snapshot()?.derived.clone())
    }
}

// ── Unit of work ──────────────────────────────────────────────────────────────

pub struct MemoryUnitOfWork<'a> {
    store: &'a MemoryStore,
    /// Committed state as of `begin()`.
    base: Arc<StoreState>,
    staged: Vec<LedgerEntry>,
    staged_index: HashMap<EventId, usize>,
    /// Copy-on-write: cloned from the committed tables on first mutation.
    derived: Option<DerivedState>,
}

impl UnitOfWork for MemoryUnitOfWork<'_> {
    fn find_entry(&self, id: &EventId) -> Option<&LedgerEntry> {
        if let Some(&pos) = self.staged_index.get(id) {
            return self.staged.get(pos);
        }
        self.base
            .index
            .get(id)
            .and_then(|&pos| self.base.entries.get(pos))
    }

    fn last_entry(&self) -> Option<&LedgerEntry> {
        self.staged.last().or_else(|| self.base.entries.last())
    }

    fn entries(&self) -> Vec<LedgerEntry> {
        self.base
            .entries
            .iter()
            .chain(self.staged.iter())
            .cloned()
            .collect()
    }
    fn append_entry(&mut self, entry: LedgerEntry) -> KernelResult<()> {
        let expected = self.last_entry().map_or(1, |last| last.sequence + 1);
        if entry.sequence != expected {
            return Err(KernelError::storage(format!(
                "entry sequence {} out of order, expected {}",
                entry.sequence, expected
            )));
        }
        if self.find_entry(&entry.event.id).is_some() {
            return Err(KernelError::storage(format!(
                "event '{}' is already in the ledger",
                entry.event.id
            )));
        }
        self.staged_index
            .insert(entry.event.id.clone(), self.staged.len());
        self.staged.push(entry);
        Ok(())
    }

    fn derived(&self) -> &DerivedState {
        self.derived.as_ref().unwrap_or(&self.base.derived)
    }

    fn derived_mut(&mut self) -> &mut DerivedState {
        let committed = &self.base.derived;
        self.derived.get_or_insert_with(|| committed.clone())
    }

    fn commit(self: Box<Self>) -> KernelResult<()> {
        let MemoryUnitOfWork {
            store,
            base,
            staged,
            derived,
            ..
        } = *self;
        if staged.is_empty() && derived.is_none() {
            return Ok(());
        }

        let mut guard = store.lock()?;
        if guard.revision != base.revision {
            return Err(KernelError::WriteConflict {
                reason: format!(
                    "store moved from revision {} to {} while the unit was open",
                    base.revision, guard.revision
                ),
            });
        }
        // Without our reference the state is usually unshared, so no copy.
        drop(base);

        let state = Arc::make_mut(&mut guard);
        let appended = staged.len();
        for entry in staged {
            state.head = Some(ChainHead::of(&entry));
            state.index.insert(entry.event.id.clone(), state.entries.len());
            state.entries.push(entry);
        }
        if let Some(derived) = derived {
            state.derived = derived;
        }
        state.revision += 1;

        debug!(
            appended,
            total = state.entries.len(),
            revision = state.revision,
            "unit of work committed"
        );
        Ok(())
    }
}
