//! Derived (projected) state records.
//!
//! Every record carries a `version` equal to the number of events applied to
//! it since genesis. All tables are `BTreeMap`s so a snapshot serializes the
//! same way every time, which is what makes replay comparisons bit-exact.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::event::EventId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub user_id: String,
    pub username: String,
    pub email: String,
    pub version: u64,
    /// The event that created this user.
    pub origin_event: EventId,
    /// The most recent event applied to this user.
    pub last_event: EventId,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Settled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub payment_id: String,
    pub user_id: String,
    /// Minor currency units.
    pub amount: i64,
    pub currency: String,
    pub status: PaymentStatus,
    pub version: u64,
    pub origin_event: EventId,
    pub last_event: EventId,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceRecord {
    pub account_id: String,
    /// Minor currency units.
    pub balance: i64,
    pub version: u64,
    pub origin_event: EventId,
    pub last_event: EventId,
    pub updated_at: DateTime<Utc>,
}

/// The recorded outcome for one contested event identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub event_id: EventId,
    pub accepted_digest: String,
    pub superseded_digests: Vec<String>,
    pub policy: String,
    pub resolution_event: EventId,
    pub version: u64,
}

/// All read-optimized state derived from the ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedState {
    pub users: BTreeMap<String, UserRecord>,
    pub payments: BTreeMap<String, PaymentRecord>,
    pub balances: BTreeMap<String, BalanceRecord>,
    pub conflicts: BTreeMap<EventId, ConflictRecord>,
}

impl DerivedState {
    pub fn clear(&mut self) {
        *self = DerivedState::default();
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
            && self.payments.is_empty()
            && self.balances.is_empty()
            && self.conflicts.is_empty()
    }

    /// Number of rows across every table.
    pub fn row_count(&self) -> usize {
        self.users.len() + self.payments.len() + self.balances.len() + self.conflicts.len()
    }

    /// SHA-256 (hex) over the canonical JSON of the whole snapshot.
    ///
    /// # Panics
    ///
    /// Panics if the snapshot cannot be serialized, which cannot happen for
    /// these plain data types.
    pub fn digest(&self) -> String {
        let bytes = serde_json::to_vec(self).expect("derived state must always be serializable");
        hex::encode(Sha256::digest(&bytes))
    }
}
