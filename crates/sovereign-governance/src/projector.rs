//! The governance projector: the only writer of derived state.
//!
//! One case per known event type. Each case writes exactly one aggregate and
//! bumps its version by one. Aggregate ids are the ids of the events that
//! created them, so independently created aggregates on different nodes
//! never collide.
//!
//! Conflict rows are keyed by what a resolution settles: the contested event
//! id, or the aggregate key for competing writes.

use tracing::{debug, warn};

use sovereign_contracts::{
    derived::{
        BalanceRecord, ConflictRecord, DerivedState, PaymentRecord, PaymentStatus, UserRecord,
    },
    error::{KernelError, KernelResult},
    event::{Event, EventKind},
    replication::Resolution,
};
use sovereign_core::traits::{Projector, UnitOfWork};

use crate::payloads::{self, decode_event};

#[derive(Debug, Default, Clone, Copy)]
pub struct GovernanceProjector;

impl GovernanceProjector {
    pub fn new() -> Self {
        Self
    }
}

fn require_id(event: &Event, field: &str, value: &str) -> KernelResult<()> {
    if value.trim().is_empty() {
        return Err(KernelError::projection(
            &event.id,
            format!("'{}' must not be empty", field),
        ));
    }
    Ok(())
}

fn create_user(state: &mut DerivedState, event: &Event) -> KernelResult<()> {
    let payload: payloads::CreateUser = decode_event(event)?;
    require_id(event, "username", &payload.username)?;

    let user_id = event.id.to_string();
    if state.users.contains_key(&user_id) {
        return Err(KernelError::projection(
            &event.id,
            format!("user '{}' already exists", user_id),
        ));
    }
    state.users.insert(
        user_id.clone(),
        UserRecord {
            user_id,
            username: payload.username,
            email: payload.email,
            version: 1,
            origin_event: event.id.clone(),
            last_event: event.id.clone(),
            updated_at: event.timestamp,
        },
    );
    Ok(())
}

fn update_user_email(state: &mut DerivedState, event: &Event) -> KernelResult<()> {
    let payload: payloads::UpdateUserEmail = decode_event(event)?;
    require_id(event, "user_id", &payload.user_id)?;

    let user = state.users.get_mut(&payload.user_id).ok_or_else(|| {
        KernelError::projection(&event.id, format!("unknown user '{}'", payload.user_id))
    })?;
    user.email = payload.email;
    user.version += 1;
    user.last_event = event.id.clone();
    user.updated_at = event.timestamp;
    Ok(())
}

fn initiate_payment(state: &mut DerivedState, event: &Event) -> KernelResult<()> {
    let payload: payloads::InitiatePayment = decode_event(event)?;
    require_id(event, "user_id", &payload.user_id)?;

    if !state.users.contains_key(&payload.user_id) {
        return Err(KernelError::projection(
            &event.id,
            format!("unknown user '{}'", payload.user_id),
        ));
    }
    if payload.amount <= 0 {
        return Err(KernelError::projection(&event.id, "amount must be positive"));
    }

    let payment_id = event.id.to_string();
    if state.payments.contains_key(&payment_id) {
        return Err(KernelError::projection(
            &event.id,
            format!("payment '{}' already exists", payment_id),
        ));
    }
    state.payments.insert(
        payment_id.clone(),
        PaymentRecord {
            payment_id,
            user_id: payload.user_id,
            amount: payload.amount,
            currency: payload.currency,
            status: PaymentStatus::Pending,
            version: 1,
            origin_event: event.id.clone(),
            last_event: event.id.clone(),
            updated_at: event.timestamp,
        },
    );
    Ok(())
}

fn settle_payment(state: &mut DerivedState, event: &Event) -> KernelResult<()> {
    let payload: payloads::SettlePayment = decode_event(event)?;
    require_id(event, "payment_id", &payload.payment_id)?;

    let payment = state.payments.get_mut(&payload.payment_id).ok_or_else(|| {
        KernelError::projection(&event.id, format!("unknown payment '{}'", payload.payment_id))
    })?;
    if payment.status != PaymentStatus::Pending {
        return Err(KernelError::projection(
            &event.id,
            format!("payment '{}' is already settled", payload.payment_id),
        ));
    }
    payment.status = PaymentStatus::Settled;
    payment.version += 1;
    payment.last_event = event.id.clone();
    payment.updated_at = event.timestamp;
    Ok(())
}

fn post_ledger_entry(state: &mut DerivedState, event: &Event) -> KernelResult<()> {
    let payload: payloads::PostLedgerEntry = decode_event(event)?;
    require_id(event, "account_id", &payload.account_id)?;

    let account = state
        .balances
        .entry(payload.account_id.clone())
        .or_insert_with(|| BalanceRecord {
            account_id: payload.account_id.clone(),
            balance: 0,
            version: 0,
            origin_event: event.id.clone(),
            last_event: event.id.clone(),
            updated_at: event.timestamp,
        });
    account.balance = account.balance.checked_add(payload.amount).ok_or_else(|| {
        KernelError::projection(&event.id, format!("balance of '{}' overflows", payload.account_id))
    })?;
    account.version += 1;
    account.last_event = event.id.clone();
    account.updated_at = event.timestamp;
    Ok(())
}

fn conflict_resolved(state: &mut DerivedState, event: &Event) -> KernelResult<()> {
    let resolution = Resolution::from_payload(&event.payload)
        .map_err(|e| KernelError::projection(&event.id, e.to_string()))?;

    let target = resolution.subject();
    let version = state.conflicts.get(&target).map_or(1, |c| c.version + 1);
    state.conflicts.insert(
        target.clone(),
        ConflictRecord {
            event_id: target,
            accepted_digest: resolution.accepted.content_digest(),
            superseded_digests: resolution
                .superseded
                .iter()
                .map(Event::content_digest)
                .collect(),
            policy: resolution.policy,
            resolution_event: event.id.clone(),
            version,
        },
    );
    Ok(())
}

/// `user:<id>`, `payment:<id>`, or `balance:<account>`.
fn aggregate_key(event: &Event, kind: EventKind) -> KernelResult<Option<String>> {
    Ok(Some(match kind {
        EventKind::CreateUser => format!("user:{}", event.id),
        EventKind::UpdateUserEmail => {
            let payload: payloads::UpdateUserEmail = decode_event(event)?;
            format!("user:{}", payload.user_id)
        }
        EventKind::InitiatePayment => format!("payment:{}", event.id),
        EventKind::SettlePayment => {
            let payload: payloads::SettlePayment = decode_event(event)?;
            format!("payment:{}", payload.payment_id)
        }
        EventKind::PostLedgerEntry => {
            let payload: payloads::PostLedgerEntry = decode_event(event)?;
            format!("balance:{}", payload.account_id)
        }
        EventKind::ConflictResolved => return Ok(None),
    }))
}

impl Projector for GovernanceProjector {
    fn apply(&self, uow: &mut dyn UnitOfWork, event: &Event) -> KernelResult<()> {
        let Some(kind) = event.kind() else {
            debug!(event_id = %event.id, event_type = %event.event_type, "unknown event type; skipped");
            return Ok(());
        };

        let state = uow.derived_mut();
        let result = match kind {
            EventKind::CreateUser => create_user(state, event),
            EventKind::UpdateUserEmail => update_user_email(state, event),
            EventKind::InitiatePayment => initiate_payment(state, event),
            EventKind::SettlePayment => settle_payment(state, event),
            EventKind::PostLedgerEntry => post_ledger_entry(state, event),
            EventKind::ConflictResolved => conflict_resolved(state, event),
        };

        if let Err(e) = &result {
            warn!(event_id = %event.id, event_type = %kind, error = %e, "projection failed");
        }
        result
    }

    fn aggregate(&self, event: &Event) -> Option<String> {
        let kind = event.kind()?;
        aggregate_key(event, kind).ok().flatten()
    }
}
