//! Command handlers of the governance domain.
//!
//! Handlers only read derived state. Each checks that referenced aggregates
//! exist, then drafts an event whose causality chain names the event that
//! created every aggregate it touches.

use sovereign_contracts::{
    command::{Command, CommandKind, EventDraft},
    derived::PaymentStatus,
    error::{KernelError, KernelResult},
    event::EventKind,
    validation::PayloadSchema,
};
use sovereign_core::traits::{CommandHandler, UnitOfWork};

use crate::{payloads, schemas};

fn invalid(reason: impl Into<String>) -> KernelError {
    KernelError::Validation {
        reason: reason.into(),
    }
}

// ── Users ─────────────────────────────────────────────────────────────────────

pub struct CreateUserHandler;

impl CommandHandler for CreateUserHandler {
    fn kind(&self) -> CommandKind {
        CommandKind::CreateUser
    }

    fn schema(&self) -> PayloadSchema {
        schemas::create_user()
    }

    fn validate(&self, command: &Command) -> KernelResult<()> {
        payloads::decode_command::<payloads::CreateUser>(&command.payload).map(|_| ())
    }

    fn handle(&self, command: &Command, uow: &dyn UnitOfWork) -> KernelResult<EventDraft> {
        let payload: payloads::CreateUser = payloads::decode_command(&command.payload)?;

        let taken = uow
            .derived()
            .users
            .values()
            .any(|user| user.username == payload.username);
        if taken {
            return Err(invalid(format!(
                "username '{}' is already taken",
                payload.username
            )));
        }

        Ok(EventDraft::new(
            EventKind::CreateUser,
            payloads::encode(&payload)?,
        ))
    }
}

pub struct UpdateUserEmailHandler;

impl CommandHandler for UpdateUserEmailHandler {
    fn kind(&self) -> CommandKind {
        CommandKind::UpdateUserEmail
    }

    fn schema(&self) -> PayloadSchema {
        schemas::update_user_email()
    }

    fn validate(&self, command: &Command) -> KernelResult<()> {
        payloads::decode_command::<payloads::UpdateUserEmail>(&command.payload).map(|_| ())
    }

    fn handle(&self, command: &Command, uow: &dyn UnitOfWork) -> KernelResult<EventDraft> {
        let payload: payloads::UpdateUserEmail = payloads::decode_command(&command.payload)?;

        let user = uow
            .derived()
            .users
            .get(&payload.user_id)
            .ok_or_else(|| invalid(format!("unknown user '{}'", payload.user_id)))?;
        let origin = user.origin_event.clone();

        Ok(EventDraft::new(EventKind::UpdateUserEmail, payloads::encode(&payload)?)
            .caused_by(origin))
    }
}

// ── Payments ──────────────────────────────────────────────────────────────────

pub struct InitiatePaymentHandler;

impl CommandHandler for InitiatePaymentHandler {
    fn kind(&self) -> CommandKind {
        CommandKind::InitiatePayment
    }

    fn schema(&self) -> PayloadSchema {
        schemas::initiate_payment()
    }

    fn validate(&self, command: &Command) -> KernelResult<()> {
        let payload: payloads::InitiatePayment = payloads::decode_command(&command.payload)?;
        if payload.amount <= 0 {
            return Err(invalid("amount must be positive"));
        }
        Ok(())
    }

    fn handle(&self, command: &Command, uow: &dyn UnitOfWork) -> KernelResult<EventDraft> {
        let payload: payloads::InitiatePayment = payloads::decode_command(&command.payload)?;

        let user = uow
            .derived()
            .users
            .get(&payload.user_id)
            .ok_or_else(|| invalid(format!("unknown user '{}'", payload.user_id)))?;
        let origin = user.origin_event.clone();

        Ok(EventDraft::new(EventKind::InitiatePayment, payloads::encode(&payload)?)
            .caused_by(origin))
    }
}

pub struct SettlePaymentHandler;

impl CommandHandler for SettlePaymentHandler {
    fn kind(&self) -> CommandKind {
        CommandKind::SettlePayment
    }

    fn schema(&self) -> PayloadSchema {
        schemas::settle_payment()
    }

    fn validate(&self, command: &Command) -> KernelResult<()> {
        payloads::decode_command::<payloads::SettlePayment>(&command.payload).map(|_| ())
    }

    fn handle(&self, command: &Command, uow: &dyn UnitOfWork) -> KernelResult<EventDraft> {
        let payload: payloads::SettlePayment = payloads::decode_command(&command.payload)?;

        let payment = uow
            .derived()
            .payments
            .get(&payload.payment_id)
            .ok_or_else(|| invalid(format!("unknown payment '{}'", payload.payment_id)))?;
        if payment.status != PaymentStatus::Pending {
            return Err(invalid(format!(
                "payment '{}' is not pending",
                payload.payment_id
            )));
        }
        let origin = payment.origin_event.clone();

        Ok(EventDraft::new(EventKind::SettlePayment, payloads::encode(&payload)?)
            .caused_by(origin))
    }
}

// ── Ledger balances ───────────────────────────────────────────────────────────

pub struct PostLedgerEntryHandler;

impl CommandHandler for PostLedgerEntryHandler {
    fn kind(&self) -> CommandKind {
        CommandKind::PostLedgerEntry
    }

    fn schema(&self) -> PayloadSchema {
        schemas::post_ledger_entry()
    }

    fn validate(&self, command: &Command) -> KernelResult<()> {
        let payload: payloads::PostLedgerEntry = payloads::decode_command(&command.payload)?;
        if payload.amount == 0 {
            return Err(invalid("amount must not be zero"));
        }
        Ok(())
    }

    fn handle(&self, command: &Command, uow: &dyn UnitOfWork) -> KernelResult<EventDraft> {
        let payload: payloads::PostLedgerEntry = payloads::decode_command(&command.payload)?;

        let draft = EventDraft::new(EventKind::PostLedgerEntry, payloads::encode(&payload)?);
        Ok(match uow.derived().balances.get(&payload.account_id) {
            Some(account) => draft.caused_by(account.origin_event.clone()),
            None => draft,
        })
    }
}
