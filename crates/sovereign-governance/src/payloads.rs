//! Typed payloads of the governance commands and events.
//!
//! A command payload and the payload of the event it produces share one
//! shape. Handlers decode into these types and re-encode, so the ledger only
//! ever stores the normalized form.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use sovereign_contracts::{
    error::{KernelError, KernelResult},
    event::Event,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateUser {
    pub username: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateUserEmail {
    pub user_id: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitiatePayment {
    pub user_id: String,
    /// Minor currency units, strictly positive.
    pub amount: i64,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlePayment {
    pub payment_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostLedgerEntry {
    pub account_id: String,
    /// Signed minor currency units; never zero.
    pub amount: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memo: Option<String>,
}

/// Decode a command payload; failures are validation errors.
pub fn decode_command<T: DeserializeOwned>(payload: &Value) -> KernelResult<T> {
    serde_json::from_value(payload.clone()).map_err(|e| KernelError::Validation {
        reason: format!("malformed payload: {}", e),
    })
}

/// Decode an event payload; failures are projection errors.
pub fn decode_event<T: DeserializeOwned>(event: &Event) -> KernelResult<T> {
    serde_json::from_value(event.payload.clone())
        .map_err(|e| KernelError::projection(&event.id, format!("malformed payload: {}", e)))
}

pub fn encode<T: Serialize>(payload: &T) -> KernelResult<Value> {
    serde_json::to_value(payload).map_err(|e| KernelError::Validation {
        reason: format!("payload cannot be encoded: {}", e),
    })
}
