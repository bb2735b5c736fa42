//! # sovereign-contracts
//!
//! Shared types, configuration, and error contracts for the Sovereign
//! event-sourcing kernel.
//!
//! All crates in the workspace import from here. No business logic lives in
//! this crate, only data definitions, their canonical digests, and error types.

pub mod command;
pub mod config;
pub mod derived;
pub mod error;
pub mod event;
pub mod gate;
pub mod ledger;
pub mod replication;
pub mod validation;
