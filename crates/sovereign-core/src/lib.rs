//! # sovereign-core
//!
//! The command path and replay engine of the Sovereign event-sourcing kernel.
//!
//! This crate provides:
//! - The trait seams (`Storage`, `UnitOfWork`, `CommandHandler`, `Projector`,
//!   `Auditor`, `PayloadValidator`, `CommandGate`, `ConflictResolver`)
//! - The `Dispatcher` that runs every command inside one unit of work
//! - `KernelServices`, shared by the dispatcher and replication ingest
//! - Replay of the effective history into derived state
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sovereign_core::{Dispatcher, HandlerRegistry, KernelServices};
//!
//! let dispatcher = Dispatcher::new(services, registry, Box::new(validator));
//! let event_id = dispatcher.execute(command)?;
//! ```

pub mod clock;
pub mod dispatcher;
pub mod registry;
pub mod replay;
pub mod services;
pub mod traits;

pub use clock::{Clock, EventIdSource, ManualClock, RandomEventIds, ScriptedEventIds, SystemClock};
pub use dispatcher::Dispatcher;
pub use registry::HandlerRegistry;
pub use services::KernelServices;
