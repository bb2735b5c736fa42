//! # sovereign-gate
//!
//! A TOML-driven, deny-by-default admission gate in front of the Sovereign
//! dispatcher. Policy, kill switch, and approval workflows live outside the
//! kernel; this crate is where they plug in.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use std::path::Path;
//! use sovereign_gate::TomlCommandGate;
//!
//! let gate = TomlCommandGate::from_file(Path::new("config/gate.toml"))?;
//! let dispatcher = dispatcher.with_gate(Box::new(gate));
//! ```

pub mod engine;
pub mod rule;

pub use engine::TomlCommandGate;
pub use rule::{GatePolicy, GateRule, RuleVerdict};

// ── Tests ─────────────────────────────────────────────────────────────────────
