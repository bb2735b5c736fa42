//! # sovereign-validate
//!
//! Command payload validation for the Sovereign kernel.
//!
//! [`engine::SchemaValidator`] implements
//! [`sovereign_core::traits::PayloadValidator`]. The dispatcher runs it on
//! every payload before the handler sees the command:
//!
//! 1. **Structural**: JSON Schema validation via the `jsonschema` crate.
//! 2. **Semantic**: `RequiredField`, `AllowedValues`, `ForbiddenPattern`,
//!    and `Custom` rules evaluated against the payload.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use sovereign_validate::SchemaValidator;
//!
//! let mut validator = SchemaValidator::new();
//! validator.register_rule("non-zero-amount", Box::new(|payload| {
//!     match payload.get("amount").and_then(|v| v.as_i64()) {
//!         Some(0) => Some("amount must not be zero".to_string()),
//!         _ => None,
//!     }
//! }));
//! ```

pub mod engine;

pub use engine::{CustomRuleFn, SchemaValidator};
