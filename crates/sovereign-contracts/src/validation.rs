//! Command payload schemas and validation report types.
//!
//! Before a command reaches its handler, the dispatcher validates the payload
//! against the handler's `PayloadSchema`. Only a passing `ValidationReport`
//! lets the command proceed.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Everything a payload is checked against.
///
/// Combines a JSON Schema document with business rules that JSON Schema
/// cannot express.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayloadSchema {
    /// Unique identifier for this schema (e.g. "create-user-v1").
    pub schema_id: String,
    /// JSON Schema document for structural validation. `Null` skips it.
    pub json_schema: Value,
    /// Additional rules evaluated after structural validation.
    pub rules: Vec<ValidationRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationRule {
    /// Referenced in failure reports.
    pub rule_id: String,
    pub description: String,
    pub rule_type: ValidationRuleType,
}

/// The kinds of semantic checks the validator supports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ValidationRuleType {
    /// The field at `field_path` must be present and non-null.
    RequiredField { field_path: String },

    /// The field at `field_path` must equal one of `allowed`.
    AllowedValues {
        field_path: String,
        allowed: Vec<Value>,
    },

    /// The string at `field_path` must not contain `pattern`.
    ForbiddenPattern { field_path: String, pattern: String },

    /// Delegate to a function registered by name with the validator.
    Custom { function_name: String },
}

/// The result of running a `PayloadSchema` against a payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    /// True only if every check passed.
    pub passed: bool,
    pub failures: Vec<ValidationFailure>,
}

impl ValidationReport {
    pub fn pass() -> Self {
        Self {
            passed: true,
            failures: Vec::new(),
        }
    }

    /// All failures joined into one human-readable line.
    pub fn summary(&self) -> String {
        self.failures
            .iter()
            .map(|f| format!("[{}] {}", f.rule_id, f.message))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationFailure {
    pub rule_id: String,
    pub message: String,
}
