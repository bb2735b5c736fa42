//! Schema-based payload validator.
//!
//! Every failure from both phases is collected before returning, so a caller
//! sees the whole failure set in one `ValidationError`. A schema document that
//! does not compile is a configuration fault of the handler that declared it,
//! not of the payload, and surfaces as `KernelError::Config`.

use std::collections::HashMap;

use serde_json::Value;
use tracing::{debug, warn};

use sovereign_contracts::{
    error::{KernelError, KernelResult},
    validation::{
        PayloadSchema, ValidationFailure, ValidationReport, ValidationRule, ValidationRuleType,
    },
};
use sovereign_core::traits::PayloadValidator;

/// A caller-supplied semantic check.
///
/// Receives the whole payload. Returns `Some(message)` on failure.
pub type CustomRuleFn = Box<dyn Fn(&Value) -> Option<String> + Send + Sync>;

const STRUCTURAL_RULE_ID: &str = "json-schema";

pub struct SchemaValidator {
    custom_rules: HashMap<String, CustomRuleFn>,
}

impl SchemaValidator {
    pub fn new() -> Self {
        Self {
            custom_rules: HashMap::new(),
        }
    }

    /// Register `f` under `name` for `ValidationRuleType::Custom` rules.
    ///
    /// Registering the same name twice replaces the earlier function.
    pub fn register_rule(&mut self, name: impl Into<String>, f: CustomRuleFn) {
        self.custom_rules.insert(name.into(), f);
    }

    pub fn has_rule(&self, name: &str) -> bool {
        self.custom_rules.contains_key(name)
    }

    /// Resolve a dot path such as `"customer.address.city"`.
    ///
    /// `None` when any segment is missing or the value is JSON `null`.
    fn resolve_path<'v>(value: &'v Value, path: &str) -> Option<&'v Value> {
        path.split('.').try_fold(value, |current, segment| {
            current.get(segment).filter(|v| !v.is_null())
        })
    }

    fn structural_failures(
        &self,
        payload: &Value,
        schema: &PayloadSchema,
    ) -> KernelResult<Vec<ValidationFailure>> {
        if schema.json_schema.is_null() {
            return Ok(Vec::new());
        }

        let validator = jsonschema::validator_for(&schema.json_schema).map_err(|e| {
            KernelError::Config {
                reason: format!("schema '{}' does not compile: {}", schema.schema_id, e),
            }
        })?;

        Ok(validator
            .iter_errors(payload)
            .map(|error| {
                let location = error.instance_path.to_string();
                let message = if location.is_empty() {
                    format!("payload: {}", error)
                } else {
                    format!("field '{}': {}", location.trim_start_matches('/'), error)
                };
                ValidationFailure {
                    rule_id: STRUCTURAL_RULE_ID.to_string(),
                    message,
                }
            })
            .collect())
    }

    fn check_rule(&self, payload: &Value, rule: &ValidationRule) -> Option<String> {
        match &rule.rule_type {
            ValidationRuleType::RequiredField { field_path } => {
                match Self::resolve_path(payload, field_path) {
                    Some(_) => None,
                    None => Some(format!("required field '{field_path}' is missing or null")),
                }
            }

            ValidationRuleType::AllowedValues {
                field_path,
                allowed,
            } => match Self::resolve_path(payload, field_path) {
                None => Some(format!("field '{field_path}' is missing")),
                Some(actual) if allowed.contains(actual) => None,
                Some(actual) => Some(format!(
                    "field '{field_path}' has value {actual}, expected one of {}",
                    Value::Array(allowed.clone())
                )),
            },

            // Only string values can carry a pattern; anything else passes.
            ValidationRuleType::ForbiddenPattern {
                field_path,
                pattern,
            } => Self::resolve_path(payload, field_path)
                .and_then(Value::as_str)
                .filter(|s| s.contains(pattern.as_str()))
                .map(|_| format!("field '{field_path}' contains forbidden pattern '{pattern}'")),

            ValidationRuleType::Custom { function_name } => {
                match self.custom_rules.get(function_name.as_str()) {
                    Some(f) => f(payload),
                    None => Some(format!(
                        "no custom rule registered under '{function_name}'"
                    )),
                }
            }
        }
    }
}

impl Default for SchemaValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl PayloadValidator for SchemaValidator {
    fn validate(&self, payload: &Value, schema: &PayloadSchema) -> KernelResult<ValidationReport> {
        let mut failures = self.structural_failures(payload, schema)?;

        for rule in &schema.rules {
            if let Some(message) = self.check_rule(payload, rule) {
                failures.push(ValidationFailure {
                    rule_id: rule.rule_id.clone(),
                    message,
                });
            }
        }

        if !failures.is_empty() {
            warn!(
                schema_id = %schema.schema_id,
                failure_count = failures.len(),
                "payload failed validation"
            );
        } else {
            debug!(schema_id = %schema.schema_id, "payload validated");
        }

        Ok(ValidationReport {
            passed: failures.is_empty(),
            failures,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
