//! Payload schemas of the governance commands.

use serde_json::json;

use sovereign_contracts::validation::{PayloadSchema, ValidationRule, ValidationRuleType};

/// Name of the custom rule rejecting a zero `amount`.
pub const NON_ZERO_AMOUNT: &str = "non-zero-amount";

const EMAIL_PATTERN: &str = r"^[^@\s]+@[^@\s]+$";
const CURRENCY_PATTERN: &str = r"^[A-Z]{3}$";

fn id_field() -> serde_json::Value {
    json!({ "type": "string", "minLength": 1, "maxLength": 128 })
}

pub fn create_user() -> PayloadSchema {
    PayloadSchema {
        schema_id: "create-user-v1".to_string(),
        json_schema: json!({
            "type": "object",
            "properties": {
                "username": { "type": "string", "pattern": r"^[A-Za-z0-9_.-]{1,64}$" },
                "email": { "type": "string", "pattern": EMAIL_PATTERN }
            },
            "required": ["username", "email"],
            "additionalProperties": false
        }),
        rules: vec![],
    }
}

pub fn update_user_email() -> PayloadSchema {
    PayloadSchema {
        schema_id: "update-user-email-v1".to_string(),
        json_schema: json!({
            "type": "object",
            "properties": {
                "user_id": id_field(),
                "email": { "type": "string", "pattern": EMAIL_PATTERN }
            },
            "required": ["user_id", "email"],
            "additionalProperties": false
        }),
        rules: vec![],
    }
}

pub fn initiate_payment() -> PayloadSchema {
    PayloadSchema {
        schema_id: "initiate-payment-v1".to_string(),
        json_schema: json!({
            "type": "object",
            "properties": {
                "user_id": id_field(),
                "amount": { "type": "integer", "minimum": 1 },
                "currency": { "type": "string", "pattern": CURRENCY_PATTERN }
            },
            "required": ["user_id", "amount", "currency"],
            "additionalProperties": false
        }),
        rules: vec![],
    }
}

pub fn settle_payment() -> PayloadSchema {
    PayloadSchema {
        schema_id: "settle-payment-v1".to_string(),
        json_schema: json!({
            "type": "object",
            "properties": { "payment_id": id_field() },
            "required": ["payment_id"],
            "additionalProperties": false
        }),
        rules: vec![],
    }
}

pub fn post_ledger_entry() -> PayloadSchema {
    PayloadSchema {
        schema_id: "post-ledger-entry-v1".to_string(),
        json_schema: json!({
            "type": "object",
            "properties": {
                "account_id": id_field(),
                "amount": { "type": "integer" },
                "memo": { "type": "string", "maxLength": 256 }
            },
            "required": ["account_id", "amount"],
            "additionalProperties": false
        }),
        rules: vec![ValidationRule {
            rule_id: "amount-non-zero".to_string(),
            description: "a ledger entry must move money".to_string(),
            rule_type: ValidationRuleType::Custom {
                function_name: NON_ZERO_AMOUNT.to_string(),
            },
        }],
    }
}
