//! Validation of `POST /api/medications/administer` bodies.
//!
//! Validation runs in two phases:
//!
//! 1. **Structural**: the raw JSON body is checked against
//!    `administration_schema()` with the `jsonschema` crate.  Every violation
//!    is collected so the client sees the full list in one response.
//! 2. **Typed**: the body is deserialized into `AdministrationRequest` and
//!    turned into a `RecordPayload` with a fresh record id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;
use uuid::Uuid;

use medchain_contracts::{
    error::{ChainError, ChainResult},
    record::RecordPayload,
};

/// Body of an administration request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdministrationRequest {
    pub order_id: String,
    pub patient_id: String,
    pub patient_barcode_scanned: bool,
    pub medication_barcode_scanned: bool,
    pub administered_by: String,

    /// Defaults to the server clock when absent.
    #[serde(default)]
    pub administered_at: Option<DateTime<Utc>>,
}

impl AdministrationRequest {
    /// Build the ledger payload, assigning a new v4 record id.
    pub fn into_payload(self, now: DateTime<Utc>) -> RecordPayload {
        RecordPayload {
            record_id: Uuid::new_v4(),
            patient_id: self.patient_id,
            order_id: self.order_id,
            administered_by: self.administered_by,
            patient_barcode_scanned: self.patient_barcode_scanned,
            medication_barcode_scanned: self.medication_barcode_scanned,
            administered_at: self.administered_at.unwrap_or(now),
        }
    }
}

/// JSON Schema for an administration request body.
///
/// Identifiers must contain at least one non-whitespace character.  Extra
/// properties are allowed and ignored.
pub fn administration_schema() -> Value {
    let id = json!({ "type": "string", "minLength": 1, "pattern": "\\S" });
    json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "type": "object",
        "required": [
            "order_id",
            "patient_id",
            "patient_barcode_scanned",
            "medication_barcode_scanned",
            "administered_by"
        ],
        "properties": {
            "order_id": id,
            "patient_id": id,
            "administered_by": id,
            "patient_barcode_scanned": { "type": "boolean" },
            "medication_barcode_scanned": { "type": "boolean" },
            "administered_at": { "type": "string" }
        }
    })
}

/// Compiled request validator.  Build once, reuse per request.
pub struct RequestValidator {
    validator: jsonschema::Validator,
}

impl RequestValidator {
    pub fn new() -> ChainResult<Self> {
        let validator = jsonschema::validator_for(&administration_schema()).map_err(|e| {
            ChainError::ConfigError {
                reason: format!("invalid administration schema: {e}"),
            }
        })?;
        Ok(Self { validator })
    }

    /// Validate `body` and decode it.
    ///
    /// Returns `ChainError::InvalidPayload` listing every violation.
    pub fn validate(&self, body: &Value) -> ChainResult<AdministrationRequest> {
        let violations: Vec<String> = self
            .validator
            .iter_errors(body)
            .map(|e| {
                let path = e.instance_path.to_string();
                if path.is_empty() {
                    e.to_string()
                } else {
                    format!("{path}: {e}")
                }
            })
            .collect();

        if !violations.is_empty() {
            warn!(violations = violations.len(), "administration request rejected");
            return Err(ChainError::InvalidPayload {
                reason: violations.join("; "),
            });
        }

        serde_json::from_value(body.clone()).map_err(|e| ChainError::InvalidPayload {
            reason: e.to_string(),
        })
    }

    /// Validate `body` and build the payload the ledger appends.
    pub fn payload_from(&self, body: &Value, now: DateTime<Utc>) -> ChainResult<RecordPayload> {
        Ok(self.validate(body)?.into_payload(now))
    }
}
