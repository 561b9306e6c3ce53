//! The error every public action returns.
//!
//! Serializes to `{ "error": string, "details"?: any }`; `kind` stays on the
//! Rust side for callers that branch on the failure class.

use serde::Serialize;
use serde_json::{Value as JsonValue, json};
use thiserror::Error;

use nursery_core::DomainError;
use nursery_infra::StoreError;
use nursery_sales::FormErrors;

pub const INVALID_FORM_DATA: &str = "Invalid form data";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionErrorKind {
    Validation,
    Unauthenticated,
    NotFound,
    CrossTenant,
    Invariant,
    Conflict,
    /// A persistence call failed; the message is the database's own.
    Database,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[error("{error}")]
pub struct ActionError {
    #[serde(skip)]
    pub kind: ActionErrorKind,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<JsonValue>,
}

impl ActionError {
    pub fn new(kind: ActionErrorKind, error: impl Into<String>) -> Self {
        Self {
            kind,
            error: error.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: JsonValue) -> Self {
        self.details = Some(details);
        self
    }

    pub fn invalid_field(field: &str, message: impl Into<String>) -> Self {
        Self::new(ActionErrorKind::Validation, INVALID_FORM_DATA)
            .with_details(json!([{ "field": field, "message": message.into() }]))
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ActionErrorKind::NotFound, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ActionErrorKind::Internal, message)
    }

    pub fn to_json(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or_else(|_| json!({ "error": self.error }))
    }
}

impl From<FormErrors> for ActionError {
    fn from(err: FormErrors) -> Self {
        let details = serde_json::to_value(&err.issues).unwrap_or(JsonValue::Null);
        Self::new(ActionErrorKind::Validation, INVALID_FORM_DATA).with_details(details)
    }
}

impl From<DomainError> for ActionError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Validation(msg) => Self::new(ActionErrorKind::Validation, msg),
            DomainError::InvalidId(msg) => Self::new(ActionErrorKind::Validation, INVALID_FORM_DATA)
                .with_details(json!([{ "message": format!("invalid identifier: {msg}") }])),
            DomainError::NotFound(msg) => Self::new(ActionErrorKind::NotFound, msg),
            DomainError::CrossTenant(msg) => Self::new(ActionErrorKind::CrossTenant, msg),
            DomainError::InvariantViolation(msg) => Self::new(ActionErrorKind::Invariant, msg),
            other @ DomainError::Conflict(_) => Self::new(ActionErrorKind::Conflict, other.to_string()),
            DomainError::Unauthenticated => Self::new(ActionErrorKind::Unauthenticated, "Unauthorized"),
        }
    }
}

impl From<StoreError> for ActionError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Domain(domain) => domain.into(),
            StoreError::NotFound(msg) => Self::new(ActionErrorKind::NotFound, msg),
            other @ StoreError::Conflict(_) => Self::new(ActionErrorKind::Conflict, other.to_string()),
            StoreError::Database(msg) => Self::new(ActionErrorKind::Database, msg),
            other @ StoreError::Storage(_) => Self::new(ActionErrorKind::Internal, other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nursery_sales::FieldIssue;

    #[test]
    fn serializes_without_details_when_absent() {
        let err = ActionError::not_found("Customer not found");
        assert_eq!(err.to_json(), json!({ "error": "Customer not found" }));
    }

    #[test]
    fn form_errors_carry_field_details() {
        let err: ActionError = FormErrors {
            issues: vec![FieldIssue {
                field: "customer_id".into(),
                message: "must be a UUID".into(),
            }],
        }
        .into();
        assert_eq!(err.kind, ActionErrorKind::Validation);
        assert_eq!(
            err.to_json(),
            json!({
                "error": "Invalid form data",
                "details": [{ "field": "customer_id", "message": "must be a UUID" }]
            })
        );
    }

    #[test]
    fn database_message_is_kept_verbatim() {
        let err: ActionError = StoreError::Database("order number already exists".into()).into();
        assert_eq!(err.error, "order number already exists");
        assert_eq!(err.kind, ActionErrorKind::Database);
    }

    #[test]
    fn cross_tenant_is_distinct_from_not_found() {
        let err: ActionError =
            StoreError::Domain(DomainError::cross_tenant("Customer belongs to a different organization")).into();
        assert_eq!(err.kind, ActionErrorKind::CrossTenant);
    }
}
