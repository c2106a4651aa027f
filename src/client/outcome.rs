//! OperationOutcome wire types and terminology test classification.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const OPERATION_OUTCOME: &str = "OperationOutcome";

/// Issue severity as reported by the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Fatal,
    Error,
    Warning,
    Information,
    #[default]
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CodeableConcept {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    #[serde(default)]
    pub severity: IssueSeverity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<CodeableConcept>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub location: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub expression: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Issue {
    /// Fatal issues count as errors.
    pub fn is_error(&self) -> bool {
        matches!(self.severity, IssueSeverity::Fatal | IssueSeverity::Error)
    }

    /// `details.text`, falling back to `diagnostics`.
    pub fn message(&self) -> Option<&str> {
        self.details
            .as_ref()
            .and_then(|d| d.text.as_deref())
            .or(self.diagnostics.as_deref())
    }
}

/// Validation result returned by every engine endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationOutcome {
    pub resource_type: String,
    #[serde(default)]
    pub issue: Vec<Issue>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl OperationOutcome {
    pub fn is_operation_outcome(&self) -> bool {
        self.resource_type == OPERATION_OUTCOME
    }

    pub fn errors(&self) -> impl Iterator<Item = &Issue> {
        self.issue.iter().filter(|issue| issue.is_error())
    }

    pub fn has_errors(&self) -> bool {
        self.errors().next().is_some()
    }
}

/// Non-throwing result of a terminology test case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxTestOutcome {
    pub result: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl TxTestOutcome {
    pub fn passed() -> Self {
        Self {
            result: true,
            message: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            result: false,
            message: Some(message.into()),
        }
    }
}

/// Turn a `/txTest` response into a pass/fail verdict.
pub fn classify_tx_test(status: u16, body: &str) -> TxTestOutcome {
    if status >= 400 {
        return TxTestOutcome::failed(format!("HTTP error {}: {}", status, body));
    }

    let value: Value = serde_json::from_str(body).unwrap_or(Value::Null);
    let resource_type = value.get("resourceType").and_then(Value::as_str);
    if resource_type != Some(OPERATION_OUTCOME) {
        return TxTestOutcome::failed(format!(
            "Unexpected response type: {}",
            resource_type.unwrap_or("unknown")
        ));
    }

    let outcome: OperationOutcome = match serde_json::from_value(value) {
        Ok(outcome) => outcome,
        Err(e) => return TxTestOutcome::failed(format!("Malformed OperationOutcome: {}", e)),
    };

    let first_error = outcome.errors().next();
    match first_error {
        None => TxTestOutcome::passed(),
        Some(issue) => TxTestOutcome::failed(
            issue
                .message()
                .unwrap_or("Error issue without details or diagnostics"),
        ),
    }
}
