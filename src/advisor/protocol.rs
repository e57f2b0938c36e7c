//! Wire types for the advisor bridge
//!
//! One JSON request is written to the advisor's stdin and one JSON response is
//! read back from its stdout. Byte buffers travel as standard base64.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{InscriptError, Result};

/// What the advisor is asked to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdvisorAction {
    Protect,
    Revert,
    Status,
}

impl std::fmt::Display for AdvisorAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Protect => write!(f, "protect"),
            Self::Revert => write!(f, "revert"),
            Self::Status => write!(f, "status"),
        }
    }
}

/// Request sent to the advisor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvisorRequest {
    pub action: AdvisorAction,
    #[serde(default)]
    pub data: String,
    #[serde(default)]
    pub metadata: Value,
}

impl AdvisorRequest {
    pub fn new(action: AdvisorAction, data: &[u8], metadata: Value) -> Self {
        Self {
            action,
            data: STANDARD.encode(data),
            metadata,
        }
    }

    pub fn status() -> Self {
        Self::new(AdvisorAction::Status, &[], Value::Null)
    }

    /// Decode the request body
    pub fn data_bytes(&self) -> Result<Vec<u8>> {
        STANDARD.decode(&self.data).map_err(|e| InscriptError::Serialization {
            reason: format!("request data is not base64: {}", e),
        })
    }
}

/// Response returned by the advisor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvisorResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protected_data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_data: Option<String>,
    #[serde(default)]
    pub metadata: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AdvisorResponse {
    pub fn protected(data: &[u8], metadata: Value) -> Self {
        Self {
            success: true,
            protected_data: Some(STANDARD.encode(data)),
            original_data: None,
            metadata,
            error: None,
        }
    }

    pub fn reverted(data: &[u8], metadata: Value) -> Self {
        Self {
            success: true,
            protected_data: None,
            original_data: Some(STANDARD.encode(data)),
            metadata,
            error: None,
        }
    }

    pub fn status(metadata: Value) -> Self {
        Self {
            success: true,
            protected_data: None,
            original_data: None,
            metadata,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            protected_data: None,
            original_data: None,
            metadata: Value::Null,
            error: Some(error.into()),
        }
    }

    /// Extract the payload bytes for `action`, treating any gap as a bridge failure
    pub fn payload(&self, action: AdvisorAction) -> Result<Vec<u8>> {
        if !self.success {
            return Err(InscriptError::bridge(format!(
                "advisor refused {}: {}",
                action,
                self.error.as_deref().unwrap_or("no reason given")
            )));
        }
        let field = match action {
            AdvisorAction::Protect => self.protected_data.as_deref(),
            AdvisorAction::Revert => self.original_data.as_deref(),
            AdvisorAction::Status => Some(""),
        };
        let encoded = field.ok_or_else(|| {
            InscriptError::bridge(format!("advisor {} response carries no data", action))
        })?;
        STANDARD
            .decode(encoded)
            .map_err(|e| InscriptError::bridge(format!("advisor returned invalid base64: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_wire_shape() {
        let request = AdvisorRequest::new(AdvisorAction::Protect, b"abc", json!({"salt": "s"}));
        let wire = serde_json::to_value(&request).unwrap();
        assert_eq!(wire, json!({"action": "protect", "data": "YWJj", "metadata": {"salt": "s"}}));
    }

    #[test]
    fn test_unsuccessful_response_is_bridge_error() {
        let response: AdvisorResponse =
            serde_json::from_str(r#"{"success": false, "error": "boom"}"#).unwrap();
        let err = response.payload(AdvisorAction::Protect).unwrap_err();
        assert_eq!(err.error_code(), "BRIDGE_UNAVAILABLE");
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn test_missing_payload_field_is_bridge_error() {
        let response = AdvisorResponse::protected(b"xyz", Value::Null);
        assert_eq!(response.payload(AdvisorAction::Protect).unwrap(), b"xyz");
        assert!(response.payload(AdvisorAction::Revert).is_err());
    }
}
