//! Error handling for inscript
//!
//! Pipeline-level errors carry the layer and direction they were raised in.
//! Bridge failures are recovered by the sentinel layer and only surface when
//! an advisor-protected envelope cannot be reverted.

use thiserror::Error;

use crate::layers::LayerId;
use crate::pipeline::Direction;

/// Result type alias for inscript operations
pub type Result<T> = std::result::Result<T, InscriptError>;

/// Main error type for inscript operations
#[derive(Error, Debug)]
pub enum InscriptError {
    // Pipeline errors
    #[error("Integrity check failed in {layer} ({direction}): {reason}")]
    Integrity {
        layer: LayerId,
        direction: Direction,
        reason: String,
    },

    #[error("State mismatch in {layer} ({direction}): {reason}")]
    StateMismatch {
        layer: LayerId,
        direction: Direction,
        reason: String,
    },

    #[error("Malformed envelope: {reason}")]
    MalformedEnvelope { reason: String },

    #[error("Operation cancelled during {layer}")]
    Cancelled { layer: LayerId },

    // Collaborator errors
    #[error("Advisor bridge unavailable: {reason}")]
    BridgeUnavailable { reason: String },

    // Payload / configuration errors
    #[error("Payload serialization failed: {reason}")]
    Serialization { reason: String },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("Internal error: {0}")]
    Internal(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl InscriptError {
    pub(crate) fn integrity(layer: LayerId, direction: Direction, reason: impl Into<String>) -> Self {
        InscriptError::Integrity {
            layer,
            direction,
            reason: reason.into(),
        }
    }

    pub(crate) fn state_mismatch(
        layer: LayerId,
        direction: Direction,
        reason: impl Into<String>,
    ) -> Self {
        InscriptError::StateMismatch {
            layer,
            direction,
            reason: reason.into(),
        }
    }

    pub(crate) fn bridge(reason: impl Into<String>) -> Self {
        InscriptError::BridgeUnavailable {
            reason: reason.into(),
        }
    }

    /// Get the error code for this error type
    pub fn error_code(&self) -> &'static str {
        match self {
            InscriptError::Integrity { .. } => "INTEGRITY_ERROR",
            InscriptError::StateMismatch { .. } => "STATE_MISMATCH",
            InscriptError::MalformedEnvelope { .. } => "MALFORMED_ENVELOPE",
            InscriptError::Cancelled { .. } => "CANCELLED",
            InscriptError::BridgeUnavailable { .. } => "BRIDGE_UNAVAILABLE",
            InscriptError::Serialization { .. } => "SERIALIZATION_ERROR",
            InscriptError::InvalidConfig { .. } => "INVALID_CONFIG",
            InscriptError::Internal(_) => "INTERNAL_ERROR",
            InscriptError::Io(_) => "IO_ERROR",
            InscriptError::Json(_) => "JSON_ERROR",
        }
    }

    /// Check if this error is recoverable without caller intervention
    ///
    /// Only bridge failures qualify: the sentinel layer falls back to its
    /// local transform.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, InscriptError::BridgeUnavailable { .. })
    }

    /// Layer the error was raised in, when known
    pub fn layer(&self) -> Option<LayerId> {
        match self {
            InscriptError::Integrity { layer, .. }
            | InscriptError::StateMismatch { layer, .. }
            | InscriptError::Cancelled { layer } => Some(*layer),
            _ => None,
        }
    }

    /// Get recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            InscriptError::Integrity { .. } => vec![
                "The envelope was modified or corrupted after it was produced",
                "Fetch the envelope again from its original store",
            ],
            InscriptError::StateMismatch { .. } => vec![
                "Decrypt with the same security level that was used to encrypt",
                "Check that the enabled layer set matches the encrypting call",
            ],
            InscriptError::MalformedEnvelope { .. } => vec![
                "The input is not an inscript envelope",
                "Check the envelope format version",
            ],
            InscriptError::BridgeUnavailable { .. } => vec![
                "Check INSCRIPT_ADVISOR_COMMAND points at a working advisor",
                "Increase INSCRIPT_ADVISOR_TIMEOUT_MS for slow advisors",
            ],
            InscriptError::Serialization { .. } => vec![
                "Payload maps must use string keys",
                "Payload must be representable as JSON",
            ],
            InscriptError::InvalidConfig { .. } => vec![
                "Security level must be between 1 and 3",
                "Check rotor count, quantum dimensions and history capacity in the settings file",
            ],
            _ => vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = InscriptError::integrity(LayerId::Rotor, Direction::Decrypt, "checksum");
        assert_eq!(err.error_code(), "INTEGRITY_ERROR");
        assert_eq!(err.layer(), Some(LayerId::Rotor));
    }

    #[test]
    fn test_only_bridge_errors_recover() {
        assert!(InscriptError::bridge("timeout").is_recoverable());
        let err = InscriptError::state_mismatch(LayerId::Quantum, Direction::Decrypt, "wrong layer");
        assert!(!err.is_recoverable());
        assert!(!err.recovery_suggestions().is_empty());
    }

    #[test]
    fn test_display_names_layer_and_direction() {
        let err = InscriptError::integrity(LayerId::Sentinel, Direction::Decrypt, "bad checksum");
        let message = err.to_string();
        assert!(message.contains("L3"));
        assert!(message.contains("decrypt"));
    }
}
