//! Envelope Codec Module
//!
//! A sealed envelope pairs one layer's output with the state snapshot needed
//! to invert it:
//!
//! ```json
//! {"data": "<base64>", "metadata": {...}, "capa": 2, "version": "1.0", "checksum": "<hex>"}
//! ```
//!
//! The checksum covers `data`, the canonical `metadata` text and `capa`, and
//! is verified before anything inside the envelope is decoded.

mod canonical;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::{InscriptError, Result};
use crate::layers::{LayerId, LayerState};
use crate::pipeline::Direction;

pub use canonical::{from_canonical_bytes, to_canonical_bytes};

/// Envelope format version written and accepted
pub const FORMAT_VERSION: &str = "1.0";

/// Self-describing container for one layer's output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub data: String,
    pub metadata: Value,
    pub capa: u8,
    pub version: String,
    pub checksum: String,
}

impl Envelope {
    /// Seal `data` with the state snapshot that produced it
    pub fn seal(data: &[u8], state: &LayerState) -> Result<Self> {
        let data = STANDARD.encode(data);
        let metadata = state.to_metadata()?;
        let capa = state.layer_id().as_u8();
        let checksum = compute_checksum(&data, &metadata, capa)?;

        Ok(Self {
            data,
            metadata,
            capa,
            version: FORMAT_VERSION.to_string(),
            checksum,
        })
    }

    /// Validate the envelope for `expected` and decode its contents
    pub fn open(&self, expected: LayerId) -> Result<(Vec<u8>, LayerState)> {
        self.check_version()?;

        if !self.checksum_matches()? {
            return Err(InscriptError::integrity(
                expected,
                Direction::Decrypt,
                "envelope checksum mismatch",
            ));
        }

        if self.capa != expected.as_u8() {
            return Err(InscriptError::state_mismatch(
                expected,
                Direction::Decrypt,
                format!("envelope was sealed by layer {}", self.capa),
            ));
        }

        let data = STANDARD
            .decode(&self.data)
            .map_err(|e| InscriptError::MalformedEnvelope {
                reason: format!("data is not base64: {}", e),
            })?;
        let state = LayerState::from_metadata(expected, &self.metadata)?;
        Ok((data, state))
    }

    /// Check version and checksum only, returning the sealing layer
    pub fn verify(&self) -> Result<LayerId> {
        self.check_version()?;
        let layer = LayerId::from_u8(self.capa).ok_or_else(|| InscriptError::MalformedEnvelope {
            reason: format!("unknown layer id {}", self.capa),
        })?;
        if !self.checksum_matches()? {
            return Err(InscriptError::integrity(
                layer,
                Direction::Decrypt,
                "envelope checksum mismatch",
            ));
        }
        Ok(layer)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse envelope JSON; any shape error is `MalformedEnvelope`
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| InscriptError::MalformedEnvelope {
            reason: e.to_string(),
        })
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        Self::from_slice(text.as_bytes())
    }

    fn check_version(&self) -> Result<()> {
        if self.version != FORMAT_VERSION {
            return Err(InscriptError::MalformedEnvelope {
                reason: format!("unsupported envelope version {:?}", self.version),
            });
        }
        Ok(())
    }

    fn checksum_matches(&self) -> Result<bool> {
        let expected = compute_checksum(&self.data, &self.metadata, self.capa)?;
        Ok(expected == self.checksum)
    }
}

/// SHA-256 over length-prefixed data, length-prefixed canonical metadata and capa
pub fn compute_checksum(data: &str, metadata: &Value, capa: u8) -> Result<String> {
    let canonical = serde_json::to_vec(metadata)?;

    let mut hasher = Sha256::new();
    hasher.update((data.len() as u64).to_be_bytes());
    hasher.update(data.as_bytes());
    hasher.update((canonical.len() as u64).to_be_bytes());
    hasher.update(&canonical);
    hasher.update([capa]);
    Ok(format!("{:x}", hasher.finalize()))
}

/// Seal one layer's output
pub fn encode(data: &[u8], state: &LayerState) -> Result<Envelope> {
    Envelope::seal(data, state)
}

/// Open an envelope expected to come from `expected`
pub fn decode(envelope: &Envelope, expected: LayerId) -> Result<(Vec<u8>, LayerState)> {
    envelope.open(expected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::{Layer, QuantumLayer, RotorLayer};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use serde_json::json;

    fn sealed_rotor() -> (Envelope, LayerState) {
        let mut rng = ChaCha8Rng::seed_from_u64(21);
        let state = RotorLayer::default().generate_state(&mut rng);
        (encode(b"layer output", &state).unwrap(), state)
    }

    #[test]
    fn test_seal_then_open() {
        let (envelope, state) = sealed_rotor();
        assert_eq!(envelope.capa, 2);
        assert_eq!(envelope.version, FORMAT_VERSION);
        assert_eq!(envelope.checksum.len(), 64);

        let (data, back) = decode(&envelope, LayerId::Rotor).unwrap();
        assert_eq!(data, b"layer output");
        assert_eq!(back, state);
    }

    #[test]
    fn test_reparsed_envelope_still_verifies() {
        let (envelope, _) = sealed_rotor();
        let bytes = envelope.to_bytes().unwrap();
        let parsed = Envelope::from_slice(&bytes).unwrap();
        assert_eq!(parsed, envelope);
        assert_eq!(parsed.verify().unwrap(), LayerId::Rotor);
    }

    #[test]
    fn test_tampered_data_is_integrity_error() {
        let (mut envelope, _) = sealed_rotor();
        envelope.data = STANDARD.encode(b"layer outpuT");
        let err = envelope.open(LayerId::Rotor).unwrap_err();
        assert_eq!(err.error_code(), "INTEGRITY_ERROR");
    }

    #[test]
    fn test_tampered_metadata_is_integrity_error() {
        let (mut envelope, _) = sealed_rotor();
        envelope.metadata["reflector"] = json!(9);
        assert_eq!(envelope.open(LayerId::Rotor).unwrap_err().error_code(), "INTEGRITY_ERROR");
    }

    #[test]
    fn test_tampered_capa_is_integrity_error() {
        let (mut envelope, _) = sealed_rotor();
        envelope.capa = 1;
        assert_eq!(envelope.open(LayerId::Quantum).unwrap_err().error_code(), "INTEGRITY_ERROR");
    }

    #[test]
    fn test_wrong_expected_layer_is_state_mismatch() {
        let (envelope, _) = sealed_rotor();
        let err = envelope.open(LayerId::Sentinel).unwrap_err();
        assert_eq!(err.error_code(), "STATE_MISMATCH");
    }

    #[test]
    fn test_unknown_version_is_malformed() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let state = QuantumLayer::default().generate_state(&mut rng);
        let mut envelope = encode(b"", &state).unwrap();
        envelope.version = "2.0".to_string();
        let err = envelope.open(LayerId::Quantum).unwrap_err();
        assert_eq!(err.error_code(), "MALFORMED_ENVELOPE");
    }

    #[test]
    fn test_garbage_is_malformed() {
        let err = Envelope::from_slice(b"{\"data\": 1}").unwrap_err();
        assert_eq!(err.error_code(), "MALFORMED_ENVELOPE");
    }
}
