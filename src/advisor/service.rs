//! Built-in advisor service
//!
//! Implements the advisor side of the bridge protocol. Threat analysis of the
//! request body picks a protection level, which is echoed in the response
//! metadata and honoured again by `revert`.

use std::io::{Read, Write};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::protocol::{AdvisorAction, AdvisorRequest, AdvisorResponse};
use crate::error::{InscriptError, Result};
use crate::layers::primitives::{fold_pairs, unfold_pairs, xor_keystream};
use crate::layers::threat::ThreatAnalyzer;

pub const ADVISOR_VERSION: &str = "2.1.0";

const BASIC_LABEL: &[u8] = b"advisor-basic";
const PASS_LABEL: &[u8] = b"advisor-pass";
const FOLD_MASK: u16 = 0x55AA;
const MAXIMUM_PASSES: u8 = 3;

/// Strength of the advisor transform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtectionLevel {
    Basic,
    Standard,
    Maximum,
}

impl ProtectionLevel {
    /// basic up to 20, standard up to 50, maximum above
    pub fn for_threat(threat_level: u8) -> Self {
        match threat_level {
            0..=20 => ProtectionLevel::Basic,
            21..=50 => ProtectionLevel::Standard,
            _ => ProtectionLevel::Maximum,
        }
    }
}

/// Protection metadata the service writes and later reads back
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct ProtectionRecord {
    protection_level: ProtectionLevel,
    threat_level: u8,
    salt: String,
    advisor_version: String,
}

#[derive(Debug, Clone, Default)]
pub struct AdvisorService {
    analyzer: ThreatAnalyzer,
}

impl AdvisorService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer one request; failures become `success: false` responses
    pub fn handle(&self, request: &AdvisorRequest) -> AdvisorResponse {
        let outcome = match request.action {
            AdvisorAction::Status => Ok(AdvisorResponse::status(json!({
                "advisor_version": ADVISOR_VERSION,
                "patterns": self.analyzer.pattern_names(),
            }))),
            AdvisorAction::Protect => request.data_bytes().and_then(|data| {
                let (protected, metadata) = self.protect(&data, &request.metadata)?;
                Ok(AdvisorResponse::protected(&protected, metadata))
            }),
            AdvisorAction::Revert => request.data_bytes().and_then(|data| {
                let original = self.revert(&data, &request.metadata)?;
                Ok(AdvisorResponse::reverted(&original, request.metadata.clone()))
            }),
        };

        outcome.unwrap_or_else(|e| {
            tracing::warn!(action = %request.action, error = %e, "advisor request failed");
            AdvisorResponse::failure(e.to_string())
        })
    }

    /// Read one request from `input` and write one response to `output`
    pub fn serve<R: Read, W: Write>(&self, mut input: R, mut output: W) -> Result<AdvisorResponse> {
        let mut raw = Vec::new();
        input.read_to_end(&mut raw)?;

        let response = match serde_json::from_slice::<AdvisorRequest>(&raw) {
            Ok(request) => self.handle(&request),
            Err(e) => AdvisorResponse::failure(format!("invalid request: {}", e)),
        };

        serde_json::to_writer(&mut output, &response)?;
        output.write_all(b"\n")?;
        output.flush()?;
        Ok(response)
    }

    pub fn protect(&self, data: &[u8], metadata: &Value) -> Result<(Vec<u8>, Value)> {
        let salt = metadata
            .get("salt")
            .and_then(Value::as_str)
            .ok_or_else(|| InscriptError::Serialization {
                reason: "request metadata has no salt".to_string(),
            })?;

        // The sentinel scores its input before mixing; the mixed body scores clean
        let threat_level = match metadata.get("threat_level").and_then(Value::as_u64) {
            Some(level) => level.min(100) as u8,
            None => self.analyzer.analyze(data).threat_level,
        };
        let level = ProtectionLevel::for_threat(threat_level);
        tracing::debug!(threat_level, ?level, "advisor protect");

        let protected = match level {
            ProtectionLevel::Basic => basic(data, salt),
            ProtectionLevel::Standard => standard(data, salt),
            ProtectionLevel::Maximum => maximum(data, salt),
        };

        let record = ProtectionRecord {
            protection_level: level,
            threat_level,
            salt: salt.to_string(),
            advisor_version: ADVISOR_VERSION.to_string(),
        };
        Ok((protected, serde_json::to_value(record)?))
    }

    pub fn revert(&self, data: &[u8], metadata: &Value) -> Result<Vec<u8>> {
        let record: ProtectionRecord =
            serde_json::from_value(metadata.clone()).map_err(|e| InscriptError::Serialization {
                reason: format!("revert metadata is incomplete: {}", e),
            })?;

        let original = match record.protection_level {
            ProtectionLevel::Basic => basic(data, &record.salt),
            ProtectionLevel::Standard => standard_inverse(data, &record.salt),
            ProtectionLevel::Maximum => maximum_inverse(data, &record.salt),
        };
        Ok(original)
    }
}

fn basic(data: &[u8], salt: &str) -> Vec<u8> {
    let mut out = data.to_vec();
    xor_keystream(&mut out, salt.as_bytes(), BASIC_LABEL);
    out
}

fn standard(data: &[u8], salt: &str) -> Vec<u8> {
    let mut out = basic(data, salt);
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = byte.rotate_left((i % 7) as u32 + 1);
    }
    fold_pairs(&out, FOLD_MASK)
}

fn standard_inverse(data: &[u8], salt: &str) -> Vec<u8> {
    let mut out = unfold_pairs(data, FOLD_MASK);
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = byte.rotate_right((i % 7) as u32 + 1);
    }
    basic(&out, salt)
}

fn pass_key(pass: u8, salt: &str) -> Vec<u8> {
    format!("pass_{}{}", pass, salt).into_bytes()
}

fn maximum(data: &[u8], salt: &str) -> Vec<u8> {
    let mut out = standard(data, salt);
    for pass in 1..=MAXIMUM_PASSES {
        xor_keystream(&mut out, &pass_key(pass, salt), PASS_LABEL);
    }
    out
}

fn maximum_inverse(data: &[u8], salt: &str) -> Vec<u8> {
    let mut out = data.to_vec();
    for pass in (1..=MAXIMUM_PASSES).rev() {
        xor_keystream(&mut out, &pass_key(pass, salt), PASS_LABEL);
    }
    standard_inverse(&out, salt)
}
