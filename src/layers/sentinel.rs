//! L3: active protection
//!
//! Keyed bit mixing, an optional advisor transform with local fallback, and
//! honeypot decoys wrapped in a watermark. Threat scoring runs on the input
//! and is recorded in the state without touching the bytes.

use std::fmt;
use std::sync::Arc;

use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::primitives::{random_hex, sha256_hex};
use super::threat::ThreatAnalyzer;
use super::{Layer, LayerContext, LayerId, LayerState};
use crate::advisor::ProtectionProvider;
use crate::error::{InscriptError, Result};
use crate::pipeline::Direction;

pub const SENTINEL_LAYER_VERSION: &str = "1.3.0";

const DECOY_COUNT: usize = 3;

/// Which transform produced the protected body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtectionMode {
    Local,
    Advisor,
}

impl fmt::Display for ProtectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Advisor => write!(f, "advisor"),
        }
    }
}

/// Per-operation L3 parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SentinelState {
    pub key: String,
    pub mode: ProtectionMode,
    pub honeypot: bool,
    pub decoys: Vec<String>,
    pub watermark: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advisor_metadata: Option<Value>,
    #[serde(default)]
    pub threat_level: u8,
}

impl SentinelState {
    fn key_bytes(&self, direction: Direction) -> Result<Vec<u8>> {
        let fail = |reason: String| InscriptError::state_mismatch(LayerId::Sentinel, direction, reason);
        match hex::decode(&self.key) {
            Ok(bytes) if bytes.len() == 32 => Ok(bytes),
            Ok(bytes) => Err(fail(format!("sentinel key holds {} bytes, expected 32", bytes.len()))),
            Err(e) => Err(fail(format!("sentinel key is not hex: {}", e))),
        }
    }

    /// Salt handed to the advisor, derived from the key
    fn advisor_salt(&self) -> String {
        let mut salt = sha256_hex(format!("advisor-salt:{}", self.key).as_bytes());
        salt.truncate(32);
        salt
    }
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while value > 0 {
        digits.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    digits.reverse();
    String::from_utf8_lossy(&digits).into_owned()
}

/// Active protection layer template
#[derive(Clone)]
pub struct SentinelLayer {
    advisor: Option<Arc<dyn ProtectionProvider>>,
    honeypot: bool,
    analyzer: ThreatAnalyzer,
}

impl fmt::Debug for SentinelLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SentinelLayer")
            .field("advisor", &self.advisor.as_ref().map(|a| a.mode()))
            .field("honeypot", &self.honeypot)
            .finish()
    }
}

impl Default for SentinelLayer {
    fn default() -> Self {
        Self::new(None, true)
    }
}

impl SentinelLayer {
    pub fn new(advisor: Option<Arc<dyn ProtectionProvider>>, honeypot: bool) -> Self {
        Self {
            advisor,
            honeypot,
            analyzer: ThreatAnalyzer::new(),
        }
    }

    fn protect_with_advisor(
        &self,
        advisor: &dyn ProtectionProvider,
        state: &mut SentinelState,
        mixed: Vec<u8>,
        ctx: &LayerContext<'_>,
    ) -> Result<Vec<u8>> {
        let request = json!({
            "layer": LayerId::Sentinel.as_u8(),
            "salt": state.advisor_salt(),
            "threat_level": state.threat_level,
        });
        match advisor.protect(&mixed, &request, ctx.cancel) {
            Ok(output) => {
                state.mode = ProtectionMode::Advisor;
                state.advisor_metadata = Some(output.metadata);
                Ok(output.data)
            }
            Err(e) if e.is_recoverable() => {
                tracing::warn!(
                    advisor = advisor.mode(),
                    error = %e,
                    "advisor unavailable, keeping local protection"
                );
                state.mode = ProtectionMode::Local;
                state.advisor_metadata = None;
                Ok(mixed)
            }
            Err(e) => Err(e),
        }
    }
}

impl Layer for SentinelLayer {
    fn id(&self) -> LayerId {
        LayerId::Sentinel
    }

    fn name(&self) -> &'static str {
        "sentinel"
    }

    fn version(&self) -> &'static str {
        SENTINEL_LAYER_VERSION
    }

    fn generate_state(&self, rng: &mut dyn RngCore) -> LayerState {
        let key = random_hex(rng, 32);
        let decoys = vec![
            format!("SNEAKER_HONEYPOT_START:{}:FAKE_DATA", random_hex(rng, 4)),
            format!("TRAP:{}:DECOY", rng.gen_range(1000..10000u32)),
            format!("FAKE_CREDENTIALS:admin:{}", random_hex(rng, 6)),
        ];
        let watermark = format!(
            "SNK{}{}END",
            to_base36(u64::from(rng.next_u32())),
            random_hex(rng, 2)
        );

        LayerState::Sentinel(SentinelState {
            key,
            mode: ProtectionMode::Local,
            honeypot: self.honeypot,
            decoys,
            watermark,
            advisor_metadata: None,
            threat_level: 0,
        })
    }

    fn apply(
        &self,
        state: LayerState,
        data: &[u8],
        ctx: &LayerContext<'_>,
    ) -> Result<(Vec<u8>, LayerState)> {
        let mut state = match state {
            LayerState::Sentinel(state) => state,
            other => return Err(other.mismatch(LayerId::Sentinel, Direction::Encrypt)),
        };
        let key = state.key_bytes(Direction::Encrypt)?;

        let report = self.analyzer.analyze(data);
        state.threat_level = report.threat_level;
        if !report.is_clean() {
            tracing::warn!(
                threat_level = report.threat_level,
                patterns = report.patterns_found.len(),
                "threat signatures in sentinel input"
            );
        }

        let mixed = mix(data, &key);
        state.mode = ProtectionMode::Local;
        state.advisor_metadata = None;
        let body = match &self.advisor {
            Some(advisor) => self.protect_with_advisor(advisor.as_ref(), &mut state, mixed, ctx)?,
            None => mixed,
        };

        let out = if state.honeypot {
            plant_decoys(&body, &state)
        } else {
            body
        };
        Ok((out, LayerState::Sentinel(state)))
    }

    fn reverse(&self, state: &LayerState, data: &[u8], ctx: &LayerContext<'_>) -> Result<Vec<u8>> {
        let state = match state {
            LayerState::Sentinel(state) => state,
            other => return Err(other.mismatch(LayerId::Sentinel, Direction::Decrypt)),
        };
        let key = state.key_bytes(Direction::Decrypt)?;

        let body = if state.honeypot {
            strip_decoys(data, state)?
        } else {
            data.to_vec()
        };

        let mixed = match state.mode {
            ProtectionMode::Local => body,
            ProtectionMode::Advisor => {
                let advisor = self.advisor.as_ref().ok_or_else(|| {
                    InscriptError::bridge("envelope was protected by an advisor but none is configured")
                })?;
                let metadata = state.advisor_metadata.clone().unwrap_or(Value::Null);
                advisor.revert(&body, &metadata, ctx.cancel)?
            }
        };

        Ok(unmix(&mixed, &key))
    }
}

// ============================================================================
// Keyed bit mixing
// ============================================================================

fn mix(data: &[u8], key: &[u8]) -> Vec<u8> {
    data.iter()
        .enumerate()
        .map(|(i, &b)| {
            let k = key[i % key.len()];
            let x = (b ^ k).rotate_left(u32::from(k % 8));
            x.wrapping_add((i as u8).wrapping_mul(7))
        })
        .collect()
}

fn unmix(data: &[u8], key: &[u8]) -> Vec<u8> {
    data.iter()
        .enumerate()
        .map(|(i, &b)| {
            let k = key[i % key.len()];
            let x = b.wrapping_sub((i as u8).wrapping_mul(7));
            x.rotate_right(u32::from(k % 8)) ^ k
        })
        .collect()
}

// ============================================================================
// Honeypot decoys
// ============================================================================

fn decoy_offsets(len: usize) -> [usize; DECOY_COUNT] {
    std::array::from_fn(|k| len * (k + 1) / (DECOY_COUNT + 1))
}

fn closing_mark(watermark: &str) -> Vec<u8> {
    watermark.bytes().rev().collect()
}

fn plant_decoys(body: &[u8], state: &SentinelState) -> Vec<u8> {
    let extra: usize = state.decoys.iter().map(String::len).sum::<usize>() + 2 * state.watermark.len();
    let mut out = Vec::with_capacity(body.len() + extra);

    out.extend_from_slice(state.watermark.as_bytes());
    let mut cursor = 0;
    for (offset, decoy) in decoy_offsets(body.len()).iter().zip(&state.decoys) {
        out.extend_from_slice(&body[cursor..*offset]);
        out.extend_from_slice(decoy.as_bytes());
        cursor = *offset;
    }
    out.extend_from_slice(&body[cursor..]);
    out.extend_from_slice(&closing_mark(&state.watermark));
    out
}

fn strip_decoys(data: &[u8], state: &SentinelState) -> Result<Vec<u8>> {
    let tampered = |reason: &str| InscriptError::integrity(LayerId::Sentinel, Direction::Decrypt, reason);

    if state.decoys.len() != DECOY_COUNT {
        return Err(InscriptError::state_mismatch(
            LayerId::Sentinel,
            Direction::Decrypt,
            format!("expected {} decoys, found {}", DECOY_COUNT, state.decoys.len()),
        ));
    }

    let opening = state.watermark.as_bytes();
    let closing = closing_mark(&state.watermark);
    let overhead = state.decoys.iter().map(String::len).sum::<usize>() + opening.len() + closing.len();
    let body_len = data
        .len()
        .checked_sub(overhead)
        .ok_or_else(|| tampered("stream is shorter than its markers"))?;

    if !data.starts_with(opening) {
        return Err(tampered("opening watermark missing"));
    }
    if !data.ends_with(&closing) {
        return Err(tampered("closing watermark missing"));
    }

    let inner = &data[opening.len()..data.len() - closing.len()];
    let mut body = Vec::with_capacity(body_len);
    let mut pos = 0;
    let mut cursor = 0;
    for (offset, decoy) in decoy_offsets(body_len).iter().zip(&state.decoys) {
        let segment = offset - cursor;
        body.extend_from_slice(&inner[pos..pos + segment]);
        pos += segment;
        if !inner[pos..].starts_with(decoy.as_bytes()) {
            return Err(tampered("decoy marker missing or moved"));
        }
        pos += decoy.len();
        cursor = *offset;
    }
    body.extend_from_slice(&inner[pos..]);
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advisor::{LocalAdvisor, ProtectedOutput};
    use crate::cancel::CancelToken;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    /// Provider that always reports the bridge as down
    struct DownAdvisor;

    impl ProtectionProvider for DownAdvisor {
        fn mode(&self) -> &'static str {
            "subprocess"
        }

        fn is_available(&self) -> bool {
            false
        }

        fn protect(&self, _: &[u8], _: &Value, _: &CancelToken) -> Result<ProtectedOutput> {
            Err(InscriptError::bridge("advisor exited with status 3"))
        }

        fn revert(&self, _: &[u8], _: &Value, _: &CancelToken) -> Result<Vec<u8>> {
            Err(InscriptError::bridge("advisor exited with status 3"))
        }
    }

    fn roundtrip(layer: &SentinelLayer, data: &[u8], seed: u64) -> (Vec<u8>, SentinelState) {
        let cancel = CancelToken::new();
        let ctx = LayerContext::new(&cancel);
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let state = layer.generate_state(&mut rng);
        let (out, snapshot) = layer.apply(state, data, &ctx).unwrap();
        assert_eq!(layer.reverse(&snapshot, &out, &ctx).unwrap(), data);
        match snapshot {
            LayerState::Sentinel(state) => (out, state),
            other => panic!("unexpected state {:?}", other),
        }
    }

    #[test]
    fn test_mix_inverts() {
        let key: Vec<u8> = (0..32u8).map(|i| i.wrapping_mul(13)).collect();
        let data: Vec<u8> = (0..=255).collect();
        assert_eq!(unmix(&mix(&data, &key), &key), data);
    }

    #[test]
    fn test_local_roundtrip_with_and_without_honeypot() {
        for honeypot in [true, false] {
            let layer = SentinelLayer::new(None, honeypot);
            for len in [0usize, 1, 2, 3, 4, 5, 17, 300] {
                let data: Vec<u8> = (0..len).map(|i| (i * 5) as u8).collect();
                let (_, state) = roundtrip(&layer, &data, len as u64);
                assert_eq!(state.mode, ProtectionMode::Local);
            }
        }
    }

    #[test]
    fn test_decoys_and_watermark_are_planted() {
        let layer = SentinelLayer::new(None, true);
        let (out, state) = roundtrip(&layer, b"sixteen byte str", 1);
        assert!(out.starts_with(state.watermark.as_bytes()));
        assert!(state.watermark.starts_with("SNK") && state.watermark.ends_with("END"));
        let text = String::from_utf8_lossy(&out);
        assert!(text.contains("SNEAKER_HONEYPOT_START:"));
        assert!(text.contains(":DECOY"));
        assert!(text.contains("FAKE_CREDENTIALS:admin:"));
    }

    #[test]
    fn test_altered_decoy_is_integrity_error() {
        let layer = SentinelLayer::new(None, true);
        let (mut out, state) = roundtrip(&layer, b"a body long enough to split", 2);
        // 27 body bytes put the first decoy after 6 of them
        let first_decoy = state.watermark.len() + 6;
        assert_eq!(out[first_decoy], b'S');
        out[first_decoy] = b'X';

        let cancel = CancelToken::new();
        let err = layer
            .reverse(&LayerState::Sentinel(state), &out, &LayerContext::new(&cancel))
            .unwrap_err();
        assert_eq!(err.error_code(), "INTEGRITY_ERROR");
    }

    #[test]
    fn test_truncated_stream_is_integrity_error() {
        let layer = SentinelLayer::new(None, true);
        let (out, state) = roundtrip(&layer, b"abc", 3);
        let cancel = CancelToken::new();
        let err = layer
            .reverse(&LayerState::Sentinel(state), &out[..10], &LayerContext::new(&cancel))
            .unwrap_err();
        assert_eq!(err.error_code(), "INTEGRITY_ERROR");
    }

    #[test]
    fn test_in_process_advisor_records_metadata() {
        let layer = SentinelLayer::new(Some(Arc::new(LocalAdvisor::new())), true);
        let (_, state) = roundtrip(&layer, b"{\"user\":\"alice\"}", 4);
        assert_eq!(state.mode, ProtectionMode::Advisor);
        let metadata = state.advisor_metadata.unwrap();
        assert_eq!(metadata["protection_level"], "basic");
    }

    #[test]
    fn test_bridge_failure_falls_back_to_local() {
        let layer = SentinelLayer::new(Some(Arc::new(DownAdvisor)), true);
        let (_, state) = roundtrip(&layer, b"still round trips", 5);
        assert_eq!(state.mode, ProtectionMode::Local);
        assert!(state.advisor_metadata.is_none());
    }

    #[test]
    fn test_advisor_envelope_without_advisor_is_bridge_error() {
        let protected = SentinelLayer::new(Some(Arc::new(LocalAdvisor::new())), false);
        let (out, state) = roundtrip(&protected, b"needs the advisor", 6);

        let bare = SentinelLayer::new(None, false);
        let cancel = CancelToken::new();
        let err = bare
            .reverse(&LayerState::Sentinel(state), &out, &LayerContext::new(&cancel))
            .unwrap_err();
        assert_eq!(err.error_code(), "BRIDGE_UNAVAILABLE");
    }

    #[test]
    fn test_threat_level_is_recorded() {
        let layer = SentinelLayer::default();
        let (_, state) = roundtrip(&layer, b"1 union select * from users", 7);
        assert_eq!(state.threat_level, 15);
    }

    #[test]
    fn test_base36() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
    }
}
