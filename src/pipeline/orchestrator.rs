//! The pipeline: layer sequencing, envelope nesting and history

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use chrono::Utc;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::history::{LayerInfo, OperationHistory, OperationRecord, PipelineStatistics};
use super::tracker::RunTracker;
use super::{Direction, PipelineConfig, PipelineSettings};
use crate::advisor::ProtectionProvider;
use crate::cancel::CancelToken;
use crate::envelope::{from_canonical_bytes, to_canonical_bytes, Envelope};
use crate::error::{InscriptError, Result};
use crate::layers::{
    Layer, LayerContext, LayerId, LayerState, QuantumLayer, RotorLayer, SentinelLayer,
};

/// Options for one encrypt call
#[derive(Debug, Clone, Default)]
pub struct EncryptOptions {
    /// Seed for every layer state; random when `None`
    pub seed: Option<u64>,
    pub cancel: CancelToken,
}

/// Options for one decrypt call
#[derive(Debug, Clone, Default)]
pub struct DecryptOptions {
    pub cancel: CancelToken,
}

/// Layer and advisor overview
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStatus {
    pub layers: Vec<LayerInfo>,
    /// `subprocess`, `in-process` or `local`
    pub advisor_mode: String,
    pub advisor_available: bool,
    pub honeypot: bool,
    pub history_len: usize,
    pub history_capacity: usize,
}

/// Three-layer obfuscation pipeline
///
/// Layer templates are immutable and shared by every call; the history ring
/// buffer is the only shared mutable state.
pub struct Pipeline {
    layers: Vec<Box<dyn Layer>>,
    advisor: Option<Arc<dyn ProtectionProvider>>,
    honeypot: bool,
    history: Mutex<OperationHistory>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("layers", &self.layers.iter().map(|l| l.name()).collect::<Vec<_>>())
            .field("advisor", &self.advisor.as_ref().map(|a| a.mode()))
            .field("honeypot", &self.honeypot)
            .finish()
    }
}

impl Pipeline {
    /// Build from settings, including the configured advisor
    pub fn new(settings: PipelineSettings) -> Result<Self> {
        let advisor = settings.advisor.build();
        Self::with_advisor(settings, advisor)
    }

    /// Build from settings with an explicit advisor (or none)
    pub fn with_advisor(
        settings: PipelineSettings,
        advisor: Option<Arc<dyn ProtectionProvider>>,
    ) -> Result<Self> {
        settings.validate()?;

        let layers: Vec<Box<dyn Layer>> = vec![
            Box::new(QuantumLayer::new(settings.quantum_dimensions)),
            Box::new(RotorLayer::new(settings.rotor_pool_seed, settings.rotor_count)),
            Box::new(SentinelLayer::new(advisor.clone(), settings.honeypot)),
        ];

        tracing::debug!(
            rotor_count = settings.rotor_count,
            dimensions = settings.quantum_dimensions,
            advisor = advisor.as_ref().map(|a| a.mode()).unwrap_or("local"),
            "pipeline built"
        );

        Ok(Self {
            layers,
            advisor,
            honeypot: settings.honeypot,
            history: Mutex::new(OperationHistory::new(settings.history_capacity)),
        })
    }

    /// Layer template for `id`
    pub fn layer(&self, id: LayerId) -> &dyn Layer {
        self.layers[usize::from(id.as_u8()) - 1].as_ref()
    }

    pub fn layer_info(&self) -> Vec<LayerInfo> {
        self.layers
            .iter()
            .map(|layer| LayerInfo {
                id: layer.id(),
                name: layer.name().to_string(),
                version: layer.version().to_string(),
            })
            .collect()
    }

    // ========================================================================
    // Encrypt
    // ========================================================================

    pub fn encrypt<T: Serialize + ?Sized>(
        &self,
        payload: &T,
        config: &PipelineConfig,
    ) -> Result<Envelope> {
        self.encrypt_with(payload, config, &EncryptOptions::default())
    }

    /// Encrypt with every layer state drawn from `seed`
    pub fn encrypt_seeded<T: Serialize + ?Sized>(
        &self,
        payload: &T,
        config: &PipelineConfig,
        seed: u64,
    ) -> Result<Envelope> {
        let options = EncryptOptions {
            seed: Some(seed),
            ..EncryptOptions::default()
        };
        self.encrypt_with(payload, config, &options)
    }

    pub fn encrypt_with<T: Serialize + ?Sized>(
        &self,
        payload: &T,
        config: &PipelineConfig,
        options: &EncryptOptions,
    ) -> Result<Envelope> {
        let active = config.active_layers()?;
        let bytes = to_canonical_bytes(payload)?;
        let seed = options.seed.unwrap_or_else(rand::random);
        let operation_id = Uuid::new_v4();
        let mut tracker = RunTracker::new(Direction::Encrypt);

        let result = self.run_encrypt(bytes, &active, seed, operation_id, &options.cancel, &mut tracker);
        self.settle(result, tracker, operation_id, config)
    }

    fn run_encrypt(
        &self,
        mut bytes: Vec<u8>,
        active: &[LayerId],
        seed: u64,
        operation_id: Uuid,
        cancel: &CancelToken,
        tracker: &mut RunTracker,
    ) -> Result<(Envelope, Vec<OperationRecord>)> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let ctx = LayerContext::new(cancel);
        let mut records = Vec::with_capacity(active.len());
        let mut sealed = None;

        for &id in active {
            if cancel.is_cancelled() {
                return Err(InscriptError::Cancelled { layer: id });
            }
            tracker.enter(id)?;

            let layer = self.layer(id);
            let started = Instant::now();
            let state = layer.generate_state(&mut rng);
            let (out, snapshot) = layer.apply(state, &bytes, &ctx)?;
            let envelope = Envelope::seal(&out, &snapshot)?;
            let next = envelope.to_bytes()?;

            tracing::debug!(layer = %id, bytes_in = bytes.len(), bytes_out = next.len(), "layer applied");
            records.push(record(operation_id, id, Direction::Encrypt, started, bytes.len(), next.len(), &snapshot));

            bytes = next;
            sealed = Some(envelope);
        }

        let envelope = sealed.ok_or_else(|| InscriptError::Internal("no layer ran".to_string()))?;
        Ok((envelope, records))
    }

    // ========================================================================
    // Decrypt
    // ========================================================================

    pub fn decrypt(&self, envelope: &Envelope, config: &PipelineConfig) -> Result<Value> {
        self.decrypt_with(envelope, config, &DecryptOptions::default())
    }

    pub fn decrypt_with(
        &self,
        envelope: &Envelope,
        config: &PipelineConfig,
        options: &DecryptOptions,
    ) -> Result<Value> {
        let active = config.active_layers()?;
        let operation_id = Uuid::new_v4();
        let mut tracker = RunTracker::new(Direction::Decrypt);

        let result = self
            .run_decrypt(envelope, &active, operation_id, &options.cancel, &mut tracker)
            .and_then(|(bytes, records)| {
                let innermost = active[0];
                let payload = from_canonical_bytes::<Value>(&bytes).map_err(|e| {
                    InscriptError::state_mismatch(
                        innermost,
                        Direction::Decrypt,
                        format!("recovered bytes are not a payload: {}", e),
                    )
                })?;
                Ok((payload, records))
            });
        self.settle(result, tracker, operation_id, config)
    }

    /// Decrypt and deserialize into `T`
    pub fn decrypt_as<T: DeserializeOwned>(
        &self,
        envelope: &Envelope,
        config: &PipelineConfig,
    ) -> Result<T> {
        let value = self.decrypt(envelope, config)?;
        serde_json::from_value(value).map_err(|e| InscriptError::Serialization {
            reason: format!("payload does not match the requested type: {}", e),
        })
    }

    fn run_decrypt(
        &self,
        outer: &Envelope,
        active: &[LayerId],
        operation_id: Uuid,
        cancel: &CancelToken,
        tracker: &mut RunTracker,
    ) -> Result<(Vec<u8>, Vec<OperationRecord>)> {
        let ctx = LayerContext::new(cancel);
        let mut records = Vec::with_capacity(active.len());
        let mut envelope = outer.clone();
        let mut recovered = Vec::new();

        for (step, &id) in active.iter().rev().enumerate() {
            if cancel.is_cancelled() {
                return Err(InscriptError::Cancelled { layer: id });
            }
            tracker.enter(id)?;

            let layer = self.layer(id);
            let started = Instant::now();
            let (bytes, state) = envelope.open(id)?;
            let out = layer.reverse(&state, &bytes, &ctx)?;

            tracing::debug!(layer = %id, bytes_in = bytes.len(), bytes_out = out.len(), "layer reversed");
            records.push(record(operation_id, id, Direction::Decrypt, started, bytes.len(), out.len(), &state));

            if step + 1 < active.len() {
                envelope = Envelope::from_slice(&out).map_err(|e| {
                    InscriptError::state_mismatch(
                        id,
                        Direction::Decrypt,
                        format!("layer output is not an inner envelope: {}", e),
                    )
                })?;
            } else {
                recovered = out;
            }
        }

        Ok((recovered, records))
    }

    /// Close the tracker, log the outcome and commit records on success
    fn settle<T>(
        &self,
        result: Result<(T, Vec<OperationRecord>)>,
        mut tracker: RunTracker,
        operation_id: Uuid,
        config: &PipelineConfig,
    ) -> Result<T> {
        let direction = tracker.direction();
        let (value, records) = match result.and_then(|ok| tracker.finish().map(|_| ok)) {
            Ok(ok) => ok,
            Err(e) => {
                tracker.fail();
                tracing::warn!(
                    %operation_id,
                    %direction,
                    code = e.error_code(),
                    error = %e,
                    "pipeline call failed"
                );
                return Err(e);
            }
        };

        tracing::info!(
            %operation_id,
            %direction,
            level = config.security_level,
            layers = records.len(),
            "pipeline call complete"
        );

        let mut history = self.history_guard();
        for record in records {
            history.push(record);
        }
        Ok(value)
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    /// Check the outer envelope's version and checksum only
    pub fn verify(&self, envelope: &Envelope) -> Result<LayerId> {
        envelope.verify()
    }

    pub fn statistics(&self) -> PipelineStatistics {
        let mut stats = self.history_guard().statistics();
        stats.layers = self.layer_info();
        stats
    }

    /// Records currently held, oldest first
    pub fn history(&self) -> Vec<OperationRecord> {
        self.history_guard().snapshot()
    }

    pub fn clear_history(&self) {
        self.history_guard().clear();
    }

    pub fn status(&self) -> PipelineStatus {
        let (advisor_mode, advisor_available) = match &self.advisor {
            Some(advisor) => (advisor.mode().to_string(), advisor.is_available()),
            None => ("local".to_string(), true),
        };
        let history = self.history_guard();
        PipelineStatus {
            layers: self.layer_info(),
            advisor_mode,
            advisor_available,
            honeypot: self.honeypot,
            history_len: history.len(),
            history_capacity: history.capacity(),
        }
    }

    fn history_guard(&self) -> MutexGuard<'_, OperationHistory> {
        self.history
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn record(
    operation_id: Uuid,
    layer_id: LayerId,
    direction: Direction,
    started: Instant,
    bytes_in: usize,
    bytes_out: usize,
    state: &LayerState,
) -> OperationRecord {
    let threat_level = match state {
        LayerState::Sentinel(state) => Some(state.threat_level),
        _ => None,
    };
    OperationRecord {
        operation_id,
        layer_id,
        direction,
        timestamp: Utc::now(),
        duration_ms: started.elapsed().as_secs_f64() * 1000.0,
        bytes_in,
        bytes_out,
        threat_level,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pipeline() -> Pipeline {
        Pipeline::new(PipelineSettings::default()).unwrap()
    }

    #[test]
    fn test_pipeline_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Pipeline>();
    }

    #[test]
    fn test_roundtrip_records_history() {
        let pipeline = pipeline();
        let config = PipelineConfig::for_level(3);
        let payload = json!({"user": "ana", "roles": ["admin"], "zoom": 12.5});

        let envelope = pipeline.encrypt(&payload, &config).unwrap();
        assert_eq!(envelope.capa, 3);
        assert_eq!(pipeline.decrypt(&envelope, &config).unwrap(), payload);

        let stats = pipeline.statistics();
        assert_eq!(stats.encrypt_records, 3);
        assert_eq!(stats.decrypt_records, 3);
        assert_eq!(stats.layers.len(), 3);

        let history = pipeline.history();
        assert!(history[..3].iter().all(|r| r.operation_id == history[0].operation_id));
        assert_ne!(history[0].operation_id, history[3].operation_id);
        assert!(history[2].threat_level.is_some());
    }

    #[test]
    fn test_failed_call_leaves_no_records() {
        let pipeline = pipeline();
        let envelope = pipeline.encrypt_seeded(&json!(1), &PipelineConfig::for_level(1), 5).unwrap();
        pipeline.clear_history();

        let err = pipeline.decrypt(&envelope, &PipelineConfig::for_level(3)).unwrap_err();
        assert_eq!(err.error_code(), "STATE_MISMATCH");
        assert!(pipeline.history().is_empty());
    }

    #[test]
    fn test_cancelled_before_start() {
        let pipeline = pipeline();
        let options = EncryptOptions::default();
        options.cancel.cancel();
        let err = pipeline
            .encrypt_with(&json!("x"), &PipelineConfig::for_level(2), &options)
            .unwrap_err();
        assert!(matches!(err, InscriptError::Cancelled { layer: LayerId::Quantum }));
    }

    #[test]
    fn test_status_without_advisor() {
        let status = pipeline().status();
        assert_eq!(status.advisor_mode, "local");
        assert!(status.advisor_available);
        assert_eq!(status.history_capacity, 100);
    }

    #[test]
    fn test_invalid_settings_are_rejected() {
        let settings = PipelineSettings {
            rotor_count: 1,
            ..PipelineSettings::default()
        };
        assert_eq!(Pipeline::new(settings).unwrap_err().error_code(), "INVALID_CONFIG");
    }
}
