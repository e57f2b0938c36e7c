//! Integration Tests
//!
//! End-to-end tests for the inscript pipeline: round trips, determinism,
//! tamper detection and concurrent use.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;

use inscript::envelope::Envelope;
use inscript::layers::{Layer, LayerContext, LayerId};
use inscript::pipeline::{Pipeline, PipelineConfig, PipelineSettings};
use inscript::{CancelToken, InscriptError};
use pretty_assertions::assert_eq;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use test_case::test_case;

fn pipeline() -> Pipeline {
    Pipeline::new(PipelineSettings::default()).unwrap()
}

fn sample_payloads() -> Vec<Value> {
    vec![
        Value::Null,
        json!(""),
        json!(0),
        json!(-17.25),
        json!("plain text with ünïcödé and emoji 🗺"),
        json!([1, "two", null, false, {"three": 3}]),
        json!({
            "session": "5f8d0c",
            "user": {"name": "Lucía", "roles": ["editor", "viewer"]},
            "map": {"lat": 40.416775, "lng": -3.70379, "zoom": 12},
        }),
        json!({"blob": "x".repeat(5000)}),
    ]
}

// ============================================================================
// Round Trip Tests
// ============================================================================

#[test_case(1 ; "level one")]
#[test_case(2 ; "level two")]
#[test_case(3 ; "level three")]
fn test_roundtrip_all_payloads(level: u8) {
    let pipeline = pipeline();
    let config = PipelineConfig::for_level(level);

    for payload in sample_payloads() {
        let envelope = pipeline.encrypt(&payload, &config).unwrap();
        assert_eq!(envelope.capa, level);
        assert_eq!(pipeline.decrypt(&envelope, &config).unwrap(), payload);
    }
}

#[test]
fn test_roundtrip_through_json_text() {
    let pipeline = pipeline();
    let config = PipelineConfig::default();
    let payload = json!({"order": [3, 1, 2]});

    let text = pipeline.encrypt(&payload, &config).unwrap().to_json_string().unwrap();
    let envelope = Envelope::from_json_str(&text).unwrap();
    assert_eq!(pipeline.decrypt(&envelope, &config).unwrap(), payload);
}

#[test]
fn test_roundtrip_with_layer_subset() {
    let pipeline = pipeline();
    let config = PipelineConfig::for_level(3).with_layers([LayerId::Quantum, LayerId::Sentinel]);
    let payload = json!({"skip": "rotor"});

    let envelope = pipeline.encrypt(&payload, &config).unwrap();
    assert_eq!(pipeline.decrypt(&envelope, &config).unwrap(), payload);
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct Session {
    user_id: u64,
    username: String,
    scopes: Vec<String>,
}

#[test]
fn test_decrypt_as_typed_payload() {
    let pipeline = pipeline();
    let config = PipelineConfig::for_level(3);
    let session = Session {
        user_id: 42,
        username: "marta".to_string(),
        scopes: vec!["maps:read".to_string()],
    };

    let envelope = pipeline.encrypt(&session, &config).unwrap();
    let back: Session = pipeline.decrypt_as(&envelope, &config).unwrap();
    assert_eq!(back, session);

    let err = pipeline.decrypt_as::<Vec<u8>>(&envelope, &config).unwrap_err();
    assert_eq!(err.error_code(), "SERIALIZATION_ERROR");
}

#[test]
fn test_hashmap_payload_is_canonical() {
    let pipeline = pipeline();
    let config = PipelineConfig::for_level(3);
    let mut a = HashMap::new();
    let mut b = HashMap::new();
    for (k, v) in [("alpha", 1), ("beta", 2), ("gamma", 3), ("delta", 4)] {
        a.insert(k, v);
    }
    for (k, v) in [("delta", 4), ("gamma", 3), ("beta", 2), ("alpha", 1)] {
        b.insert(k, v);
    }

    let first = pipeline.encrypt_seeded(&a, &config, 11).unwrap();
    let second = pipeline.encrypt_seeded(&b, &config, 11).unwrap();
    assert_eq!(first, second);
}

// ============================================================================
// Determinism Tests
// ============================================================================

#[test_case(1)]
#[test_case(2)]
#[test_case(3)]
fn test_same_seed_same_envelope(level: u8) {
    let config = PipelineConfig::for_level(level);
    let payload = json!({"k": [1, 2, 3], "s": "deterministic"});

    let first = pipeline().encrypt_seeded(&payload, &config, 1234).unwrap();
    let second = pipeline().encrypt_seeded(&payload, &config, 1234).unwrap();
    assert_eq!(first.to_bytes().unwrap(), second.to_bytes().unwrap());

    let other = pipeline().encrypt_seeded(&payload, &config, 1235).unwrap();
    assert!(first != other);
}

#[test]
fn test_unseeded_calls_differ() {
    let pipeline = pipeline();
    let config = PipelineConfig::for_level(3);
    let first = pipeline.encrypt(&json!("same"), &config).unwrap();
    let second = pipeline.encrypt(&json!("same"), &config).unwrap();
    assert!(first.checksum != second.checksum);
}

// ============================================================================
// Tamper Detection Tests
// ============================================================================

#[test_case(1)]
#[test_case(2)]
#[test_case(3)]
fn test_outer_tampering_is_integrity_error(level: u8) {
    let pipeline = pipeline();
    let config = PipelineConfig::for_level(level);
    let envelope = pipeline.encrypt_seeded(&json!({"a": 1}), &config, 7).unwrap();

    let mut data = envelope.clone();
    let replacement = if data.data.starts_with('A') { "B" } else { "A" };
    data.data.replace_range(0..1, replacement);

    let mut metadata = envelope.clone();
    let field = metadata.metadata.as_object().unwrap().keys().next().unwrap().clone();
    metadata.metadata[field.as_str()] = json!("tampered");

    let mut capa = envelope.clone();
    capa.capa = if level == 1 { 2 } else { level - 1 };

    for tampered in [data, metadata, capa] {
        let err = pipeline.decrypt(&tampered, &config).unwrap_err();
        assert_eq!(err.error_code(), "INTEGRITY_ERROR", "{}", err);
        assert!(pipeline.verify(&tampered).is_err());
    }
    assert_eq!(pipeline.verify(&envelope).unwrap().as_u8(), level);
}

#[test]
fn test_nested_tampering_is_integrity_error() {
    let pipeline = pipeline();
    let config = PipelineConfig::for_level(2);
    let outer = pipeline.encrypt_seeded(&json!({"nested": true}), &config, 99).unwrap();

    // Rewrite the L1 envelope inside a validly resealed L2 envelope
    let rotor = pipeline.layer(LayerId::Rotor);
    let cancel = CancelToken::new();
    let ctx = LayerContext::new(&cancel);
    let (bytes, state) = outer.open(LayerId::Rotor).unwrap();
    let inner_bytes = rotor.reverse(&state, &bytes, &ctx).unwrap();

    let mut inner = Envelope::from_slice(&inner_bytes).unwrap();
    inner.metadata["chaos_seed"] = json!(1);
    let (out, snapshot) = rotor.apply(state, &inner.to_bytes().unwrap(), &ctx).unwrap();
    let resealed = Envelope::seal(&out, &snapshot).unwrap();

    assert_eq!(pipeline.verify(&resealed).unwrap(), LayerId::Rotor);
    let err = pipeline.decrypt(&resealed, &config).unwrap_err();
    assert_eq!(err.error_code(), "INTEGRITY_ERROR");
    assert_eq!(err.layer(), Some(LayerId::Quantum));
}

#[test]
fn test_version_change_is_malformed() {
    let pipeline = pipeline();
    let config = PipelineConfig::for_level(1);
    let mut envelope = pipeline.encrypt(&json!(1), &config).unwrap();
    envelope.version = "0.9".to_string();
    let err = pipeline.decrypt(&envelope, &config).unwrap_err();
    assert_eq!(err.error_code(), "MALFORMED_ENVELOPE");
}

// ============================================================================
// Level Mismatch Tests
// ============================================================================

#[test_case(1, 3)]
#[test_case(1, 2)]
#[test_case(3, 1)]
#[test_case(2, 3)]
fn test_level_mismatch_is_state_mismatch(encrypt_level: u8, decrypt_level: u8) {
    let pipeline = pipeline();
    let envelope = pipeline
        .encrypt(&json!("partial"), &PipelineConfig::for_level(encrypt_level))
        .unwrap();
    let err = pipeline
        .decrypt(&envelope, &PipelineConfig::for_level(decrypt_level))
        .unwrap_err();
    assert!(matches!(err, InscriptError::StateMismatch { .. }), "{}", err);
}

#[test]
fn test_serialization_error_runs_no_layer() {
    let pipeline = pipeline();
    let mut bad = HashMap::new();
    bad.insert((1, 2), "tuple keys");

    let err = pipeline.encrypt(&bad, &PipelineConfig::for_level(3)).unwrap_err();
    assert_eq!(err.error_code(), "SERIALIZATION_ERROR");
    assert!(pipeline.history().is_empty());
}

#[test]
fn test_non_finite_floats_are_rejected() {
    let pipeline = pipeline();
    let config = PipelineConfig::for_level(3);

    let err = pipeline.encrypt(&f64::NAN, &config).unwrap_err();
    assert_eq!(err.error_code(), "SERIALIZATION_ERROR");

    let err = pipeline.encrypt(&vec![f64::INFINITY, 1.0], &config).unwrap_err();
    assert_eq!(err.error_code(), "SERIALIZATION_ERROR");
    assert!(pipeline.history().is_empty());
}

// ============================================================================
// History Tests
// ============================================================================

#[test]
fn test_history_is_bounded() {
    let settings = PipelineSettings {
        history_capacity: 4,
        ..PipelineSettings::default()
    };
    let pipeline = Pipeline::new(settings).unwrap();
    let config = PipelineConfig::for_level(3);

    for i in 0..3 {
        pipeline.encrypt(&json!(i), &config).unwrap();
    }
    let history = pipeline.history();
    assert_eq!(history.len(), 4);
    assert_eq!(history.last().unwrap().layer_id, LayerId::Sentinel);

    pipeline.clear_history();
    assert_eq!(pipeline.statistics().total_records, 0);
}

#[test]
fn test_threat_score_reaches_history() {
    let pipeline = pipeline();
    let config = PipelineConfig::for_level(3);
    pipeline
        .encrypt(&json!({"q": "1 UNION SELECT password FROM users"}), &config)
        .unwrap();

    // L3 sees the sealed L2 envelope, not the raw payload
    let stats = pipeline.statistics();
    assert_eq!(stats.per_layer.get("L3"), Some(&1));
    assert!(pipeline.history()[2].threat_level.is_some());
}

// ============================================================================
// Concurrency Tests
// ============================================================================

#[test]
fn test_concurrent_calls_are_isolated() {
    let pipeline = Arc::new(pipeline());
    let config = PipelineConfig::for_level(3);

    let handles: Vec<_> = (0..8)
        .map(|worker| {
            let pipeline = Arc::clone(&pipeline);
            let config = config.clone();
            thread::spawn(move || {
                for round in 0..5 {
                    let payload = json!({"worker": worker, "round": round, "pad": "p".repeat(worker * 10)});
                    let envelope = pipeline.encrypt(&payload, &config).unwrap();
                    assert_eq!(pipeline.decrypt(&envelope, &config).unwrap(), payload);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let stats = pipeline.statistics();
    assert_eq!(stats.total_records, 100);
    assert_eq!(stats.encrypt_records + stats.decrypt_records, 100);
}

#[test]
fn test_layers_report_names() {
    let pipeline = pipeline();
    let names: Vec<&str> = LayerId::ALL.iter().map(|id| pipeline.layer(*id).name()).collect();
    assert_eq!(names, vec!["quantum-fractal", "rotor-machine", "sentinel"]);
}
