//! Layer Model Module
//!
//! Implements the three transformation layers:
//! - L1: quantum-fractal numeric transforms
//! - L2: rotor machine substitution
//! - L3: active protection (keyed mixing, advisor bridge, decoys)
//!
//! Layers are immutable templates. Every operation draws a fresh
//! [`LayerState`] from a seeded generator, threads it through `apply`, and
//! records it in the envelope so `reverse` never consults ambient entropy.

pub(crate) mod primitives;
mod quantum;
mod rotor;
mod sentinel;
pub mod threat;

use std::fmt;

use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cancel::CancelToken;
use crate::error::{InscriptError, Result};
use crate::pipeline::Direction;

pub use quantum::{QuantumLayer, QuantumState, DEFAULT_DIMENSIONS, QUANTUM_LAYER_VERSION};
pub use rotor::{
    RotorLayer, RotorPool, RotorState, DEFAULT_POOL_SEED, DEFAULT_ROTATION_INTERVAL,
    DEFAULT_ROTOR_COUNT, ROTOR_ALPHABET, ROTOR_LAYER_VERSION,
};
pub use sentinel::{ProtectionMode, SentinelLayer, SentinelState, SENTINEL_LAYER_VERSION};

/// Identifier of a pipeline layer (the envelope's `capa` field)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum LayerId {
    Quantum = 1,
    Rotor = 2,
    Sentinel = 3,
}

impl LayerId {
    /// All layers in encrypt order
    pub const ALL: [LayerId; 3] = [LayerId::Quantum, LayerId::Rotor, LayerId::Sentinel];

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(LayerId::Quantum),
            2 => Some(LayerId::Rotor),
            3 => Some(LayerId::Sentinel),
            _ => None,
        }
    }
}

impl TryFrom<u8> for LayerId {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        LayerId::from_u8(value).ok_or_else(|| format!("unknown layer id {}", value))
    }
}

impl From<LayerId> for u8 {
    fn from(id: LayerId) -> Self {
        id.as_u8()
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.as_u8())
    }
}

/// Per-operation state snapshot of one layer
#[derive(Debug, Clone, PartialEq)]
pub enum LayerState {
    Quantum(QuantumState),
    Rotor(RotorState),
    Sentinel(SentinelState),
}

impl LayerState {
    /// Layer this state belongs to
    pub fn layer_id(&self) -> LayerId {
        match self {
            LayerState::Quantum(_) => LayerId::Quantum,
            LayerState::Rotor(_) => LayerId::Rotor,
            LayerState::Sentinel(_) => LayerId::Sentinel,
        }
    }

    /// Render the state as the envelope `metadata` object
    pub fn to_metadata(&self) -> Result<Value> {
        let value = match self {
            LayerState::Quantum(state) => serde_json::to_value(state)?,
            LayerState::Rotor(state) => serde_json::to_value(state)?,
            LayerState::Sentinel(state) => serde_json::to_value(state)?,
        };
        Ok(value)
    }

    /// Rebuild the state of `layer` from an envelope `metadata` object
    pub fn from_metadata(layer: LayerId, metadata: &Value) -> Result<Self> {
        let parsed = match layer {
            LayerId::Quantum => serde_json::from_value(metadata.clone()).map(LayerState::Quantum),
            LayerId::Rotor => serde_json::from_value(metadata.clone()).map(LayerState::Rotor),
            LayerId::Sentinel => {
                serde_json::from_value(metadata.clone()).map(LayerState::Sentinel)
            }
        };
        parsed.map_err(|e| {
            InscriptError::state_mismatch(
                layer,
                Direction::Decrypt,
                format!("metadata is not a {} state: {}", layer, e),
            )
        })
    }

    fn mismatch(&self, expected: LayerId, direction: Direction) -> InscriptError {
        InscriptError::state_mismatch(
            expected,
            direction,
            format!("received a {} state snapshot", self.layer_id()),
        )
    }
}

/// Per-call context handed to every layer
#[derive(Debug, Clone, Copy)]
pub struct LayerContext<'a> {
    pub cancel: &'a CancelToken,
}

impl<'a> LayerContext<'a> {
    pub fn new(cancel: &'a CancelToken) -> Self {
        Self { cancel }
    }
}

/// A seedable, invertible transformation stage
///
/// `reverse(state, apply(state, data).0) == data` must hold for every state
/// produced by `generate_state` or returned by `apply`, and for input of any
/// length.
pub trait Layer: Send + Sync {
    /// Layer identifier (envelope `capa`)
    fn id(&self) -> LayerId;

    /// Human-readable layer name
    fn name(&self) -> &'static str;

    /// Layer implementation version
    fn version(&self) -> &'static str;

    /// Draw a fresh per-operation state
    fn generate_state(&self, rng: &mut dyn RngCore) -> LayerState;

    /// Transform `data`, returning the output and the state to snapshot
    fn apply(
        &self,
        state: LayerState,
        data: &[u8],
        ctx: &LayerContext<'_>,
    ) -> Result<(Vec<u8>, LayerState)>;

    /// Invert `apply` using only the recorded snapshot
    fn reverse(&self, state: &LayerState, data: &[u8], ctx: &LayerContext<'_>) -> Result<Vec<u8>>;
}
