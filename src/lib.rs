//! Inscript - Layered Obfuscation Pipeline
//!
//! Inscript turns any JSON-serializable payload into a nested, integrity-checked
//! envelope by running it through three invertible layers:
//! - L1: quantum-fractal numeric transforms
//! - L2: rotor machine substitution
//! - L3: active protection with an optional external advisor
//!
//! # Architecture
//!
//! Each layer's output is sealed in an envelope carrying the state snapshot
//! needed to invert it, and that envelope's bytes become the next layer's
//! input. Decryption opens the envelopes from the outside in, verifying every
//! checksum before anything inside is trusted.
//!
//! The transforms are not cryptographically secure: snapshots carry their
//! seeds in plaintext.

pub mod advisor;
pub mod cancel;
pub mod cli;
pub mod envelope;
pub mod error;
pub mod layers;
pub mod pipeline;

pub use cancel::CancelToken;
pub use envelope::Envelope;
pub use error::{InscriptError, Result};
pub use layers::{Layer, LayerId, LayerState};
pub use pipeline::{Direction, Pipeline, PipelineConfig, PipelineSettings};
