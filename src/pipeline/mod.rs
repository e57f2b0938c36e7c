//! Pipeline Orchestrator Module
//!
//! Sequences the layers L1→L2→L3 on encrypt and L3→L2→L1 on decrypt, sealing
//! every layer's output in an envelope that becomes the next layer's input.

mod config;
mod history;
mod orchestrator;
mod tracker;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use config::{PipelineConfig, PipelineSettings};
pub use history::{
    LayerInfo, OperationHistory, OperationRecord, PipelineStatistics, DEFAULT_HISTORY_CAPACITY,
};
pub use orchestrator::{DecryptOptions, EncryptOptions, Pipeline, PipelineStatus};
pub use tracker::{PipelinePhase, RunTracker};

/// Which way data flows through the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Encrypt,
    Decrypt,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Encrypt => write!(f, "encrypt"),
            Direction::Decrypt => write!(f, "decrypt"),
        }
    }
}
