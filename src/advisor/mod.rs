//! Advisor bridge for the sentinel layer
//!
//! The sentinel layer can hand its mixed bytes to an external advisor for an
//! additional protection transform. Providers:
//! - [`SubprocessAdvisor`]: one child process per request, JSON over stdio
//! - [`LocalAdvisor`]: the built-in [`AdvisorService`] run in-process
//!
//! Any bridge failure on the encrypt path is recovered by the sentinel layer,
//! which keeps its local mixing and records mode `local`.

mod local;
pub mod protocol;
mod service;
mod subprocess;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cancel::CancelToken;
use crate::error::Result;

pub use local::LocalAdvisor;
pub use protocol::{AdvisorAction, AdvisorRequest, AdvisorResponse};
pub use service::{AdvisorService, ProtectionLevel, ADVISOR_VERSION};
pub use subprocess::SubprocessAdvisor;

/// Default advisor round-trip timeout
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// Output of a successful `protect` call
#[derive(Debug, Clone, PartialEq)]
pub struct ProtectedOutput {
    pub data: Vec<u8>,
    /// Opaque metadata the provider needs to revert
    pub metadata: Value,
}

/// An alternative protection transform for the sentinel layer
pub trait ProtectionProvider: Send + Sync {
    /// Short label used in status output
    fn mode(&self) -> &'static str;

    /// Check the provider without transforming anything
    fn is_available(&self) -> bool;

    fn protect(&self, data: &[u8], metadata: &Value, cancel: &CancelToken) -> Result<ProtectedOutput>;

    fn revert(&self, data: &[u8], metadata: &Value, cancel: &CancelToken) -> Result<Vec<u8>>;
}

/// Which provider the pipeline builds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdvisorKind {
    /// Local mixing only
    #[default]
    Disabled,
    InProcess,
    Subprocess,
}

/// Advisor bridge configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvisorConfig {
    pub kind: AdvisorKind,
    /// Executable for [`AdvisorKind::Subprocess`]
    pub command: Option<String>,
    pub args: Vec<String>,
    pub timeout_ms: u64,
    /// Revert every protected buffer once before trusting it
    pub verify_roundtrip: bool,
}

impl Default for AdvisorConfig {
    fn default() -> Self {
        Self {
            kind: AdvisorKind::Disabled,
            command: None,
            args: Vec::new(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            verify_roundtrip: true,
        }
    }
}

impl AdvisorConfig {
    pub fn subprocess(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            kind: AdvisorKind::Subprocess,
            command: Some(command.into()),
            args,
            ..Self::default()
        }
    }

    pub fn in_process() -> Self {
        Self {
            kind: AdvisorKind::InProcess,
            ..Self::default()
        }
    }

    /// Build the configured provider; `None` means local mixing only
    pub fn build(&self) -> Option<Arc<dyn ProtectionProvider>> {
        match self.kind {
            AdvisorKind::Disabled => None,
            AdvisorKind::InProcess => Some(Arc::new(LocalAdvisor::new())),
            AdvisorKind::Subprocess => match self.command.as_deref() {
                Some(command) if !command.trim().is_empty() => {
                    Some(Arc::new(SubprocessAdvisor::from_config(command, self)))
                }
                _ => {
                    tracing::warn!("subprocess advisor configured without a command, using local mixing");
                    None
                }
            },
        }
    }
}
