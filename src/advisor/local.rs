//! In-process advisor

use serde_json::Value;

use super::service::AdvisorService;
use super::{ProtectedOutput, ProtectionProvider};
use crate::cancel::CancelToken;
use crate::error::{InscriptError, Result};
use crate::layers::LayerId;

/// Runs [`AdvisorService`] on the calling thread
#[derive(Debug, Clone, Default)]
pub struct LocalAdvisor {
    service: AdvisorService,
}

impl LocalAdvisor {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProtectionProvider for LocalAdvisor {
    fn mode(&self) -> &'static str {
        "in-process"
    }

    fn is_available(&self) -> bool {
        true
    }

    fn protect(&self, data: &[u8], metadata: &Value, cancel: &CancelToken) -> Result<ProtectedOutput> {
        if cancel.is_cancelled() {
            return Err(InscriptError::Cancelled {
                layer: LayerId::Sentinel,
            });
        }
        let (data, metadata) = self.service.protect(data, metadata)?;
        Ok(ProtectedOutput { data, metadata })
    }

    fn revert(&self, data: &[u8], metadata: &Value, cancel: &CancelToken) -> Result<Vec<u8>> {
        if cancel.is_cancelled() {
            return Err(InscriptError::Cancelled {
                layer: LayerId::Sentinel,
            });
        }
        self.service.revert(data, metadata)
    }
}
