//! Per-call configuration and pipeline settings

use std::collections::BTreeSet;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::history::DEFAULT_HISTORY_CAPACITY;
use crate::advisor::{AdvisorConfig, AdvisorKind};
use crate::error::{InscriptError, Result};
use crate::layers::{LayerId, DEFAULT_DIMENSIONS, DEFAULT_POOL_SEED, DEFAULT_ROTOR_COUNT};

/// Security level and layer selection for one call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub security_level: u8,
    pub enabled_layers: BTreeSet<LayerId>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::for_level(3)
    }
}

impl PipelineConfig {
    /// All layers enabled, capped by `security_level`
    pub fn for_level(security_level: u8) -> Self {
        Self {
            security_level,
            enabled_layers: LayerId::ALL.into_iter().collect(),
        }
    }

    pub fn with_layers(mut self, layers: impl IntoIterator<Item = LayerId>) -> Self {
        self.enabled_layers = layers.into_iter().collect();
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=3).contains(&self.security_level) {
            return Err(InscriptError::InvalidConfig {
                reason: format!("security level {} is outside 1..=3", self.security_level),
            });
        }
        Ok(())
    }

    /// Enabled layers within the security level, in encrypt order
    pub fn active_layers(&self) -> Result<Vec<LayerId>> {
        self.validate()?;
        let active: Vec<LayerId> = self
            .enabled_layers
            .iter()
            .copied()
            .filter(|id| id.as_u8() <= self.security_level)
            .collect();
        if active.is_empty() {
            return Err(InscriptError::InvalidConfig {
                reason: format!(
                    "no enabled layer is allowed at security level {}",
                    self.security_level
                ),
            });
        }
        Ok(active)
    }
}

/// Settings the layer templates and bridge are built from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub history_capacity: usize,
    pub rotor_pool_seed: u64,
    pub rotor_count: usize,
    pub quantum_dimensions: u8,
    pub honeypot: bool,
    pub advisor: AdvisorConfig,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            rotor_pool_seed: DEFAULT_POOL_SEED,
            rotor_count: DEFAULT_ROTOR_COUNT,
            quantum_dimensions: DEFAULT_DIMENSIONS,
            honeypot: true,
            advisor: AdvisorConfig::default(),
        }
    }
}

fn parse_var<T: FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.trim().parse().map_err(|_| InscriptError::InvalidConfig {
        reason: format!("{} has an invalid value {:?}", name, raw),
    })
}

fn parse_flag(name: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(InscriptError::InvalidConfig {
            reason: format!("{} must be a boolean, got {:?}", name, raw),
        }),
    }
}

impl PipelineSettings {
    /// Defaults overridden by `INSCRIPT_*` environment variables
    pub fn from_env() -> Result<Self> {
        let mut settings = Self::default();
        settings.apply_overrides(|name| std::env::var(name).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    /// Read settings from a JSON file, then apply environment overrides
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let mut settings: Self =
            serde_json::from_str(&text).map_err(|e| InscriptError::InvalidConfig {
                reason: format!("{}: {}", path.display(), e),
            })?;
        settings.apply_overrides(|name| std::env::var(name).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    /// Apply overrides from `lookup`, which maps variable names to values
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("INSCRIPT_HISTORY_CAPACITY") {
            self.history_capacity = parse_var("INSCRIPT_HISTORY_CAPACITY", &raw)?;
        }
        if let Some(raw) = lookup("INSCRIPT_ROTOR_POOL_SEED") {
            self.rotor_pool_seed = parse_var("INSCRIPT_ROTOR_POOL_SEED", &raw)?;
        }
        if let Some(raw) = lookup("INSCRIPT_ROTOR_COUNT") {
            self.rotor_count = parse_var("INSCRIPT_ROTOR_COUNT", &raw)?;
        }
        if let Some(raw) = lookup("INSCRIPT_QUANTUM_DIMENSIONS") {
            self.quantum_dimensions = parse_var("INSCRIPT_QUANTUM_DIMENSIONS", &raw)?;
        }
        if let Some(raw) = lookup("INSCRIPT_HONEYPOT") {
            self.honeypot = parse_flag("INSCRIPT_HONEYPOT", &raw)?;
        }
        if let Some(command) = lookup("INSCRIPT_ADVISOR_COMMAND") {
            let command = command.trim().to_string();
            match command.as_str() {
                "" | "none" => self.advisor.kind = AdvisorKind::Disabled,
                "in-process" => self.advisor.kind = AdvisorKind::InProcess,
                _ => {
                    self.advisor.kind = AdvisorKind::Subprocess;
                    self.advisor.command = Some(command);
                }
            }
        }
        if let Some(raw) = lookup("INSCRIPT_ADVISOR_ARGS") {
            self.advisor.args = raw.split_whitespace().map(str::to_string).collect();
        }
        if let Some(raw) = lookup("INSCRIPT_ADVISOR_TIMEOUT_MS") {
            self.advisor.timeout_ms = parse_var("INSCRIPT_ADVISOR_TIMEOUT_MS", &raw)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.history_capacity == 0 {
            return Err(InscriptError::InvalidConfig {
                reason: "history capacity must be positive".to_string(),
            });
        }
        if !(3..=8).contains(&self.rotor_count) {
            return Err(InscriptError::InvalidConfig {
                reason: format!("rotor count {} is outside 3..=8", self.rotor_count),
            });
        }
        if !(1..=16).contains(&self.quantum_dimensions) {
            return Err(InscriptError::InvalidConfig {
                reason: format!(
                    "quantum dimensions {} is outside 1..=16",
                    self.quantum_dimensions
                ),
            });
        }
        if self.advisor.timeout_ms == 0 {
            return Err(InscriptError::InvalidConfig {
                reason: "advisor timeout must be positive".to_string(),
            });
        }
        Ok(())
    }
}
