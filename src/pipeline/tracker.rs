//! Per-call phase tracking

use serde::{Deserialize, Serialize};

use super::Direction;
use crate::error::{InscriptError, Result};
use crate::layers::LayerId;

/// Where a pipeline call currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "phase", content = "layer")]
pub enum PipelinePhase {
    Idle,
    RunningLayer(LayerId),
    Done,
    Failed,
}

/// State machine `Idle → RunningLayer(..) → Done | Failed`
///
/// Layers must be entered in pipeline order for the call's direction:
/// ascending on encrypt, descending on decrypt.
#[derive(Debug, Clone)]
pub struct RunTracker {
    direction: Direction,
    phase: PipelinePhase,
    visited: Vec<LayerId>,
}

impl RunTracker {
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            phase: PipelinePhase::Idle,
            visited: Vec::new(),
        }
    }

    pub fn phase(&self) -> PipelinePhase {
        self.phase
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Layers entered so far, in order
    pub fn visited(&self) -> &[LayerId] {
        &self.visited
    }

    pub fn enter(&mut self, layer: LayerId) -> Result<()> {
        let allowed = match (self.phase, self.direction) {
            (PipelinePhase::Idle, _) => true,
            (PipelinePhase::RunningLayer(current), Direction::Encrypt) => layer > current,
            (PipelinePhase::RunningLayer(current), Direction::Decrypt) => layer < current,
            (PipelinePhase::Done, _) | (PipelinePhase::Failed, _) => false,
        };
        if !allowed {
            return Err(self.illegal(&format!("enter {}", layer)));
        }
        self.phase = PipelinePhase::RunningLayer(layer);
        self.visited.push(layer);
        Ok(())
    }

    pub fn finish(&mut self) -> Result<()> {
        match self.phase {
            PipelinePhase::RunningLayer(_) => {
                self.phase = PipelinePhase::Done;
                Ok(())
            }
            _ => Err(self.illegal("finish")),
        }
    }

    /// Mark the call failed; terminal phases are left alone
    pub fn fail(&mut self) {
        if !matches!(self.phase, PipelinePhase::Done) {
            self.phase = PipelinePhase::Failed;
        }
    }

    fn illegal(&self, transition: &str) -> InscriptError {
        InscriptError::Internal(format!(
            "illegal {} transition: {} from {:?}",
            self.direction, transition, self.phase
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_walks_upwards() {
        let mut tracker = RunTracker::new(Direction::Encrypt);
        tracker.enter(LayerId::Quantum).unwrap();
        tracker.enter(LayerId::Sentinel).unwrap();
        assert!(tracker.enter(LayerId::Rotor).is_err());
        tracker.finish().unwrap();
        assert_eq!(tracker.phase(), PipelinePhase::Done);
        assert_eq!(tracker.visited(), &[LayerId::Quantum, LayerId::Sentinel]);
    }

    #[test]
    fn test_decrypt_walks_downwards() {
        let mut tracker = RunTracker::new(Direction::Decrypt);
        tracker.enter(LayerId::Sentinel).unwrap();
        assert!(tracker.enter(LayerId::Sentinel).is_err());
        tracker.enter(LayerId::Rotor).unwrap();
        tracker.enter(LayerId::Quantum).unwrap();
        tracker.finish().unwrap();
    }

    #[test]
    fn test_terminal_phases_reject_transitions() {
        let mut tracker = RunTracker::new(Direction::Encrypt);
        assert!(tracker.finish().is_err());
        tracker.enter(LayerId::Quantum).unwrap();
        tracker.fail();
        assert_eq!(tracker.phase(), PipelinePhase::Failed);
        assert!(tracker.enter(LayerId::Rotor).is_err());
        assert!(tracker.finish().is_err());
    }
}
