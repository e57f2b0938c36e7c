//! Bounded operation history and statistics

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Direction;
use crate::layers::LayerId;

/// Default number of records kept
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// One layer transition of one pipeline call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRecord {
    /// Shared by every record of the same call
    pub operation_id: Uuid,
    pub layer_id: LayerId,
    pub direction: Direction,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: f64,
    pub bytes_in: usize,
    pub bytes_out: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threat_level: Option<u8>,
}

/// Ring buffer of records; the oldest entry is evicted first
#[derive(Debug, Clone)]
pub struct OperationHistory {
    records: VecDeque<OperationRecord>,
    capacity: usize,
}

impl Default for OperationHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl OperationHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, record: OperationRecord) {
        while self.records.len() >= self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Oldest first
    pub fn iter(&self) -> impl Iterator<Item = &OperationRecord> {
        self.records.iter()
    }

    pub fn snapshot(&self) -> Vec<OperationRecord> {
        self.records.iter().cloned().collect()
    }

    pub fn statistics(&self) -> PipelineStatistics {
        let mut stats = PipelineStatistics {
            total_records: self.records.len(),
            history_capacity: self.capacity,
            ..PipelineStatistics::default()
        };

        let mut total_duration = 0.0;
        for record in &self.records {
            match record.direction {
                Direction::Encrypt => stats.encrypt_records += 1,
                Direction::Decrypt => stats.decrypt_records += 1,
            }
            *stats.per_layer.entry(record.layer_id.to_string()).or_insert(0) += 1;
            if record.threat_level.map_or(false, |level| level > 0) {
                stats.threats_detected += 1;
            }
            total_duration += record.duration_ms;
        }

        if !self.records.is_empty() {
            stats.average_duration_ms = total_duration / self.records.len() as f64;
        }
        stats.last_record = self.records.back().cloned();
        stats
    }
}

/// Name and version of one layer template
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerInfo {
    pub id: LayerId,
    pub name: String,
    pub version: String,
}

/// Summary of the records currently held
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineStatistics {
    pub total_records: usize,
    pub encrypt_records: usize,
    pub decrypt_records: usize,
    /// Records per layer, keyed `L1`..`L3`
    pub per_layer: BTreeMap<String, usize>,
    pub threats_detected: usize,
    pub average_duration_ms: f64,
    pub history_capacity: usize,
    pub last_record: Option<OperationRecord>,
    /// Filled by the pipeline
    #[serde(default)]
    pub layers: Vec<LayerInfo>,
}
