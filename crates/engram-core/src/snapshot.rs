//! JSON wire format for a whole engine: codebook, compact records and the
//! synapse edge list.
//!
//! Records carry their weights as a `(target, weight)` list in camelCase, so
//! the file stays readable and stable across versions.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::graph::SynapseGraph;
use crate::id::NeuronId;
use crate::quantizer::{CodebookSnapshot, VectorQuantizer};
use crate::record::CompactNeuron;
use crate::synapse::SynapseRecord;

pub const CURRENT_VERSION: &str = "1.0";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EngineSnapshot {
    pub version: String,
    #[serde(default)]
    pub exported_at: u64,
    pub codebook: CodebookSnapshot,
    #[serde(default)]
    pub records: Vec<WireRecord>,
    #[serde(default)]
    pub synapses: Vec<SynapseRecord>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WireRecord {
    pub id: NeuronId,
    pub code: u32,
    #[serde(default)]
    pub weights: Vec<WireWeight>,
    #[serde(default)]
    pub importance: f32,
    #[serde(default)]
    pub activation_count: u64,
    #[serde(default)]
    pub cluster_id: Option<u32>,
    #[serde(default)]
    pub concept_tag: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct WireWeight {
    pub target: NeuronId,
    pub weight: f32,
}

impl From<&CompactNeuron> for WireRecord {
    fn from(record: &CompactNeuron) -> Self {
        Self {
            id: record.id,
            code: record.code,
            weights: record
                .weights
                .iter()
                .map(|(&target, &weight)| WireWeight { target, weight })
                .collect(),
            importance: record.importance,
            activation_count: record.activation_count,
            cluster_id: record.cluster_id,
            concept_tag: record.concept_tag.clone(),
        }
    }
}

impl WireRecord {
    /// Convert to a record, checking the code range and the weight list.
    pub fn into_record(self, codebook_size: usize) -> Result<CompactNeuron> {
        if self.code as usize >= codebook_size {
            return Err(CoreError::CodeOutOfRange {
                code: self.code,
                size: codebook_size,
            });
        }
        let mut weights = BTreeMap::new();
        for WireWeight { target, weight } in self.weights {
            if target == self.id {
                return Err(CoreError::SnapshotMismatch(format!(
                    "record {} has a self-edge",
                    self.id
                )));
            }
            if !weight.is_finite() {
                return Err(CoreError::SnapshotMismatch(format!(
                    "record {} has a non-finite weight to {target}",
                    self.id
                )));
            }
            if weights.insert(target, weight).is_some() {
                return Err(CoreError::SnapshotMismatch(format!(
                    "record {} lists {target} twice",
                    self.id
                )));
            }
        }
        Ok(CompactNeuron {
            id: self.id,
            code: self.code,
            weights,
            importance: self.importance,
            activation_count: self.activation_count,
            cluster_id: self.cluster_id,
            concept_tag: self.concept_tag,
        })
    }
}

/// Fully validated contents of an [`EngineSnapshot`].
pub struct EngineState {
    pub quantizer: VectorQuantizer,
    pub records: Vec<CompactNeuron>,
    pub graph: SynapseGraph,
}

impl EngineSnapshot {
    pub fn capture(
        quantizer: &VectorQuantizer,
        records: &[CompactNeuron],
        graph: &SynapseGraph,
        exported_at: u64,
    ) -> Self {
        let mut records: Vec<WireRecord> = records.iter().map(WireRecord::from).collect();
        records.sort_by_key(|r| r.id);
        Self {
            version: CURRENT_VERSION.to_string(),
            exported_at,
            codebook: quantizer.snapshot(),
            records,
            synapses: graph.export_edges(),
        }
    }

    /// Validate everything and build live state. `graph` supplies the graph
    /// configuration; its edges are replaced. Fails as a whole.
    pub fn into_state(self, graph: SynapseGraph) -> Result<EngineState> {
        let quantizer = VectorQuantizer::from_snapshot(self.codebook)?;

        let mut seen = HashSet::with_capacity(self.records.len());
        let mut records = Vec::with_capacity(self.records.len());
        for wire in self.records {
            if !seen.insert(wire.id) {
                return Err(CoreError::SnapshotMismatch(format!(
                    "duplicate record {}",
                    wire.id
                )));
            }
            records.push(wire.into_record(quantizer.size())?);
        }

        let mut graph = graph;
        graph.import_edges(&self.synapses)?;

        Ok(EngineState {
            quantizer,
            records,
            graph,
        })
    }
}

pub fn export_json(snapshot: &EngineSnapshot) -> std::result::Result<String, serde_json::Error> {
    serde_json::to_string_pretty(snapshot)
}

pub fn import_json(json: &str) -> std::result::Result<EngineSnapshot, serde_json::Error> {
    serde_json::from_str(json)
}
