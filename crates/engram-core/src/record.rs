use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::constants::{EDGE_BYTES, RECORD_OVERHEAD_BYTES};
use crate::id::NeuronId;
use crate::neuron::RuntimeNeuron;

/// Persisted form of a neuron: one quantizer code plus the connections that
/// were strong enough to keep.
///
/// Built once per compaction and not mutated afterwards; re-compact the live
/// neuron to refresh it. Never holds a self-edge.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompactNeuron {
    pub id: NeuronId,
    pub code: u32,
    pub weights: BTreeMap<NeuronId, f32>,
    pub importance: f32,
    pub activation_count: u64,
    pub cluster_id: Option<u32>,
    /// Diagnostic only; regeneration reattaches it but never reads it.
    pub concept_tag: Option<String>,
}

impl CompactNeuron {
    /// Compact a live neuron. `code` comes from the caller's quantizer.
    ///
    /// Keeps weights with `|w| > materiality`; everything else is lost.
    pub fn compact(neuron: &impl RuntimeNeuron, code: u32, materiality: f32) -> Self {
        let id = neuron.id();
        let weights = neuron
            .weights()
            .iter()
            .filter(|&(target, w)| *target != id && w.abs() > materiality)
            .map(|(&target, &w)| (target, w))
            .collect();

        Self {
            id,
            code,
            weights,
            importance: neuron.importance(),
            activation_count: neuron.activation_count(),
            cluster_id: neuron.cluster_id(),
            concept_tag: neuron.concept_tag().map(str::to_string),
        }
    }

    pub fn edge_count(&self) -> usize {
        self.weights.len()
    }

    /// Approximate stored size: fixed overhead plus one entry per kept edge.
    pub fn estimated_bytes(&self) -> usize {
        RECORD_OVERHEAD_BYTES + self.weights.len() * EDGE_BYTES
    }
}

/// `full_bytes / record_bytes`; how many times smaller the record is.
pub fn compression_ratio(full_bytes: usize, record: &CompactNeuron) -> f64 {
    full_bytes as f64 / record.estimated_bytes().max(1) as f64
}
