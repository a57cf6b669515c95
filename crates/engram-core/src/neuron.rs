use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::constants::{EDGE_BYTES, NEURON_OVERHEAD_BYTES};
use crate::id::NeuronId;
use crate::time::now_unix_millis;

/// Operating parameters derived for a neuron during regeneration.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NeuronParameters {
    pub threshold: f32,
    pub bias: f32,
    pub learning_rate: f32,
}

/// Boundary between compact storage and whatever runtime neuron type the
/// host system uses. Compaction reads through it; regeneration builds
/// through `from_parameters`.
pub trait RuntimeNeuron {
    fn from_parameters(id: NeuronId, params: NeuronParameters) -> Self
    where
        Self: Sized;

    fn id(&self) -> NeuronId;
    fn threshold(&self) -> f32;
    fn bias(&self) -> f32;
    fn learning_rate(&self) -> f32;
    fn weights(&self) -> &HashMap<NeuronId, f32>;
    fn weights_mut(&mut self) -> &mut HashMap<NeuronId, f32>;
    fn associate_concept(&mut self, concept: &str);

    fn importance(&self) -> f32 {
        0.0
    }

    fn activation_count(&self) -> u64 {
        0
    }

    fn cluster_id(&self) -> Option<u32> {
        None
    }

    /// Primary concept tag, if any.
    fn concept_tag(&self) -> Option<&str> {
        None
    }
}

/// Default fully materialized neuron.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Neuron {
    pub id: NeuronId,
    pub threshold: f32,
    pub bias: f32,
    pub learning_rate: f32,
    pub weights: HashMap<NeuronId, f32>,
    pub importance: f32,
    pub activation_count: u64,
    pub cluster_id: Option<u32>,
    pub concepts: Vec<String>,
    /// Unix milliseconds.
    pub last_used: u64,
}

impl Neuron {
    pub fn new(id: NeuronId, params: NeuronParameters) -> Self {
        Self {
            id,
            threshold: params.threshold,
            bias: params.bias,
            learning_rate: params.learning_rate,
            weights: HashMap::new(),
            importance: 0.0,
            activation_count: 0,
            cluster_id: None,
            concepts: Vec::new(),
            last_used: now_unix_millis(),
        }
    }

    /// Record a firing.
    pub fn activate(&mut self) {
        self.activation_count += 1;
        self.last_used = now_unix_millis();
    }

    /// Set an outgoing weight. Self-connections are ignored.
    pub fn connect(&mut self, target: NeuronId, weight: f32) {
        if target != self.id {
            self.weights.insert(target, weight);
        }
    }

    /// Approximate in-memory size including a `dim`-wide feature vector.
    pub fn estimated_bytes(&self, dim: usize) -> usize {
        NEURON_OVERHEAD_BYTES
            + dim * std::mem::size_of::<f32>()
            + self.weights.len() * EDGE_BYTES
            + self.concepts.iter().map(String::len).sum::<usize>()
    }
}

impl RuntimeNeuron for Neuron {
    fn from_parameters(id: NeuronId, params: NeuronParameters) -> Self {
        Self::new(id, params)
    }

    fn id(&self) -> NeuronId {
        self.id
    }

    fn threshold(&self) -> f32 {
        self.threshold
    }

    fn bias(&self) -> f32 {
        self.bias
    }

    fn learning_rate(&self) -> f32 {
        self.learning_rate
    }

    fn weights(&self) -> &HashMap<NeuronId, f32> {
        &self.weights
    }

    fn weights_mut(&mut self) -> &mut HashMap<NeuronId, f32> {
        &mut self.weights
    }

    fn associate_concept(&mut self, concept: &str) {
        if !self.concepts.iter().any(|c| c == concept) {
            self.concepts.push(concept.to_string());
        }
    }

    fn importance(&self) -> f32 {
        self.importance
    }

    fn activation_count(&self) -> u64 {
        self.activation_count
    }

    fn cluster_id(&self) -> Option<u32> {
        self.cluster_id
    }

    fn concept_tag(&self) -> Option<&str> {
        self.concepts.first().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> NeuronParameters {
        NeuronParameters {
            threshold: 0.5,
            bias: 0.0,
            learning_rate: 0.01,
        }
    }

    #[test]
    fn test_connect_skips_self() {
        let id = NeuronId::new();
        let mut n = Neuron::new(id, params());
        n.connect(id, 0.9);
        n.connect(NeuronId::new(), 0.4);
        assert_eq!(n.weights.len(), 1);
        assert!(!n.weights.contains_key(&id));
    }

    #[test]
    fn test_associate_concept_dedupes() {
        let mut n = Neuron::new(NeuronId::new(), params());
        n.associate_concept("apple");
        n.associate_concept("apple");
        n.associate_concept("fruit");
        assert_eq!(n.concepts, vec!["apple", "fruit"]);
        assert_eq!(n.concept_tag(), Some("apple"));
    }

    #[test]
    fn test_activate() {
        let mut n = Neuron::new(NeuronId::new(), params());
        n.activate();
        n.activate();
        assert_eq!(n.activation_count, 2);
    }

    #[test]
    fn test_estimated_bytes_grows_with_weights() {
        let mut n = Neuron::new(NeuronId::new(), params());
        let empty = n.estimated_bytes(64);
        n.connect(NeuronId::new(), 0.5);
        assert_eq!(n.estimated_bytes(64), empty + EDGE_BYTES);
        assert_eq!(empty, NEURON_OVERHEAD_BYTES + 64 * 4);
    }
}
