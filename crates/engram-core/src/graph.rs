//! Sparse Hebbian synapse graph.
//!
//! Edges exist only where co-activation has been strong enough to create
//! them, are strengthened by further co-activation, and disappear through
//! pruning or decay. Edge count tracks use, not neurons².
//!
//! Storage is an adjacency map `source → (target → Synapse)` plus a reverse
//! index `target → {source}` for incoming queries. Both are kept in step by
//! every mutator.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_GRAPH_LEARNING_RATE, DEFAULT_PRUNE_THRESHOLD};
use crate::error::{CoreError, Result};
use crate::id::NeuronId;
use crate::synapse::{Synapse, SynapseRecord};
use crate::time::now_unix_millis;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    pub learning_rate: f32,
    /// A new edge needs Δ strictly above this.
    pub creation_threshold: f32,
    /// Edges with |weight| strictly below this are removed.
    pub prune_threshold: f32,
    pub min_weight: f32,
    pub max_weight: f32,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            learning_rate: DEFAULT_GRAPH_LEARNING_RATE,
            creation_threshold: DEFAULT_PRUNE_THRESHOLD / 2.0,
            prune_threshold: DEFAULT_PRUNE_THRESHOLD,
            min_weight: 0.0,
            max_weight: 1.0,
        }
    }
}

impl GraphConfig {
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("learning_rate", self.learning_rate),
            ("creation_threshold", self.creation_threshold),
            ("prune_threshold", self.prune_threshold),
            ("min_weight", self.min_weight),
            ("max_weight", self.max_weight),
        ];
        if let Some((name, value)) = fields.iter().find(|(_, v)| !v.is_finite()) {
            return Err(CoreError::InvalidConfig(format!("{name} is not finite: {value}")));
        }
        if self.min_weight > self.max_weight {
            return Err(CoreError::InvalidConfig(format!(
                "min_weight {} exceeds max_weight {}",
                self.min_weight, self.max_weight
            )));
        }
        if self.learning_rate < 0.0 || self.creation_threshold < 0.0 || self.prune_threshold < 0.0 {
            return Err(CoreError::InvalidConfig(
                "learning_rate and thresholds must be non-negative".into(),
            ));
        }
        Ok(())
    }
}

/// What a single co-activation did to the graph.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Coactivation {
    /// Self pair, or Δ too small to create an edge.
    Ignored,
    Created(f32),
    Updated(f32),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PatternOutcome {
    pub created: usize,
    pub updated: usize,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphStats {
    pub edge_count: usize,
    pub neuron_count: usize,
    pub mean_weight: f32,
    pub min_weight: f32,
    pub max_weight: f32,
    /// edges / (n × (n − 1)); 0 with fewer than two neurons.
    pub sparsity: f64,
}

#[derive(Clone, Debug, Default)]
pub struct SynapseGraph {
    config: GraphConfig,
    outgoing: HashMap<NeuronId, HashMap<NeuronId, Synapse>>,
    incoming: HashMap<NeuronId, HashSet<NeuronId>>,
}

impl SynapseGraph {
    pub fn new(config: GraphConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            outgoing: HashMap::new(),
            incoming: HashMap::new(),
        })
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    fn clamp(&self, weight: f32) -> f32 {
        weight.clamp(self.config.min_weight, self.config.max_weight)
    }

    pub fn record_coactivation(
        &mut self,
        source: NeuronId,
        target: NeuronId,
        source_activation: f32,
        target_activation: f32,
    ) -> Coactivation {
        self.record_coactivation_at(
            source,
            target,
            source_activation,
            target_activation,
            now_unix_millis(),
        )
    }

    /// Hebbian update with an explicit timestamp.
    ///
    /// Δ = learning_rate × source_activation × target_activation. An existing
    /// edge moves by Δ × its plasticity rate and is clamped; a missing edge is
    /// created only when Δ exceeds the creation threshold. Non-finite
    /// activations are ignored.
    pub fn record_coactivation_at(
        &mut self,
        source: NeuronId,
        target: NeuronId,
        source_activation: f32,
        target_activation: f32,
        now: u64,
    ) -> Coactivation {
        if source == target {
            return Coactivation::Ignored;
        }
        let coactivity = source_activation * target_activation;
        let delta = self.config.learning_rate * coactivity;
        if !delta.is_finite() {
            tracing::warn!(%source, %target, "ignoring non-finite co-activation");
            return Coactivation::Ignored;
        }
        let (min, max) = (self.config.min_weight, self.config.max_weight);

        if let Some(synapse) = self
            .outgoing
            .get_mut(&source)
            .and_then(|targets| targets.get_mut(&target))
        {
            if synapse.is_plastic {
                synapse.weight =
                    (synapse.weight + delta * synapse.plasticity_rate).clamp(min, max);
            }
            synapse.touch(coactivity, now);
            return Coactivation::Updated(synapse.weight);
        }

        if delta <= self.config.creation_threshold {
            return Coactivation::Ignored;
        }

        let mut synapse = Synapse::new(self.clamp(delta), now);
        synapse.touch(coactivity, now);
        let weight = synapse.weight;
        self.link(source, target, synapse);
        Coactivation::Created(weight)
    }

    /// Co-activate every unordered pair of `active` neurons in both
    /// directions.
    pub fn record_coactivation_pattern(&mut self, active: &[(NeuronId, f32)]) -> PatternOutcome {
        let now = now_unix_millis();
        let mut outcome = PatternOutcome::default();
        for (i, &(a, a_act)) in active.iter().enumerate() {
            for &(b, b_act) in &active[i + 1..] {
                for (src, s_act, tgt, t_act) in [(a, a_act, b, b_act), (b, b_act, a, a_act)] {
                    match self.record_coactivation_at(src, tgt, s_act, t_act, now) {
                        Coactivation::Created(_) => outcome.created += 1,
                        Coactivation::Updated(_) => outcome.updated += 1,
                        Coactivation::Ignored => {}
                    }
                }
            }
        }
        tracing::debug!(
            neurons = active.len(),
            created = outcome.created,
            updated = outcome.updated,
            "coactivation pattern"
        );
        outcome
    }

    /// Insert or replace an edge. Rejects self-edges; clamps the weight.
    pub fn insert(&mut self, source: NeuronId, target: NeuronId, mut synapse: Synapse) -> Result<()> {
        if source == target {
            return Err(CoreError::InvalidGraph(format!("self-edge on {source}")));
        }
        synapse.weight = self.clamp(synapse.weight);
        self.link(source, target, synapse);
        Ok(())
    }

    fn link(&mut self, source: NeuronId, target: NeuronId, synapse: Synapse) {
        self.outgoing
            .entry(source)
            .or_default()
            .insert(target, synapse);
        self.incoming.entry(target).or_default().insert(source);
    }

    pub fn synapse(&self, source: NeuronId, target: NeuronId) -> Option<&Synapse> {
        self.outgoing.get(&source)?.get(&target)
    }

    pub fn synapse_weight(&self, source: NeuronId, target: NeuronId) -> Option<f32> {
        self.synapse(source, target).map(|s| s.weight)
    }

    /// (target, weight) pairs leaving `source`, ordered by target.
    pub fn outgoing_synapses(&self, source: NeuronId) -> Vec<(NeuronId, f32)> {
        let mut edges: Vec<(NeuronId, f32)> = self
            .outgoing
            .get(&source)
            .map(|targets| targets.iter().map(|(&t, s)| (t, s.weight)).collect())
            .unwrap_or_default();
        edges.sort_by_key(|(t, _)| *t);
        edges
    }

    /// (source, weight) pairs arriving at `target`, ordered by source.
    pub fn incoming_synapses(&self, target: NeuronId) -> Vec<(NeuronId, f32)> {
        let mut edges: Vec<(NeuronId, f32)> = self
            .incoming
            .get(&target)
            .map(|sources| {
                sources
                    .iter()
                    .filter_map(|&s| self.synapse_weight(s, target).map(|w| (s, w)))
                    .collect()
            })
            .unwrap_or_default();
        edges.sort_by_key(|(s, _)| *s);
        edges
    }

    /// Remove every edge `keep` rejects, keeping the reverse index in step.
    fn retain_edges(&mut self, mut keep: impl FnMut(&mut Synapse) -> bool) -> usize {
        let mut removed: Vec<(NeuronId, NeuronId)> = Vec::new();
        self.outgoing.retain(|&source, targets| {
            targets.retain(|&target, synapse| {
                let kept = keep(synapse);
                if !kept {
                    removed.push((source, target));
                }
                kept
            });
            !targets.is_empty()
        });

        for (source, target) in &removed {
            if let Some(sources) = self.incoming.get_mut(target) {
                sources.remove(source);
                if sources.is_empty() {
                    self.incoming.remove(target);
                }
            }
        }
        removed.len()
    }

    /// Remove edges with |weight| below the prune threshold. Returns the count.
    pub fn prune_weak_synapses(&mut self) -> usize {
        let threshold = self.config.prune_threshold;
        let removed = self.retain_edges(|s| s.weight.abs() >= threshold);
        tracing::debug!(removed, threshold, "pruned weak synapses");
        removed
    }

    /// Multiply every weight by `factor` (clamped to `[0, 1]`) and drop edges
    /// that fall below the prune threshold in the same pass. Returns the
    /// number removed. A NaN factor leaves the graph untouched.
    pub fn apply_decay(&mut self, factor: f32) -> usize {
        if factor.is_nan() {
            tracing::warn!("ignoring NaN decay factor");
            return 0;
        }
        let factor = factor.clamp(0.0, 1.0);
        let GraphConfig {
            prune_threshold,
            min_weight,
            max_weight,
            ..
        } = self.config;
        let removed = self.retain_edges(|s| {
            s.weight = (s.weight * factor).clamp(min_weight, max_weight);
            s.weight.abs() >= prune_threshold
        });
        tracing::debug!(removed, factor, "applied synapse decay");
        removed
    }

    /// Drop every edge touching `id`. Returns the count.
    pub fn remove_neuron(&mut self, id: NeuronId) -> usize {
        let mut removed = 0;
        if let Some(targets) = self.outgoing.remove(&id) {
            removed += targets.len();
            for target in targets.keys() {
                if let Some(sources) = self.incoming.get_mut(target) {
                    sources.remove(&id);
                    if sources.is_empty() {
                        self.incoming.remove(target);
                    }
                }
            }
        }
        if let Some(sources) = self.incoming.remove(&id) {
            for source in sources {
                if let Some(targets) = self.outgoing.get_mut(&source) {
                    if targets.remove(&id).is_some() {
                        removed += 1;
                    }
                    if targets.is_empty() {
                        self.outgoing.remove(&source);
                    }
                }
            }
        }
        removed
    }

    pub fn edge_count(&self) -> usize {
        self.outgoing.values().map(HashMap::len).sum()
    }

    /// Distinct neurons with at least one edge.
    pub fn neuron_count(&self) -> usize {
        self.outgoing
            .keys()
            .chain(self.incoming.keys())
            .collect::<HashSet<_>>()
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.outgoing.is_empty()
    }

    pub fn stats(&self) -> GraphStats {
        let edge_count = self.edge_count();
        let neuron_count = self.neuron_count();
        if edge_count == 0 {
            return GraphStats {
                neuron_count,
                ..GraphStats::default()
            };
        }

        let mut sum = 0.0f64;
        let mut min = f32::INFINITY;
        let mut max = f32::NEG_INFINITY;
        for synapse in self.outgoing.values().flat_map(HashMap::values) {
            sum += synapse.weight as f64;
            min = min.min(synapse.weight);
            max = max.max(synapse.weight);
        }

        let n = neuron_count as f64;
        GraphStats {
            edge_count,
            neuron_count,
            mean_weight: (sum / edge_count as f64) as f32,
            min_weight: min,
            max_weight: max,
            sparsity: if neuron_count < 2 {
                0.0
            } else {
                edge_count as f64 / (n * (n - 1.0))
            },
        }
    }

    /// Flat edge list ordered by (source, target).
    pub fn export_edges(&self) -> Vec<SynapseRecord> {
        let mut edges: Vec<SynapseRecord> = self
            .outgoing
            .iter()
            .flat_map(|(&source, targets)| {
                targets
                    .iter()
                    .map(move |(&target, s)| SynapseRecord::from_synapse(source, target, s))
            })
            .collect();
        edges.sort_by_key(|e| (e.source, e.target));
        edges
    }

    /// Replace the whole graph with `edges`. The list is validated first;
    /// on error the graph is unchanged.
    pub fn import_edges(&mut self, edges: &[SynapseRecord]) -> Result<()> {
        let mut seen = HashSet::with_capacity(edges.len());
        for edge in edges {
            if edge.source == edge.target {
                return Err(CoreError::InvalidGraph(format!("self-edge on {}", edge.source)));
            }
            if !seen.insert((edge.source, edge.target)) {
                return Err(CoreError::InvalidGraph(format!(
                    "duplicate edge {} -> {}",
                    edge.source, edge.target
                )));
            }
            if !edge.weight.is_finite() || !edge.plasticity_rate.is_finite() {
                return Err(CoreError::InvalidGraph(format!(
                    "non-finite value on edge {} -> {}",
                    edge.source, edge.target
                )));
            }
        }

        self.outgoing.clear();
        self.incoming.clear();
        for edge in edges {
            let mut synapse = edge.to_synapse();
            synapse.weight = self.clamp(synapse.weight);
            self.link(edge.source, edge.target, synapse);
        }
        tracing::debug!(edges = edges.len(), "imported synapse graph");
        Ok(())
    }
}
