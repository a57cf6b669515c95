//! Lock wrappers for driving the quantizer and graph from many threads.
//!
//! `quantize` runs under a read lock (usage counters are atomic);
//! `quantize_and_update` takes the write lock because it rewrites EMA state.
//! Every graph mutator takes the graph's write lock, so queries never see a
//! half-applied prune or decay pass.

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::Result;
use crate::graph::{Coactivation, GraphStats, PatternOutcome, SynapseGraph};
use crate::id::NeuronId;
use crate::quantizer::{CodebookSnapshot, VectorQuantizer};
use crate::synapse::SynapseRecord;

pub struct SharedQuantizer {
    inner: RwLock<VectorQuantizer>,
}

impl SharedQuantizer {
    pub fn new(quantizer: VectorQuantizer) -> Self {
        Self {
            inner: RwLock::new(quantizer),
        }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, VectorQuantizer> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, VectorQuantizer> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn quantize(&self, v: &[f32]) -> Result<u32> {
        self.read().quantize(v)
    }

    pub fn quantize_and_update(&self, v: &[f32]) -> Result<(u32, f32)> {
        self.write().quantize_and_update(v)
    }

    pub fn decode(&self, code: u32) -> Result<Vec<f32>> {
        self.read().decode(code)
    }

    pub fn snapshot(&self) -> CodebookSnapshot {
        self.read().snapshot()
    }

    pub fn restore(&self, snapshot: CodebookSnapshot) -> Result<()> {
        self.write().restore(snapshot)
    }

    pub fn into_inner(self) -> VectorQuantizer {
        self.inner.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct SharedGraph {
    inner: RwLock<SynapseGraph>,
}

impl SharedGraph {
    pub fn new(graph: SynapseGraph) -> Self {
        Self {
            inner: RwLock::new(graph),
        }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, SynapseGraph> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, SynapseGraph> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record_coactivation(
        &self,
        source: NeuronId,
        target: NeuronId,
        source_activation: f32,
        target_activation: f32,
    ) -> Coactivation {
        self.write()
            .record_coactivation(source, target, source_activation, target_activation)
    }

    pub fn record_coactivation_pattern(&self, active: &[(NeuronId, f32)]) -> PatternOutcome {
        self.write().record_coactivation_pattern(active)
    }

    pub fn prune_weak_synapses(&self) -> usize {
        self.write().prune_weak_synapses()
    }

    pub fn apply_decay(&self, factor: f32) -> usize {
        self.write().apply_decay(factor)
    }

    pub fn remove_neuron(&self, id: NeuronId) -> usize {
        self.write().remove_neuron(id)
    }

    pub fn synapse_weight(&self, source: NeuronId, target: NeuronId) -> Option<f32> {
        self.read().synapse_weight(source, target)
    }

    pub fn outgoing_synapses(&self, source: NeuronId) -> Vec<(NeuronId, f32)> {
        self.read().outgoing_synapses(source)
    }

    pub fn incoming_synapses(&self, target: NeuronId) -> Vec<(NeuronId, f32)> {
        self.read().incoming_synapses(target)
    }

    pub fn stats(&self) -> GraphStats {
        self.read().stats()
    }

    pub fn export_edges(&self) -> Vec<SynapseRecord> {
        self.read().export_edges()
    }

    pub fn import_edges(&self, edges: &[SynapseRecord]) -> Result<()> {
        self.write().import_edges(edges)
    }

    pub fn into_inner(self) -> SynapseGraph {
        self.inner.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}
