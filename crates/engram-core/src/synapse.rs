use serde::{Deserialize, Serialize};

use crate::constants::STRENGTH_SMOOTHING;
use crate::id::NeuronId;

/// How the runtime layer interprets an edge. The graph itself treats all
/// types alike.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SynapseType {
    #[default]
    Excitatory,
    Inhibitory,
    Modulatory,
}

impl SynapseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Excitatory => "excitatory",
            Self::Inhibitory => "inhibitory",
            Self::Modulatory => "modulatory",
        }
    }

    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "inhibitory" => Self::Inhibitory,
            "modulatory" => Self::Modulatory,
            _ => Self::Excitatory,
        }
    }
}

/// Edge payload. Source and target live in the graph's adjacency keys.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Synapse {
    pub weight: f32,
    /// EMA of co-activation products; diagnostic.
    pub strength: f32,
    pub synapse_type: SynapseType,
    /// Unix milliseconds of the last co-activation.
    pub last_active: u64,
    pub transmission_count: u64,
    /// Per-edge multiplier on the graph learning rate.
    pub plasticity_rate: f32,
    /// Non-plastic edges record use but keep their weight.
    pub is_plastic: bool,
}

impl Synapse {
    pub fn new(weight: f32, now: u64) -> Self {
        Self {
            weight,
            strength: 0.0,
            synapse_type: SynapseType::default(),
            last_active: now,
            transmission_count: 0,
            plasticity_rate: 1.0,
            is_plastic: true,
        }
    }

    /// Register a co-activation with product `coactivity`.
    pub(crate) fn touch(&mut self, coactivity: f32, now: u64) {
        self.strength += STRENGTH_SMOOTHING * (coactivity - self.strength);
        self.last_active = now;
        self.transmission_count += 1;
    }
}

/// Flat edge row used by exports and the store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SynapseRecord {
    pub source: NeuronId,
    pub target: NeuronId,
    pub weight: f32,
    #[serde(default)]
    pub strength: f32,
    #[serde(rename = "type", default)]
    pub synapse_type: SynapseType,
    #[serde(default)]
    pub last_active: u64,
    #[serde(default)]
    pub transmission_count: u64,
    #[serde(default = "default_plasticity_rate")]
    pub plasticity_rate: f32,
    #[serde(default = "default_is_plastic")]
    pub is_plastic: bool,
}

fn default_plasticity_rate() -> f32 {
    1.0
}

fn default_is_plastic() -> bool {
    true
}

impl SynapseRecord {
    pub fn from_synapse(source: NeuronId, target: NeuronId, synapse: &Synapse) -> Self {
        Self {
            source,
            target,
            weight: synapse.weight,
            strength: synapse.strength,
            synapse_type: synapse.synapse_type,
            last_active: synapse.last_active,
            transmission_count: synapse.transmission_count,
            plasticity_rate: synapse.plasticity_rate,
            is_plastic: synapse.is_plastic,
        }
    }

    pub fn to_synapse(&self) -> Synapse {
        Synapse {
            weight: self.weight,
            strength: self.strength,
            synapse_type: self.synapse_type,
            last_active: self.last_active,
            transmission_count: self.transmission_count,
            plasticity_rate: self.plasticity_rate,
            is_plastic: self.is_plastic,
        }
    }
}
