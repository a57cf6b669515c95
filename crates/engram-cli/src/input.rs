//! Command-line and file input formats.

use anyhow::{Context, Result, bail};
use engram_core::{Neuron, NeuronId, NeuronParameters, RuntimeNeuron, WireWeight};
use serde::Deserialize;

/// Parse `0.1,0.2,-0.3` (commas and/or whitespace).
pub fn parse_vector(s: &str) -> Result<Vec<f32>> {
    let values = s
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|t| !t.is_empty())
        .map(|t| -> Result<f32> {
            let x: f32 = t
                .parse()
                .with_context(|| format!("invalid number '{t}'"))?;
            if !x.is_finite() {
                bail!("non-finite component '{t}'");
            }
            Ok(x)
        })
        .collect::<Result<Vec<f32>>>()?;
    if values.is_empty() {
        bail!("empty vector");
    }
    Ok(values)
}

pub fn format_vector(v: &[f32]) -> String {
    v.iter()
        .map(|x| format!("{x:.6}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// `<id>` or `<id>=<activation>`; a bare id means activation 1.0.
pub fn parse_activation(s: &str) -> Result<(NeuronId, f32)> {
    let (id, activation) = match s.split_once('=') {
        Some((id, act)) => {
            let act: f32 = act
                .parse()
                .with_context(|| format!("invalid activation in '{s}'"))?;
            (id, act)
        }
        None => (s, 1.0),
    };
    if !activation.is_finite() {
        bail!("non-finite activation in '{s}'");
    }
    let id = id
        .parse::<NeuronId>()
        .with_context(|| format!("invalid neuron id '{id}'"))?;
    Ok((id, activation))
}

pub fn parse_pattern<'a>(tokens: impl IntoIterator<Item = &'a str>) -> Result<Vec<(NeuronId, f32)>> {
    tokens.into_iter().map(parse_activation).collect()
}

/// One live neuron in a `compact` input file.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NeuronInput {
    #[serde(default)]
    pub id: Option<NeuronId>,
    pub features: Vec<f32>,
    #[serde(default)]
    pub weights: Vec<WireWeight>,
    #[serde(default)]
    pub importance: f32,
    #[serde(default)]
    pub activation_count: u64,
    #[serde(default)]
    pub cluster_id: Option<u32>,
    #[serde(default)]
    pub concepts: Vec<String>,
}

impl NeuronInput {
    /// Build the live neuron, leaving `features` for the caller to quantize.
    pub fn to_neuron(&self, params: NeuronParameters) -> Neuron {
        let mut neuron = Neuron::new(self.id.unwrap_or_default(), params);
        for w in &self.weights {
            neuron.connect(w.target, w.weight);
        }
        for concept in &self.concepts {
            neuron.associate_concept(concept);
        }
        neuron.importance = self.importance;
        neuron.activation_count = self.activation_count;
        neuron.cluster_id = self.cluster_id;
        neuron
    }
}

pub fn parse_neuron_inputs(json: &str) -> Result<Vec<NeuronInput>> {
    serde_json::from_str(json).context("expected a JSON array of neurons")
}
