//! Inverse of compaction: code → prototype → operating parameters → neuron.
//!
//! Threshold and bias are pure functions of the prototype, so every record
//! sharing a code regenerates with identical parameters and differs only in
//! the weights it carried.

use std::collections::HashMap;

use rayon::prelude::*;

use crate::constants::{BIAS_SPAN, DEFAULT_NEURON_LEARNING_RATE, THRESHOLD_BASELINE, THRESHOLD_SPAN};
use crate::error::Result;
use crate::id::NeuronId;
use crate::neuron::{Neuron, NeuronParameters, RuntimeNeuron};
use crate::quantizer::VectorQuantizer;
use crate::record::CompactNeuron;

/// Derivation of threshold and bias from a prototype vector.
pub trait ParameterPolicy: Sync {
    fn threshold(&self, prototype: &[f32]) -> f32;
    fn bias(&self, prototype: &[f32]) -> f32;
}

/// Saturating curves over magnitude and mean.
///
/// threshold = BASELINE + SPAN × (tanh(‖p‖) − ½), in `[0.4, 0.6]`;
/// bias = BIAS_SPAN × tanh(mean(p)), in `[−0.1, 0.1]`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TanhPolicy;

impl ParameterPolicy for TanhPolicy {
    fn threshold(&self, prototype: &[f32]) -> f32 {
        let magnitude = prototype.iter().map(|x| x * x).sum::<f32>().sqrt();
        THRESHOLD_BASELINE + THRESHOLD_SPAN * (magnitude.tanh() - 0.5)
    }

    fn bias(&self, prototype: &[f32]) -> f32 {
        if prototype.is_empty() {
            return 0.0;
        }
        let mean = prototype.iter().sum::<f32>() / prototype.len() as f32;
        BIAS_SPAN * mean.tanh()
    }
}

pub struct Regenerator<'a, P: ParameterPolicy = TanhPolicy> {
    quantizer: &'a VectorQuantizer,
    policy: P,
    learning_rate: f32,
}

impl<'a> Regenerator<'a, TanhPolicy> {
    pub fn new(quantizer: &'a VectorQuantizer) -> Self {
        Self::with_policy(quantizer, TanhPolicy)
    }
}

impl<'a, P: ParameterPolicy> Regenerator<'a, P> {
    pub fn with_policy(quantizer: &'a VectorQuantizer, policy: P) -> Self {
        Self {
            quantizer,
            policy,
            learning_rate: DEFAULT_NEURON_LEARNING_RATE,
        }
    }

    pub fn learning_rate(mut self, learning_rate: f32) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    /// Parameters for a code. Fails on an out-of-range code.
    pub fn parameters(&self, code: u32) -> Result<NeuronParameters> {
        let prototype = self.quantizer.prototype(code)?;
        Ok(NeuronParameters {
            threshold: self.policy.threshold(prototype),
            bias: self.policy.bias(prototype),
            learning_rate: self.learning_rate,
        })
    }

    pub fn regenerate(&self, record: &CompactNeuron) -> Result<Neuron> {
        self.regenerate_as(record)
    }

    /// Regenerate into any runtime neuron type.
    pub fn regenerate_as<N: RuntimeNeuron>(&self, record: &CompactNeuron) -> Result<N> {
        let params = self.parameters(record.code)?;
        let mut neuron = N::from_parameters(record.id, params);

        let weights = neuron.weights_mut();
        weights.clear();
        weights.extend(record.weights.iter().map(|(&target, &w)| (target, w)));

        if let Some(tag) = &record.concept_tag {
            neuron.associate_concept(tag);
        }
        Ok(neuron)
    }

    /// Regenerate records in parallel. Any out-of-range code fails the batch.
    pub fn regenerate_batch(&self, records: &[CompactNeuron]) -> Result<HashMap<NeuronId, Neuron>> {
        let neurons = records
            .par_iter()
            .map(|record| self.regenerate(record).map(|n| (record.id, n)))
            .collect::<Result<HashMap<_, _>>>()?;
        tracing::debug!(count = neurons.len(), "regenerated batch");
        Ok(neurons)
    }
}

/// Regenerated neurons keep their stored bookkeeping alongside the derived
/// parameters.
pub fn restore_bookkeeping(neuron: &mut Neuron, record: &CompactNeuron) {
    neuron.importance = record.importance;
    neuron.activation_count = record.activation_count;
    neuron.cluster_id = record.cluster_id;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use crate::quantizer::QuantizerConfig;
    use approx::assert_relative_eq;
    use std::collections::BTreeMap;

    fn quantizer() -> VectorQuantizer {
        VectorQuantizer::new(
            QuantizerConfig::new(3, 2),
            vec![vec![0.0, 0.0], vec![3.0, 4.0], vec![-2.0, -2.0]],
        )
        .unwrap()
    }

    fn record(code: u32, weights: &[(NeuronId, f32)]) -> CompactNeuron {
        CompactNeuron {
            id: NeuronId::new(),
            code,
            weights: weights.iter().copied().collect::<BTreeMap<_, _>>(),
            importance: 0.5,
            activation_count: 3,
            cluster_id: Some(1),
            concept_tag: Some("stone".into()),
        }
    }

    #[test]
    fn test_threshold_band() {
        let policy = TanhPolicy;
        assert_relative_eq!(policy.threshold(&[0.0, 0.0]), 0.4, epsilon = 1e-6);
        // tanh saturates to exactly 1.0, closing the upper end of the band.
        let high = policy.threshold(&[100.0, 100.0]);
        assert!(high <= 0.6);
        assert_relative_eq!(high, 0.6, epsilon = 1e-6);
    }

    #[test]
    fn test_threshold_increases_with_magnitude() {
        let policy = TanhPolicy;
        let small = policy.threshold(&[0.3, 0.0]);
        let large = policy.threshold(&[0.9, 0.0]);
        assert!(large > small);
    }

    #[test]
    fn test_bias_symmetric() {
        let policy = TanhPolicy;
        assert_eq!(policy.bias(&[0.0, 0.0]), 0.0);
        let pos = policy.bias(&[1.0, 1.0]);
        let neg = policy.bias(&[-1.0, -1.0]);
        assert_relative_eq!(pos, -neg);
        assert!(pos > 0.0 && pos < BIAS_SPAN);
    }

    #[test]
    fn test_regenerate_restores_weights_and_tag() {
        let vq = quantizer();
        let regen = Regenerator::new(&vq);
        let t = NeuronId::new();
        let rec = record(1, &[(t, 0.3)]);

        let neuron = regen.regenerate(&rec).unwrap();
        assert_eq!(neuron.id, rec.id);
        assert_eq!(neuron.weights.get(&t), Some(&0.3));
        assert_eq!(neuron.concepts, vec!["stone"]);
        assert_relative_eq!(neuron.learning_rate, DEFAULT_NEURON_LEARNING_RATE);
        // ‖(3,4)‖ = 5
        assert_relative_eq!(neuron.threshold, 0.5 + 0.2 * (5.0f32.tanh() - 0.5));
    }

    #[test]
    fn test_shared_code_shares_parameters() {
        let vq = quantizer();
        let regen = Regenerator::new(&vq);
        let a = regen.regenerate(&record(2, &[(NeuronId::new(), 0.9)])).unwrap();
        let b = regen.regenerate(&record(2, &[])).unwrap();
        assert_eq!(a.threshold, b.threshold);
        assert_eq!(a.bias, b.bias);
        assert_ne!(a.weights.len(), b.weights.len());
    }

    #[test]
    fn test_empty_weights_ok() {
        let vq = quantizer();
        let neuron = Regenerator::new(&vq).regenerate(&record(0, &[])).unwrap();
        assert!(neuron.weights.is_empty());
    }

    #[test]
    fn test_out_of_range_code_fails() {
        let vq = quantizer();
        let err = Regenerator::new(&vq).regenerate(&record(9, &[])).unwrap_err();
        assert_eq!(err, CoreError::CodeOutOfRange { code: 9, size: 3 });
    }

    #[test]
    fn test_batch_keyed_by_id() {
        let vq = quantizer();
        let regen = Regenerator::new(&vq);
        let records: Vec<_> = (0..30).map(|i| record(i % 3, &[])).collect();
        let neurons = regen.regenerate_batch(&records).unwrap();
        assert_eq!(neurons.len(), 30);
        for rec in &records {
            assert_eq!(neurons[&rec.id].id, rec.id);
        }
    }

    #[test]
    fn test_batch_fails_whole_on_bad_code() {
        let vq = quantizer();
        let records = vec![record(0, &[]), record(5, &[])];
        assert!(Regenerator::new(&vq).regenerate_batch(&records).is_err());
    }

    #[test]
    fn test_restore_bookkeeping() {
        let vq = quantizer();
        let rec = record(0, &[]);
        let mut neuron = Regenerator::new(&vq).regenerate(&rec).unwrap();
        restore_bookkeeping(&mut neuron, &rec);
        assert_eq!(neuron.activation_count, 3);
        assert_eq!(neuron.cluster_id, Some(1));
    }
}
