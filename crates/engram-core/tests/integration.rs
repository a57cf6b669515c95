//! Integration tests across the full storage cycle:
//! neuron → quantize → compact → snapshot → regenerate, alongside the
//! synapse graph's learn → decay → prune lifecycle.

use engram_core::{
    Coactivation, CompactNeuron, DEFAULT_MATERIALITY, EngineSnapshot, GraphConfig, Neuron,
    NeuronId, NeuronParameters, QuantizerConfig, Regenerator, RuntimeNeuron, SynapseGraph,
    VectorQuantizer, compression_ratio, export_json, import_json, restore_bookkeeping,
};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

fn rng() -> SmallRng {
    SmallRng::seed_from_u64(42)
}

fn random_vector(rng: &mut impl Rng, dim: usize) -> Vec<f32> {
    (0..dim).map(|_| rng.random_range(-1.0..1.0)).collect()
}

fn live_neuron(id: NeuronId, peers: &[NeuronId], rng: &mut impl Rng) -> Neuron {
    let mut n = Neuron::new(
        id,
        NeuronParameters {
            threshold: 0.5,
            bias: 0.0,
            learning_rate: 0.05,
        },
    );
    for &peer in peers {
        n.connect(peer, rng.random_range(-0.5..0.5));
    }
    n.activation_count = rng.random_range(0..100);
    n.associate_concept("concept");
    n
}

#[test]
fn grid_scenario() {
    let vq = VectorQuantizer::new(
        QuantizerConfig::new(4, 2),
        vec![
            vec![0.0, 0.0],
            vec![10.0, 0.0],
            vec![0.0, 10.0],
            vec![10.0, 10.0],
        ],
    )
    .unwrap();
    assert_eq!(vq.quantize(&[1.0, 1.0]).unwrap(), 0);
    assert_eq!(vq.quantize(&[9.0, 9.0]).unwrap(), 3);
}

#[test]
fn hebbian_scenario() {
    let mut graph = SynapseGraph::new(GraphConfig {
        learning_rate: 0.5,
        creation_threshold: 0.05,
        ..GraphConfig::default()
    })
    .unwrap();
    let (x, y) = (NeuronId::new(), NeuronId::new());
    assert_eq!(graph.record_coactivation(x, y, 1.0, 1.0), Coactivation::Created(0.5));
    assert_eq!(graph.record_coactivation(x, y, 1.0, 1.0), Coactivation::Updated(1.0));
}

#[test]
fn compaction_scenario() {
    let (y, z) = (NeuronId::new(), NeuronId::new());
    let mut n = Neuron::new(
        NeuronId::new(),
        NeuronParameters {
            threshold: 0.5,
            bias: 0.0,
            learning_rate: 0.01,
        },
    );
    n.connect(y, 0.05);
    n.connect(z, 0.3);
    let record = CompactNeuron::compact(&n, 0, DEFAULT_MATERIALITY);
    assert_eq!(record.weights.into_iter().collect::<Vec<_>>(), vec![(z, 0.3)]);
}

/// Compact a population, round-trip it through JSON, and regenerate it.
#[test]
fn compact_snapshot_regenerate_cycle() {
    let mut rng = rng();
    let dim = 16;
    let mut vq = VectorQuantizer::random(QuantizerConfig::new(32, dim), &mut rng).unwrap();

    let ids: Vec<NeuronId> = (0..50).map(|_| NeuronId::new()).collect();
    let mut records = Vec::new();
    let mut full_bytes = 0;
    for &id in &ids {
        let n = live_neuron(id, &ids, &mut rng);
        full_bytes += n.estimated_bytes(dim);
        let features = random_vector(&mut rng, dim);
        let (code, _) = vq.quantize_and_update(&features).unwrap();
        records.push(CompactNeuron::compact(&n, code, DEFAULT_MATERIALITY));
    }

    for rec in &records {
        assert!(!rec.weights.contains_key(&rec.id));
        assert!(rec.weights.values().all(|w| w.abs() > DEFAULT_MATERIALITY));
    }

    let record_bytes: usize = records.iter().map(CompactNeuron::estimated_bytes).sum();
    assert!(record_bytes < full_bytes);
    assert!(compression_ratio(full_bytes / records.len(), &records[0]) > 1.0);

    let graph = SynapseGraph::default();
    let json = export_json(&EngineSnapshot::capture(&vq, &records, &graph, 0)).unwrap();
    let state = import_json(&json)
        .unwrap()
        .into_state(SynapseGraph::default())
        .unwrap();

    let regen = Regenerator::new(&state.quantizer);
    let neurons = regen.regenerate_batch(&state.records).unwrap();
    assert_eq!(neurons.len(), ids.len());

    for rec in &records {
        let mut n = neurons[&rec.id].clone();
        restore_bookkeeping(&mut n, rec);
        assert_eq!(n.activation_count, rec.activation_count);
        assert_eq!(n.weights.len(), rec.weights.len());
        for (target, w) in &rec.weights {
            assert_eq!(n.weights().get(target), Some(w));
        }
        assert!((0.4..=0.6).contains(&n.threshold()));
        assert!(n.bias().abs() < 0.1);
        assert_eq!(n.concept_tag(), Some("concept"));
    }
}

/// Records sharing a code regenerate identical parameters.
#[test]
fn shared_code_parameters() {
    let mut rng = rng();
    let vq = VectorQuantizer::random(QuantizerConfig::new(4, 8), &mut rng).unwrap();
    let regen = Regenerator::new(&vq);
    let ids: Vec<NeuronId> = (0..10).map(|_| NeuronId::new()).collect();

    let neurons: Vec<Neuron> = ids
        .iter()
        .map(|&id| {
            let n = live_neuron(id, &ids, &mut rng);
            regen
                .regenerate(&CompactNeuron::compact(&n, 2, DEFAULT_MATERIALITY))
                .unwrap()
        })
        .collect();

    for pair in neurons.windows(2) {
        assert_eq!(pair[0].threshold, pair[1].threshold);
        assert_eq!(pair[0].bias, pair[1].bias);
    }
}

/// Graph edge count tracks use: learn a few clusters, then let them fade.
#[test]
fn graph_learns_then_forgets() {
    let mut graph = SynapseGraph::new(GraphConfig {
        learning_rate: 0.2,
        ..GraphConfig::default()
    })
    .unwrap();
    let population: Vec<NeuronId> = (0..40).map(|_| NeuronId::new()).collect();

    for cluster in population.chunks(5) {
        let active: Vec<(NeuronId, f32)> = cluster.iter().map(|&id| (id, 1.0)).collect();
        for _ in 0..3 {
            graph.record_coactivation_pattern(&active);
        }
    }

    let stats = graph.stats();
    // 8 clusters × 5 × 4 directed edges
    assert_eq!(stats.edge_count, 160);
    assert_eq!(stats.neuron_count, 40);
    assert!(stats.sparsity < 0.15, "sparsity {}", stats.sparsity);
    assert!((stats.max_weight - 0.6).abs() < 1e-5);

    let mut passes = 0;
    while !graph.is_empty() {
        graph.apply_decay(0.5);
        passes += 1;
        assert!(passes < 50);
    }
    assert_eq!(graph.stats().edge_count, 0);
}
