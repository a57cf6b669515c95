use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use engram_core::{GraphConfig, NeuronId, SynapseGraph};
use engram_store::Store;

fn clustered_graph(neurons: u128) -> SynapseGraph {
    let ids: Vec<NeuronId> = (0..neurons).map(NeuronId::from_u128).collect();
    let mut graph = SynapseGraph::new(GraphConfig {
        learning_rate: 0.5,
        ..GraphConfig::default()
    })
    .unwrap();
    for cluster in ids.chunks(10) {
        let active: Vec<(NeuronId, f32)> = cluster.iter().map(|&id| (id, 1.0)).collect();
        graph.record_coactivation_pattern(&active);
    }
    graph
}

fn bench_save_graph(c: &mut Criterion) {
    let mut group = c.benchmark_group("save_graph");
    group.sample_size(20);
    for neurons in [100, 1000] {
        let graph = clustered_graph(neurons);
        let store = Store::open_in_memory().unwrap();
        group.bench_with_input(
            BenchmarkId::from_parameter(graph.edge_count()),
            &graph,
            |b, graph| b.iter(|| store.save_graph(graph).unwrap()),
        );
    }
    group.finish();
}

fn bench_load_graph(c: &mut Criterion) {
    let store = Store::open_in_memory().unwrap();
    store.save_graph(&clustered_graph(1000)).unwrap();
    c.bench_function("load_graph_9000_edges", |b| {
        b.iter(|| store.load_graph(GraphConfig::default()).unwrap())
    });
}

criterion_group!(benches, bench_save_graph, bench_load_graph);
criterion_main!(benches);
