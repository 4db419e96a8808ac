use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tonegraph::connection::ConnectionSnapshot;
use tonegraph::event_stream::{EventStreamReader, LoopingEventStream};
use tonegraph::node::{NodeKind, NodeSnapshot};
use tonegraph::port::PortType;
use tonegraph::{EngineConfig, GraphManager};

fn sequenced_graph() -> GraphManager {
    let mut graph = GraphManager::new(EngineConfig::default());
    for (id, kind) in [
        ("seq", NodeKind::Sequencer),
        ("poly", NodeKind::PolyphonicMidiConverter),
        ("osc", NodeKind::PolyphonicOscillator),
        ("out", NodeKind::AudioOutput),
    ] {
        graph.add_node(NodeSnapshot::new(id, kind)).ok();
    }
    for connection in [
        ConnectionSnapshot::new("c1", PortType::Midi, ("seq", "output"), ("poly", "input")),
        ConnectionSnapshot::new("c2", PortType::Polyphonic, ("poly", "poly"), ("osc", "input")),
        ConnectionSnapshot::new("c3", PortType::Audio, ("osc", "output"), ("out", "input")),
    ] {
        graph.add_connection(connection).ok();
    }
    graph
}

pub fn criterion_benchmark(c: &mut Criterion) {
    c.bench_function("EventStreamReader.read()", |b| {
        let mut reader = EventStreamReader::new(LoopingEventStream::demo());
        b.iter(|| black_box(reader.read(black_box(0.4))))
    });

    c.bench_function("GraphManager.on_tick()", |b| {
        let mut graph = sequenced_graph();
        let mut now = 0.0;
        b.iter(|| {
            now += 0.016;
            graph.on_tick(black_box(now));
        })
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
