use std::hint::black_box;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use pagegraph_collab::protocol::{BroadcastMessage, Envelope};
use pagegraph_collab::broadcast::{HubConfig, TabHub};
use pagegraph_core::{RemoteUpdate, Vertex, VertexId};
use uuid::Uuid;

fn field_update() -> RemoteUpdate {
    RemoteUpdate::UpdateVertex(
        Vertex::new(VertexId(42), "Field")
            .with_property("label", "Email")
            .with_property("required", true)
            .with_property("order", 3),
    )
}

fn bench_envelope_encode(c: &mut Criterion) {
    let client = Uuid::new_v4();
    let message = BroadcastMessage::new(field_update(), Uuid::new_v4());

    c.bench_function("envelope_encode_vertex", |b| {
        b.iter(|| {
            let envelope = Envelope::update(black_box(client), black_box(1), &message).unwrap();
            black_box(envelope.encode().unwrap());
        })
    });
}

fn bench_envelope_decode(c: &mut Criterion) {
    let message = BroadcastMessage::new(field_update(), Uuid::new_v4());
    let encoded = Envelope::update(Uuid::new_v4(), 1, &message)
        .unwrap()
        .encode()
        .unwrap();

    c.bench_function("envelope_decode_vertex", |b| {
        b.iter(|| {
            let envelope = Envelope::decode(black_box(&encoded)).unwrap();
            black_box(envelope.message().unwrap());
        })
    });
}

fn bench_hub_fanout(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("hub_fanout");

    for tabs in [2usize, 10, 50] {
        let hub = Arc::new(TabHub::new(Uuid::new_v4(), HubConfig { capacity: 1024 }));
        let (sender, mut links) = runtime.block_on(async {
            let sender = hub.join().await;
            let mut links = Vec::new();
            for _ in 0..tabs {
                links.push(hub.join().await);
            }
            (sender, links)
        });

        group.bench_with_input(BenchmarkId::from_parameter(tabs), &tabs, |b, _| {
            b.iter(|| {
                runtime.block_on(sender.publish(field_update())).unwrap();
                for link in links.iter_mut() {
                    black_box(link.try_next().unwrap());
                }
            })
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_envelope_encode,
    bench_envelope_decode,
    bench_hub_fanout,
);
criterion_main!(benches);
