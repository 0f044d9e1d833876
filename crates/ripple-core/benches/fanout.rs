//! Registry and fanout benchmarks for ripple-core.

use async_trait::async_trait;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ripple_core::{Broadcaster, Connection, ConnectionRegistry, ServerMessage, UserId};
use ripple_transport::{ConnectionId, MessageSink, TransportError};
use std::sync::Arc;

/// Sink that accepts everything.
struct NullSink;

#[async_trait]
impl MessageSink for NullSink {
    async fn send_text(&self, text: &str) -> Result<(), TransportError> {
        black_box(text);
        Ok(())
    }

    async fn close(&self, _code: u16, _reason: &str) -> Result<(), TransportError> {
        Ok(())
    }

    fn is_open(&self) -> bool {
        true
    }
}

fn connection(id: String, user: &UserId) -> Connection {
    Connection::new(ConnectionId::new(id), user.clone(), Arc::new(NullSink))
}

/// Benchmark registry operations.
fn bench_registry(c: &mut Criterion) {
    let mut group = c.benchmark_group("registry");

    group.bench_function("register_unregister", |b| {
        let registry = ConnectionRegistry::new();
        let user = UserId::parse("bench-user").unwrap();
        let mut i = 0u64;
        b.iter(|| {
            let conn = connection(format!("conn:{}", i), &user);
            let id = conn.id().clone();
            registry.register(conn);
            registry.unregister(black_box(&user), black_box(&id));
            i += 1;
        })
    });

    group.bench_function("connections_for", |b| {
        let registry = ConnectionRegistry::new();
        let user = UserId::parse("bench-user").unwrap();
        for i in 0..16 {
            registry.register(connection(format!("conn:{}", i), &user));
        }
        b.iter(|| registry.connections_for(black_box(&user)))
    });

    group.finish();
}

/// Benchmark delivery to one user's connections.
fn bench_fanout(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("fanout");
    let message = ServerMessage::new(
        "WEIGHTS_UPDATED",
        Some(serde_json::json!({"id": "w1", "animal_id": "a1", "weight": 4.2})),
    );

    for connections in [1usize, 10, 100] {
        let registry = Arc::new(ConnectionRegistry::new());
        let user = UserId::parse("bench-user").unwrap();
        for i in 0..connections {
            registry.register(connection(format!("conn:{}", i), &user));
        }
        let broadcaster = Broadcaster::new(registry);

        group.throughput(Throughput::Elements(connections as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(connections),
            &connections,
            |b, _| {
                b.iter(|| {
                    rt.block_on(broadcaster.broadcast_to_user(black_box(&user), &message))
                        .unwrap()
                })
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_registry, bench_fanout);
criterion_main!(benches);
