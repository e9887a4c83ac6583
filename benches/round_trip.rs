//! Connection round-trip benchmark suite.
//!
//! Benchmarks command correlation over the in-memory transport:
//! - Sequential round trips
//! - Concurrent round trips: 1, 16, 128 in flight
//! - Event fan-out to listeners
//!
//! Run with: cargo bench --bench round_trip
//! Results saved to: target/criterion/

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bidi_webdriver::identifiers::CommandId;
use bidi_webdriver::protocol::event::{Event, names};
use bidi_webdriver::protocol::SessionCommand;
use bidi_webdriver::transport::{ChannelRemote, Connection, channel_pair};
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use futures_util::future::join_all;
use serde_json::json;
use tokio::runtime::Runtime;

// ============================================================================
// Configuration
// ============================================================================

const IN_FLIGHT: &[usize] = &[1, 16, 128];
const LISTENER_COUNTS: &[usize] = &[1, 8, 64];

// ============================================================================
// Helpers
// ============================================================================

/// Answers every command immediately.
fn spawn_echo(mut remote: ChannelRemote) {
    tokio::spawn(async move {
        while let Some(frame) = remote.recv().await {
            if let Some(id) = frame["id"].as_u64() {
                remote.respond(CommandId::new(id), json!({"ready": true}));
            }
        }
    });
}

fn echo_connection(rt: &Runtime) -> Connection {
    rt.block_on(async {
        let (transport, remote) = channel_pair();
        spawn_echo(remote);
        Connection::new(Arc::new(transport), Duration::from_secs(5), None)
            .expect("Failed to create connection")
    })
}

// ============================================================================
// Benchmark: Command Round Trip
// ============================================================================

fn bench_round_trip(c: &mut Criterion) {
    let rt = Runtime::new().expect("Failed to create runtime");
    let connection = echo_connection(&rt);

    let mut group = c.benchmark_group("command_round_trip");

    group.bench_function("sequential", |b| {
        b.to_async(&rt).iter(|| async {
            connection
                .send(SessionCommand::Status {})
                .await
                .expect("round trip")
        });
    });

    for &in_flight in IN_FLIGHT {
        group.bench_with_input(
            BenchmarkId::new("concurrent", in_flight),
            &in_flight,
            |b, &count| {
                b.to_async(&rt).iter(|| async {
                    let sends = (0..count).map(|_| connection.send(SessionCommand::Status {}));
                    for result in join_all(sends).await {
                        result.expect("round trip");
                    }
                });
            },
        );
    }

    group.finish();
}

// ============================================================================
// Benchmark: Event Dispatch
// ============================================================================

fn bench_event_dispatch(c: &mut Criterion) {
    let rt = Runtime::new().expect("Failed to create runtime");
    let connection = echo_connection(&rt);
    let event = Event::new(
        names::LOAD,
        json!({"context": "ctx-1", "navigation": "nav-1", "timestamp": 0, "url": "about:blank"}),
    )
    .parse();

    let mut group = c.benchmark_group("event_dispatch");

    for &listeners in LISTENER_COUNTS {
        let delivered = Arc::new(AtomicUsize::new(0));
        let ids: Vec<_> = (0..listeners)
            .map(|_| {
                let delivered = Arc::clone(&delivered);
                connection.on(names::LOAD, move |_| {
                    delivered.fetch_add(1, Ordering::Relaxed);
                })
            })
            .collect();

        group.bench_with_input(BenchmarkId::new("listeners", listeners), &listeners, |b, _| {
            b.iter(|| connection.emit_local(&event));
        });

        for id in ids {
            connection.off(names::LOAD, id);
        }
    }

    group.finish();
}

// ============================================================================
// Criterion Configuration
// ============================================================================

criterion_group!(benches, bench_round_trip, bench_event_dispatch);
criterion_main!(benches);
