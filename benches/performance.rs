//! Performance benchmarks for the game state store and stream fan-out.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use scoreline::{
    ChannelSink, EventParser, GameState, LocalBus, Player, PlayerUpdate, ServerConfig,
    ServerContext, SessionConfig, StateStore, StoreConfig, StreamEvent,
};
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn create_store(dir: &TempDir) -> StateStore {
    StateStore::open(
        StoreConfig {
            path: dir.path().join("data"),
            ..Default::default()
        },
        Arc::new(LocalBus::new()),
    )
    .unwrap()
}

fn create_context(dir: &TempDir) -> ServerContext {
    ServerContext::open(ServerConfig {
        store: StoreConfig {
            path: dir.path().join("data"),
            ..Default::default()
        },
        session: SessionConfig {
            heartbeat_interval: Duration::from_secs(3600),
            max_lifetime: Duration::from_secs(3600),
        },
    })
    .unwrap()
}

fn roster(size: u32) -> GameState {
    let mut state = GameState::initial();
    state.players = (1..=size)
        .map(|i| Player::new(i, format!("Player {}", i)))
        .collect();
    state
}

/// Benchmark a single-player merge (load, merge, persist, publish)
fn bench_update_player(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let store = create_store(&dir);
    store.load().unwrap();

    let mut points = 0;
    c.bench_function("update_player", |b| {
        b.iter(|| {
            points += 1;
            black_box(
                store
                    .update_player(3, &PlayerUpdate::default().points(points))
                    .unwrap(),
            );
        });
    });
}

/// Benchmark whole-document saves with varying roster sizes
fn bench_save_roster(c: &mut Criterion) {
    let mut group = c.benchmark_group("save_roster");

    for size in [10u32, 100, 1000] {
        group.bench_with_input(BenchmarkId::new("players", size), &size, |b, &size| {
            let dir = TempDir::new().unwrap();
            let store = create_store(&dir);
            let state = roster(size);

            b.iter(|| {
                black_box(store.save(state.clone()).unwrap());
            });
        });
    }

    group.finish();
}

/// Benchmark a save fanned out to varying numbers of open sessions
fn bench_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("fan_out");
    group.sample_size(20);

    for sessions in [1usize, 10, 50] {
        group.bench_with_input(
            BenchmarkId::new("sessions", sessions),
            &sessions,
            |b, &count| {
                let dir = TempDir::new().unwrap();
                let ctx = create_context(&dir);

                let streams: Vec<_> = (0..count)
                    .map(|_| {
                        let (sink, rx) = ChannelSink::channel();
                        (ctx.open_session(sink, None).unwrap(), rx)
                    })
                    .collect();

                let mut points = 0;
                b.iter(|| {
                    points += 1;
                    ctx.store()
                        .update_player(1, &PlayerUpdate::default().points(points))
                        .unwrap();
                    for (_, rx) in &streams {
                        black_box(rx.try_iter().count());
                    }
                });
            },
        );
    }

    group.finish();
}

/// Benchmark parsing and decoding a buffered stream of update events
fn bench_decode_stream(c: &mut Criterion) {
    let frame = StreamEvent::GameStateUpdate(roster(10)).to_frame().unwrap();
    let wire = frame.repeat(100);

    c.bench_function("decode_stream_100", |b| {
        b.iter(|| {
            let mut reader = Cursor::new(wire.as_bytes());
            let mut parser = EventParser::new();
            let mut decoded = 0;
            while let Some(raw) = parser.next_event(&mut reader).unwrap() {
                if StreamEvent::decode(&raw).unwrap().is_some() {
                    decoded += 1;
                }
            }
            black_box(decoded);
        });
    });
}

criterion_group!(
    benches,
    bench_update_player,
    bench_save_roster,
    bench_fan_out,
    bench_decode_stream,
);

criterion_main!(benches);
