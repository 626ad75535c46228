//! Performance benchmarks for the hot paths of the world server

use server::config::WorldConfig;
use server::dispatcher::{Dispatcher, Envelope};
use server::network::Connections;
use server::registry::{Player, Registry};
use server::session::ConnectionHandle;
use server::tick::run_tick;
use server::world::World;
use shared::{codes, MoveInput, SerializedEvent};
use std::time::Instant;
use tokio::sync::mpsc;

/// Benchmarks entity creation and destruction with slot reuse
#[test]
fn benchmark_registry_churn() {
    let mut registry = Registry::new();
    let iterations = 100_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let entity = registry.create();
        registry.emplace(entity, Player::default());
        registry.destroy(entity);
    }

    let duration = start.elapsed();
    println!(
        "Registry churn: {} iterations in {:?} ({:.2} ns/iter)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );

    assert!(registry.is_empty());
    // Should complete in under 500ms for 100k create/destroy pairs
    assert!(duration.as_millis() < 500);
}

/// Benchmarks routing events through several handlers
#[test]
fn benchmark_dispatch() {
    let mut dispatcher: Dispatcher<u64> = Dispatcher::new();
    for _ in 0..4 {
        dispatcher.subscribe(codes::MOVE, |envelope, total, _| {
            *total += envelope.event.payload.len() as u64;
        });
    }

    let payload = MoveInput { x: 1.0, y: 0.0 }.to_payload().unwrap();
    let iterations = 100_000;
    let mut total = 0;
    let start = Instant::now();

    for _ in 0..iterations {
        let envelope = Envelope {
            source: None,
            event: SerializedEvent::new(codes::MOVE, payload.clone()),
        };
        dispatcher.publish(&mut total, envelope);
    }

    let duration = start.elapsed();
    println!(
        "Dispatch: {} events in {:?} ({:.2} ns/event)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );

    assert_eq!(total, iterations * 4 * payload.len() as u64);
    // Should complete in under 1 second
    assert!(duration.as_millis() < 1000);
}

/// Benchmarks message handling from many sessions
#[test]
fn benchmark_message_handling() {
    let mut world = World::from_config(&WorldConfig::default());
    let handles: Vec<ConnectionHandle> = (0..64).map(|_| ConnectionHandle::next()).collect();
    for &handle in &handles {
        world.open(handle).unwrap();
    }

    let message = MoveInput { x: 0.5, y: 0.5 }.to_message().unwrap();
    let rounds = 1_000;
    let start = Instant::now();

    for _ in 0..rounds {
        for &handle in &handles {
            world.handle_message(handle, &message).unwrap();
        }
    }

    let duration = start.elapsed();
    println!(
        "Message handling: {} messages in {:?}",
        rounds * handles.len(),
        duration
    );

    // Should complete in under 2 seconds
    assert!(duration.as_millis() < 2000);
}

/// Benchmarks full ticks with many connected sessions
#[test]
fn benchmark_broadcast_many_sessions() {
    let mut world = World::from_config(&WorldConfig::default());
    let mut connections = Connections::new();
    let mut receivers = Vec::new();

    for _ in 0..128 {
        let handle = ConnectionHandle::next();
        let (tx, rx) = mpsc::channel(1024);
        world.open(handle).unwrap();
        connections.insert(handle, tx);
        receivers.push(rx);
    }

    let ticks = 500;
    let start = Instant::now();
    let mut sent = 0;

    for _ in 0..ticks {
        sent += run_tick(&mut world, &mut connections, 1.0 / 30.0).sent;
        for rx in receivers.iter_mut() {
            while rx.try_recv().is_ok() {}
        }
    }

    let duration = start.elapsed();
    println!(
        "Broadcast: {} ticks for {} sessions in {:?} ({:.2} μs/tick)",
        ticks,
        receivers.len(),
        duration,
        duration.as_micros() as f64 / ticks as f64
    );

    assert_eq!(sent, ticks * receivers.len());
    // Should complete in under 5 seconds
    assert!(duration.as_millis() < 5000);
}
