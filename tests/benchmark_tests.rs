//! Performance benchmarks for critical game systems

use server::config::WorldParams;
use server::entity::Uid;
use server::physics::Vector2;
use server::world::{TickDelta, World};
use shared::{encode_records, ClientCommand, CubeRecord};
use std::time::Instant;

fn crowded_world(players: usize) -> (World, Vec<Uid>) {
    let mut world = World::with_seed(WorldParams::default(), 2024);
    let uids = (0..players)
        .map(|i| world.add_player(&format!("bot{}", i)).uid)
        .collect();
    (world, uids)
}

/// Benchmarks filling a default world with food
#[test]
fn benchmark_world_construction() {
    let start = Instant::now();
    let world = World::with_seed(WorldParams::default(), 1);
    let duration = start.elapsed();

    println!("World construction: {} food in {:?}", world.food_count(), duration);

    assert_eq!(world.food_count(), 5000);
    // Should complete in under 2 seconds
    assert!(duration.as_millis() < 2000);
}

/// Benchmarks collision resolution over a full food table
#[test]
fn benchmark_collision_resolution() {
    let (mut world, _) = crowded_world(50);

    let iterations = 100;
    let start = Instant::now();

    for _ in 0..iterations {
        world.resolve_collisions();
        world.replenish_food();
    }

    let duration = start.elapsed();
    println!(
        "Collision resolution: {} players × {} food, {} passes in {:?} ({:.2} ms/pass)",
        world.player_count(),
        world.food_count(),
        iterations,
        duration,
        duration.as_secs_f64() * 1000.0 / iterations as f64
    );

    // Should complete in under 10 seconds
    assert!(duration.as_millis() < 10_000);
}

/// Benchmarks a complete tick including serialization
#[test]
fn benchmark_full_tick() {
    let (mut world, uids) = crowded_world(20);

    let iterations = 100;
    let mut bytes = 0;
    let start = Instant::now();

    for i in 0..iterations {
        world.apply_attrition();
        for (n, uid) in uids.iter().enumerate() {
            let angle = (i + n) as f64 / 10.0;
            world.move_toward(*uid, Vector2::new(500.0 + 400.0 * angle.cos(), 500.0 + 400.0 * angle.sin()));
        }
        let report = world.resolve_collisions();
        let spawned = world.replenish_food();

        let delta = TickDelta {
            destroyed: report.destroyed.iter().map(|cube| cube.to_record()).collect(),
            spawned: spawned.iter().map(|cube| cube.to_record()).collect(),
            players: world.player_records(),
        };
        bytes += delta.encode().unwrap().len();
    }

    let duration = start.elapsed();
    println!(
        "Full tick: {} ticks in {:?} ({:.2} ms/tick, {} bytes sent)",
        iterations,
        duration,
        duration.as_secs_f64() * 1000.0 / iterations as f64,
        bytes
    );

    // A 30Hz server needs well under 33ms per tick; allow slack for debug builds
    assert!(duration.as_millis() < 10_000);
}

/// Benchmarks encoding the join snapshot of a full world
#[test]
fn benchmark_snapshot_encoding() {
    let (world, _) = crowded_world(10);
    let snapshot: Vec<CubeRecord> = world.snapshot();

    let iterations = 20;
    let start = Instant::now();

    for _ in 0..iterations {
        let payload = encode_records(snapshot.iter()).unwrap();
        assert!(payload.len() > snapshot.len());
    }

    let duration = start.elapsed();
    println!(
        "Snapshot encoding: {} records × {} iterations in {:?}",
        snapshot.len(),
        iterations,
        duration
    );

    // Should complete in under 5 seconds
    assert!(duration.as_millis() < 5000);
}

/// Stress tests client command parsing
#[test]
fn stress_test_command_parsing() {
    let lines: Vec<String> = (0..10_000)
        .map(|i| {
            let command = if i % 10 == 0 {
                ClientCommand::Split { x: i as f64, y: 1.5 }
            } else {
                ClientCommand::Move { x: 2.5, y: i as f64 }
            };
            command.to_line()
        })
        .collect();

    let start = Instant::now();
    let mut splits = 0;
    for line in &lines {
        if let ClientCommand::Split { .. } = ClientCommand::parse(line).unwrap() {
            splits += 1;
        }
    }
    let duration = start.elapsed();

    println!("Command parsing: {} commands in {:?}", lines.len(), duration);

    assert_eq!(splits, 1000);
    // Should complete in under 1 second
    assert!(duration.as_millis() < 1000);
}
