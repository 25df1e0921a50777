//! Integration tests for the game server
//!
//! These tests run a real server on an ephemeral port and talk to it over
//! loopback sockets, plus a few whole-world properties that span modules.

use server::config::WorldParams;
use server::network::{Server, ServerMessage};
use server::physics::Vector2;
use server::transport::{self, Connection, ReadEvent};
use server::world::World;
use shared::{drain_records, ClientCommand, CubeRecord};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};
use tokio_test::assert_ok;

const READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Small, fast world without random viruses
fn test_params() -> WorldParams {
    WorldParams {
        width: 200.0,
        height: 200.0,
        heartbeats_per_second: 100,
        max_food_count: 30,
        virus_percent: 0,
        ..WorldParams::default()
    }
}

async fn start_server(params: WorldParams) -> (String, mpsc::UnboundedSender<ServerMessage>) {
    let world = World::with_seed(params, 99);
    let mut server = assert_ok!(Server::new("127.0.0.1:0", world).await);
    let addr = server.local_addr().to_string();
    let sender = server.sender();
    tokio::spawn(async move { server.run().await });
    (addr, sender)
}

/// Connection plus the records received but not yet inspected
struct TestClient {
    connection: Connection,
    queue: VecDeque<CubeRecord>,
}

impl TestClient {
    async fn join(addr: &str, name: &str) -> (TestClient, CubeRecord) {
        let connection = assert_ok!(transport::connect(addr).await);
        assert!(connection.write(format!("{}\n", name)));
        let mut client = TestClient {
            connection,
            queue: VecDeque::new(),
        };
        let me = client.next_record().await;
        (client, me)
    }

    fn send(&self, command: ClientCommand) {
        assert!(self.connection.write(command.to_line()));
    }

    async fn next_record(&mut self) -> CubeRecord {
        loop {
            if let Some(record) = self.queue.pop_front() {
                return record;
            }
            let event = timeout(READ_TIMEOUT, self.connection.request_more())
                .await
                .expect("no data from server");
            assert!(matches!(event, ReadEvent::Data(_)), "server closed the connection");
            for line in drain_records(self.connection.buffer_mut()) {
                self.queue.push_back(CubeRecord::from_line(&line).unwrap());
            }
        }
    }

    /// Reads until a record matches, giving up after the read timeout
    async fn wait_for<F>(&mut self, mut predicate: F) -> CubeRecord
    where
        F: FnMut(&CubeRecord) -> bool,
    {
        let deadline = Instant::now() + READ_TIMEOUT;
        loop {
            assert!(Instant::now() < deadline, "expected record never arrived");
            let record = self.next_record().await;
            if predicate(&record) {
                return record;
            }
        }
    }
}

/// WIRE PROTOCOL TESTS
mod protocol_tests {
    use super::*;

    /// Tests that the first record after joining is the player's own cube
    #[tokio::test]
    async fn join_returns_own_cube_then_snapshot() {
        let params = test_params();
        let (addr, _server) = start_server(params.clone()).await;

        let (mut client, me) = TestClient::join(&addr, "X").await;
        assert_eq!(me.name, "X");
        assert!(!me.is_food);
        assert_eq!(me.mass, params.player_start_mass);

        // Snapshot: every food cube, then the player list including us
        let mut food = 0;
        loop {
            let record = client.next_record().await;
            if record.is_food {
                food += 1;
            } else {
                assert_eq!(record.uid, me.uid);
                break;
            }
        }
        assert_eq!(food, params.max_food_count);
    }

    /// Tests that the name may arrive without a delimiter
    #[tokio::test]
    async fn join_without_delimiter() {
        let (addr, _server) = start_server(test_params()).await;
        let connection = transport::connect(&addr).await.unwrap();
        connection.write("  spaced name ");

        let mut client = TestClient {
            connection,
            queue: VecDeque::new(),
        };
        let me = client.next_record().await;
        assert_eq!(me.name, "spaced name");
    }

    /// Tests that every tick retransmits the player cells
    #[tokio::test]
    async fn ticks_keep_broadcasting_players() {
        let (addr, _server) = start_server(test_params()).await;
        let (mut client, me) = TestClient::join(&addr, "ticker").await;

        let mut seen = 0;
        while seen < 5 {
            let record = client.wait_for(|r| r.uid == me.uid).await;
            assert_eq!(record.name, "ticker");
            seen += 1;
        }
    }

    /// Tests that garbage records are dropped without ending the session
    #[tokio::test]
    async fn malformed_records_keep_session_alive() {
        let params = WorldParams {
            player_start_mass: 30.0,
            max_food_count: 0,
            ..test_params()
        };
        let (addr, _server) = start_server(params).await;
        let (mut client, me) = TestClient::join(&addr, "sloppy").await;

        client.connection.write("garbage\n(jump, 1, 2)\n(move, x, 4)\n");
        client.send(ClientCommand::Split { x: 20.0, y: 20.0 });

        let sibling = client
            .wait_for(|r| !r.is_food && r.name == "sloppy" && r.uid != me.uid)
            .await;
        assert_eq!(sibling.mass, 15.0);
    }
}

/// GAMEPLAY OVER THE WIRE
mod gameplay_tests {
    use super::*;

    /// Tests that a cell steered out of the world stays clamped inside
    #[tokio::test]
    async fn move_out_of_bounds_is_clamped() {
        let params = WorldParams {
            max_food_count: 0,
            heartbeats_per_second: 250,
            ..test_params()
        };
        let (addr, _server) = start_server(params.clone()).await;
        let (mut client, me) = TestClient::join(&addr, "runner").await;

        client.send(ClientCommand::Move { x: -500.0, y: -500.0 });

        let cornered = client
            .wait_for(|r| {
                if r.uid != me.uid || r.mass == 0.0 {
                    return false;
                }
                let half = r.width() / 2.0;
                assert!(r.x - half >= 0.0 && r.x + half <= params.width);
                assert!(r.y - half >= 0.0 && r.y + half <= params.height);
                r.x - half < 1.0 && r.y - half < 1.0
            })
            .await;
        assert!(cornered.x >= cornered.width() / 2.0);
    }

    /// Tests that a split produces two half-mass cells sharing the name
    #[tokio::test]
    async fn split_creates_sibling() {
        let params = WorldParams {
            player_start_mass: 40.0,
            max_food_count: 0,
            ..test_params()
        };
        let (addr, _server) = start_server(params).await;
        let (mut client, me) = TestClient::join(&addr, "splitter").await;

        // Throw the new half far away so the two do not recombine
        let far_y = if me.y > 100.0 { 10.0 } else { 190.0 };
        client.send(ClientCommand::Split { x: me.x, y: far_y });

        let sibling = client
            .wait_for(|r| r.name == "splitter" && r.uid != me.uid)
            .await;
        assert_eq!(sibling.mass, 20.0);
        assert_eq!(sibling.color, me.color);

        let founder = client.wait_for(|r| r.uid == me.uid).await;
        assert_eq!(founder.mass, 20.0);
    }

    /// Tests that a departed player is reported destroyed to the others
    #[tokio::test]
    async fn disconnect_is_broadcast() {
        let (addr, _server) = start_server(test_params()).await;
        let (mut watcher, _) = TestClient::join(&addr, "watcher").await;
        let (leaver, gone) = TestClient::join(&addr, "leaver").await;

        // Make sure the watcher has seen the leaver alive first
        watcher.wait_for(|r| r.uid == gone.uid && r.mass > 0.0).await;
        drop(leaver);

        let destroyed = watcher
            .wait_for(|r| r.uid == gone.uid && r.mass == 0.0)
            .await;
        assert_eq!(destroyed.name, "leaver");
    }

    /// Tests that the server stops on request
    #[tokio::test]
    async fn shutdown_closes_clients() {
        let (addr, server) = start_server(test_params()).await;
        let (mut client, _) = TestClient::join(&addr, "last").await;

        assert_ok!(server.send(ServerMessage::Shutdown));

        let deadline = Instant::now() + READ_TIMEOUT;
        loop {
            assert!(Instant::now() < deadline, "connection was never closed");
            let event = timeout(READ_TIMEOUT, client.connection.request_more())
                .await
                .unwrap();
            if event == ReadEvent::Closed {
                break;
            }
            client.connection.buffer_mut().clear();
        }
    }
}

/// WHOLE-WORLD PROPERTIES
mod world_tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    /// Tests that the default world holds exactly its food target
    #[test]
    fn food_population_holds_steady() {
        let params = WorldParams::default();
        let mut world = World::with_seed(params.clone(), 1);
        assert_eq!(world.food_count(), params.max_food_count);

        for _ in 0..100 {
            world.apply_attrition();
            world.resolve_collisions();
            assert!(world.replenish_food().is_empty());
        }
        assert_eq!(world.food_count(), 5000);
    }

    /// Tests mass conservation over many absorption pairs
    #[test]
    fn absorption_conserves_mass() {
        let params = WorldParams {
            max_food_count: 0,
            ..WorldParams::default()
        };

        for step in 1..50 {
            let mut world = World::with_seed(params.clone(), step);
            let big_mass = 50.0 + step as f64;
            let small_mass = big_mass - 1.0 - (step % 7) as f64;
            let big = world.add_player_at("big", Vector2::new(500.0, 500.0), big_mass);
            let small = world.add_player_at("small", Vector2::new(501.0, 501.0), small_mass);

            world.resolve_collisions();

            assert!(world.cube(small).is_none());
            assert_approx_eq!(world.cube(big).unwrap().mass, big_mass + small_mass);
        }
    }

    /// Tests that live uids never collide through churn
    #[test]
    fn uids_stay_unique_through_churn() {
        let params = WorldParams {
            max_food_count: 200,
            ..WorldParams::default()
        };
        let mut world = World::with_seed(params, 3);
        let mut players = Vec::new();

        for round in 0..30 {
            players.push(world.add_player(&format!("p{}", round)).uid);
            if round % 3 == 0 {
                let gone = players.remove(0);
                world.remove_player(gone);
            }
            world.resolve_collisions();
            world.replenish_food();

            let mut uids: Vec<u32> = world
                .players()
                .chain(world.food())
                .map(|cube| cube.uid.0)
                .collect();
            let total = uids.len();
            uids.sort_unstable();
            uids.dedup();
            assert_eq!(uids.len(), total);
        }
    }
}
