//! Game server: connection sessions, the world-owning actor and the tick loop

use crate::client_manager::{Client, ClientManager};
use crate::entity::Uid;
use crate::error::{ServerError, TransportError};
use crate::physics::Vector2;
use crate::transport::{self, Connection, ConnectionId, ReadEvent, WriteHandle};
use crate::world::{TickDelta, World};
use log::{debug, error, info, warn};
use shared::{drain_records, encode_records, ClientCommand, CubeRecord, RECORD_DELIMITER};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};

/// Messages sent from connection sessions to the server loop
#[derive(Debug)]
pub enum ServerMessage {
    /// A client finished the join handshake.
    Join {
        id: ConnectionId,
        name: String,
        writer: WriteHandle,
    },
    Move {
        id: ConnectionId,
        target: Vector2,
    },
    Split {
        id: ConnectionId,
        target: Vector2,
    },
    Disconnected {
        id: ConnectionId,
    },
    Shutdown,
}

/// Main server owning the world, pending intents and the client registry
///
/// Only the server loop touches these; sessions talk to it through
/// [`ServerMessage`]s, so ticks never interleave with other mutations.
pub struct Server {
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
    world: World,
    clients: ClientManager,
    /// Latest target per player, applied every tick until replaced.
    intents: HashMap<Uid, Vector2>,
    /// Cells removed between ticks, reported with the next tick.
    pending_destroyed: Vec<CubeRecord>,
    tick_duration: Duration,
    tick: u64,

    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
}

impl Server {
    pub async fn new(addr: &str, world: World) -> Result<Self, ServerError> {
        let listener = transport::bind(addr).await?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| TransportError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        info!("Server listening on {}", local_addr);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        Ok(Server {
            listener: Some(listener),
            local_addr,
            tick_duration: world.params().tick_duration(),
            world,
            clients: ClientManager::new(),
            intents: HashMap::new(),
            pending_destroyed: Vec::new(),
            tick: 0,
            server_tx,
            server_rx,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Sender for injecting messages, e.g. [`ServerMessage::Shutdown`].
    pub fn sender(&self) -> mpsc::UnboundedSender<ServerMessage> {
        self.server_tx.clone()
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    /// Spawns the task accepting connections; each gets its own session
    fn spawn_acceptor(&mut self) {
        let Some(listener) = self.listener.take() else {
            return;
        };
        let server_tx = self.server_tx.clone();

        tokio::spawn(transport::accept_loop(listener, move |connection| {
            run_session(connection, server_tx.clone())
        }));
    }

    /// Processes one message from a session
    ///
    /// Returns false when the server should stop.
    fn handle_message(&mut self, message: ServerMessage) -> bool {
        match message {
            ServerMessage::Join { id, name, writer } => self.handle_join(id, name, writer),
            ServerMessage::Move { id, target } => {
                if let Some(uid) = self.clients.uid_of(id) {
                    if self.world.contains_player(uid) {
                        self.intents.insert(uid, target);
                    }
                }
            }
            ServerMessage::Split { id, target } => {
                if let Some(uid) = self.clients.uid_of(id) {
                    let created = self.world.split(uid, target);
                    if !created.is_empty() {
                        debug!("Player {} split into {} new cells", uid, created.len());
                    }
                }
            }
            ServerMessage::Disconnected { id } => {
                if let Some(uid) = self.clients.remove_client(id).and_then(|client| client.uid) {
                    self.remove_player(uid);
                }
            }
            ServerMessage::Shutdown => return false,
        }
        true
    }

    /// Creates the player and sends it its own cube followed by the world
    fn handle_join(&mut self, id: ConnectionId, name: String, writer: WriteHandle) {
        let cube = self.world.add_player(&name);
        let own = cube.to_record();
        let snapshot = self.world.snapshot();

        let payload = match encode_records(std::iter::once(&own).chain(snapshot.iter())) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to encode join payload for '{}': {}", name, e);
                self.world.remove_player(cube.uid);
                writer.teardown();
                return;
            }
        };

        if !writer.write(payload) {
            debug!("Connection {} closed before join completed", id);
            self.remove_player(cube.uid);
            return;
        }

        let start_mass = self.world.params().player_start_mass;
        self.clients
            .add_client(Client::new(id, cube.uid, name, writer, start_mass));
    }

    fn remove_player(&mut self, uid: Uid) {
        self.intents.remove(&uid);
        let removed = self.world.remove_player(uid);
        self.pending_destroyed
            .extend(removed.iter().map(|cube| cube.to_record()));
    }

    /// Advances the world by one heartbeat and returns what changed
    pub fn tick(&mut self) -> TickDelta {
        self.tick += 1;
        self.world.apply_attrition();

        let world = &mut self.world;
        self.intents.retain(|uid, target| {
            if world.contains_player(*uid) {
                world.move_toward(*uid, *target);
                true
            } else {
                debug!("Dropping intent for stale uid {}", uid);
                false
            }
        });

        let report = self.world.resolve_collisions();
        for meal in &report.meals {
            self.clients.record_meal(meal);
        }
        // Eaten players lose their uid before anything can reuse it
        let world = &self.world;
        self.clients.release_eaten(|uid| world.contains_player(uid));
        let spawned = self.world.replenish_food();

        let uids: Vec<Uid> = self.clients.players().collect();
        for uid in uids {
            if let Some(mass) = self.world.player_mass(uid) {
                self.clients.observe_mass(uid, mass);
            }
        }

        let mut destroyed = std::mem::take(&mut self.pending_destroyed);
        destroyed.extend(report.destroyed.iter().map(|cube| cube.to_record()));

        TickDelta {
            destroyed,
            spawned: spawned.iter().map(|cube| cube.to_record()).collect(),
            players: self.world.player_records(),
        }
    }

    /// Sends a tick's records to every client, pruning dead connections
    fn broadcast_delta(&mut self, delta: &TickDelta) {
        if self.clients.is_empty() {
            return;
        }

        let payload = match delta.encode() {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to encode tick {}: {}", self.tick, e);
                return;
            }
        };

        for uid in self.clients.broadcast(&payload).into_iter().filter_map(|client| client.uid) {
            self.remove_player(uid);
        }
    }

    /// Main server loop coordinating ticks and session messages
    pub async fn run(&mut self) -> Result<(), ServerError> {
        self.spawn_acceptor();

        let mut tick_interval = interval(self.tick_duration);
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let summary_every = u64::from(self.world.params().heartbeats_per_second.max(1));

        info!("Server started successfully");

        loop {
            tokio::select! {
                biased;

                _ = tick_interval.tick() => {
                    let started = Instant::now();
                    let delta = self.tick();
                    self.broadcast_delta(&delta);

                    if self.tick % summary_every == 0 {
                        debug!(
                            "Tick {}: {} connections, {} player cells, {} food, {} records, {:?}",
                            self.tick,
                            self.clients.len(),
                            self.world.player_count(),
                            self.world.food_count(),
                            delta.record_count(),
                            started.elapsed()
                        );
                    }
                },

                message = self.server_rx.recv() => {
                    let keep_running = match message {
                        Some(message) => self.handle_message(message),
                        None => false,
                    };
                    if !keep_running {
                        break;
                    }
                },
            }
        }

        let dropped = self.clients.disconnect_all();
        info!("Server shutting down, disconnected {} clients", dropped);
        Ok(())
    }
}

/// Takes the display name off the front of the first chunk
///
/// The name runs up to the first delimiter, or is the whole chunk when no
/// delimiter was sent. Anything after the delimiter stays in the buffer.
fn take_join_name(buffer: &mut String) -> Option<String> {
    if buffer.is_empty() {
        return None;
    }

    let line = match buffer.find(RECORD_DELIMITER) {
        Some(end) => {
            let rest = buffer.split_off(end + RECORD_DELIMITER.len_utf8());
            let mut line = std::mem::replace(buffer, rest);
            line.truncate(end);
            line
        }
        None => std::mem::take(buffer),
    };
    Some(line.trim().to_string())
}

/// Runs one client from handshake to disconnect
async fn run_session(mut connection: Connection, server_tx: mpsc::UnboundedSender<ServerMessage>) {
    let id = connection.id();
    let peer = connection.peer();

    let name = loop {
        match connection.request_more().await {
            ReadEvent::Data(_) => {
                if let Some(name) = take_join_name(connection.buffer_mut()) {
                    break name;
                }
            }
            ReadEvent::Closed => {
                debug!("Connection {} from {} left before joining", id, peer);
                return;
            }
        }
    };

    let join = ServerMessage::Join {
        id,
        name,
        writer: connection.writer(),
    };
    if let Err(e) = server_tx.send(join) {
        error!("Failed to send join to main loop: {}", e);
        return;
    }

    'session: loop {
        for record in drain_records(connection.buffer_mut()) {
            let message = match ClientCommand::parse(&record) {
                Ok(ClientCommand::Move { x, y }) => ServerMessage::Move {
                    id,
                    target: Vector2::new(x, y),
                },
                Ok(ClientCommand::Split { x, y }) => ServerMessage::Split {
                    id,
                    target: Vector2::new(x, y),
                },
                Err(e) => {
                    debug!("Dropping malformed record from {}: {}", peer, e);
                    continue;
                }
            };

            if let Err(e) = server_tx.send(message) {
                warn!("Main loop gone, closing connection {}: {}", id, e);
                break 'session;
            }
        }

        if connection.request_more().await == ReadEvent::Closed {
            break;
        }
    }

    connection.teardown();
    if let Err(e) = server_tx.send(ServerMessage::Disconnected { id }) {
        debug!("Could not report disconnect of {}: {}", id, e);
    }
}
