//! Connection registry and per-player bookkeeping
//!
//! This module tracks every client that completed the join handshake:
//! - Which player uid a connection controls
//! - The write handle used to broadcast tick payloads to it
//! - In-memory statistics reported when the player leaves
//!
//! The registry lives inside the server actor, so it needs no locking.
//! Connections whose writer has shut down are pruned during broadcast.

use crate::entity::{CubeKind, Uid};
use crate::transport::{ConnectionId, WriteHandle};
use crate::world::Meal;
use log::{debug, info};
use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

/// Running statistics for one player session
#[derive(Debug, Clone)]
pub struct PlayerStats {
    /// When the player joined
    pub joined: Instant,
    /// Largest combined mass observed at the end of a tick
    pub max_mass: f64,
    /// Food, viruses and players consumed
    pub cubes_eaten: u32,
    /// Names of the players consumed, in order
    pub players_eaten: Vec<String>,
}

impl PlayerStats {
    pub fn new(start_mass: f64) -> Self {
        Self {
            joined: Instant::now(),
            max_mass: start_mass,
            cubes_eaten: 0,
            players_eaten: Vec::new(),
        }
    }

    pub fn time_alive(&self) -> Duration {
        self.joined.elapsed()
    }

    /// Folds one meal into the totals
    pub fn record_meal(&mut self, meal: &Meal) {
        self.cubes_eaten += 1;
        if meal.kind == CubeKind::Player {
            self.players_eaten.push(meal.eaten_name.clone());
        }
    }

    pub fn observe_mass(&mut self, mass: f64) {
        self.max_mass = self.max_mass.max(mass);
    }
}

impl fmt::Display for PlayerStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "alive {:.1}s, max mass {:.1}, ate {} cubes",
            self.time_alive().as_secs_f64(),
            self.max_mass,
            self.cubes_eaten
        )?;
        if !self.players_eaten.is_empty() {
            write!(f, ", players eaten: {}", self.players_eaten.join(", "))?;
        }
        Ok(())
    }
}

/// A joined client and the player it controls
#[derive(Debug)]
pub struct Client {
    /// Connection the client talks over
    pub id: ConnectionId,
    /// Player uid; stays stable across splits and founder handover.
    /// None once every cell of the player has been eaten.
    pub uid: Option<Uid>,
    pub name: String,
    /// Sending side of the connection
    pub writer: WriteHandle,
    pub stats: PlayerStats,
}

impl Client {
    pub fn new(id: ConnectionId, uid: Uid, name: String, writer: WriteHandle, start_mass: f64) -> Self {
        Self {
            id,
            uid: Some(uid),
            name,
            writer,
            stats: PlayerStats::new(start_mass),
        }
    }
}

/// Every joined client, indexed by connection
///
/// The manager owns the write handles used for broadcasting and keeps the
/// statistics that are logged when a client leaves.
#[derive(Debug, Default)]
pub struct ClientManager {
    clients: HashMap<ConnectionId, Client>,
}

impl ClientManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a client that finished the join handshake
    ///
    /// A second registration for the same connection replaces the first.
    pub fn add_client(&mut self, client: Client) {
        if let Some(uid) = client.uid {
            info!("Player '{}' joined as uid {} from {}", client.name, uid, client.writer.peer());
        }
        self.clients.insert(client.id, client);
    }

    /// Removes a client, returning it so its player can be cleaned up
    ///
    /// Logs the final statistics. Returns None if it was already gone.
    pub fn remove_client(&mut self, id: ConnectionId) -> Option<Client> {
        let client = self.clients.remove(&id)?;
        info!("Player '{}' left from {}", client.name, client.writer.peer());
        info!("Stats for '{}': {}", client.name, client.stats);
        Some(client)
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Client> {
        self.clients.get(&id)
    }

    /// Player uid controlled by a connection
    pub fn uid_of(&self, id: ConnectionId) -> Option<Uid> {
        self.clients.get(&id).and_then(|client| client.uid)
    }

    /// Detaches every client whose player no longer has a live cell
    ///
    /// The connection stays registered and keeps receiving ticks, but its
    /// commands no longer reach the world. Must run before the freed uids
    /// can be handed to a new player. Returns the number of players released.
    pub fn release_eaten<F>(&mut self, is_alive: F) -> usize
    where
        F: Fn(Uid) -> bool,
    {
        let mut released = 0;
        for client in self.clients.values_mut() {
            let Some(uid) = client.uid else {
                continue;
            };
            if !is_alive(uid) {
                info!("Player '{}' (uid {}) was eaten", client.name, uid);
                info!("Stats for '{}': {}", client.name, client.stats);
                client.uid = None;
                released += 1;
            }
        }
        released
    }

    /// Credits a meal to whichever client owns the eating player
    pub fn record_meal(&mut self, meal: &Meal) {
        if let Some(client) = self.clients.values_mut().find(|client| client.uid == Some(meal.owner)) {
            client.stats.record_meal(meal);
        }
    }

    /// Updates the peak mass of the client controlling `uid`
    pub fn observe_mass(&mut self, uid: Uid, mass: f64) {
        if let Some(client) = self.clients.values_mut().find(|client| client.uid == Some(uid)) {
            client.stats.observe_mass(mass);
        }
    }

    pub fn players(&self) -> impl Iterator<Item = Uid> + '_ {
        self.clients.values().filter_map(|client| client.uid)
    }

    /// Sends `payload` to every client and drops the ones that are gone
    ///
    /// Returns the removed clients so their players can be taken out of the
    /// world.
    pub fn broadcast(&mut self, payload: &str) -> Vec<Client> {
        let dead: Vec<ConnectionId> = self
            .clients
            .values()
            .filter(|client| !client.writer.write(payload))
            .map(|client| client.id)
            .collect();

        dead.into_iter()
            .filter_map(|id| {
                debug!("Pruning dead connection {}", id);
                self.remove_client(id)
            })
            .collect()
    }

    /// Tears every connection down and empties the registry
    pub fn disconnect_all(&mut self) -> usize {
        let ids: Vec<ConnectionId> = self.clients.keys().copied().collect();
        for id in &ids {
            if let Some(client) = self.remove_client(*id) {
                client.writer.teardown();
            }
        }
        ids.len()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
