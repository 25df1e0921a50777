//! # Cubio Game Server Library
//!
//! This library provides the authoritative server for an "absorb or be
//! absorbed" arena game. Players steer square cells across a bounded world,
//! eat food and smaller players to grow, split to chase prey, and break apart
//! when they run into a virus. The server owns the one true world and
//! streams it to every connected client.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Simulation
//! All game rules run here. Clients only send where they want to go and
//! when they want to split; positions, masses and collisions are decided by
//! the server and broadcast every tick.
//!
//! ### Client Management
//! Handles the lifecycle of client connections:
//! - Join handshake and player creation
//! - Steady-state move and split commands
//! - Disconnect detection and cleanup of every cell a player owned
//! - Per-player statistics logged on departure
//!
//! ### State Broadcasting
//! Every tick sends the cubes destroyed and spawned since the previous tick
//! followed by every live player cell, as newline-delimited JSON records.
//!
//! ## Architecture Design
//!
//! ### Single Owner Event Loop
//! One task owns the world, the pending intents and the client registry.
//! Connection sessions hand it commands over a channel, so ticks and
//! command handling never interleave and no locks are needed.
//!
//! ### TCP Streams
//! Each connection has a read loop driven by its session and a write queue
//! drained by its own writer task. A failed write or a closed peer tears
//! the connection down and the registry prunes it on the next broadcast.
//!
//! ## Module Organization
//!
//! ### World Module (`world`)
//! The simulation: movement, attrition, absorption, split groups, virus
//! splits, food spawning and uid allocation.
//!
//! ### Transport Module (`transport`)
//! Connect, accept, buffered reads and queued writes over TCP.
//!
//! ### Network Module (`network`)
//! The server loop: join handshake, command parsing, tick and broadcast.
//!
//! ### Client Manager Module (`client_manager`)
//! Registry of joined clients with their write handles and statistics.
//!
//! ### Supporting Modules
//! `entity` (cubes and uids), `physics` (vectors, bounds, speed curve),
//! `config` (tunable world parameters), `error` and `utils`.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::WorldParams;
//! use server::network::Server;
//! use server::world::World;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let world = World::new(WorldParams::default());
//!     let mut server = Server::new("127.0.0.1:11000", world).await?;
//!
//!     // Accepts players and ticks the world until shut down
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod client_manager;
pub mod config;
pub mod entity;
pub mod error;
pub mod network;
pub mod physics;
pub mod transport;
pub mod utils;
pub mod world;
