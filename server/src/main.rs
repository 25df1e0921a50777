use clap::Parser;
use log::{error, info};
use server::config::WorldParams;
use server::error::ServerError;
use server::network::{Server, ServerMessage};
use server::world::World;
use shared::DEFAULT_GAME_PORT;
use std::path::PathBuf;

/// Command line arguments
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server IP address to bind to
    #[clap(short = 'H', long, default_value = "0.0.0.0")]
    host: String,
    /// Server port to listen on
    #[clap(short, long, default_value_t = DEFAULT_GAME_PORT)]
    port: u16,
    /// JSON file with world parameters
    #[clap(long)]
    params: Option<PathBuf>,
    /// Seed for a reproducible world
    #[clap(long)]
    seed: Option<u64>,
    /// Ticks per second, overrides the parameter file
    #[clap(long)]
    heartbeats: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<(), ServerError> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let mut params = match &args.params {
        Some(path) => WorldParams::from_json_file(path)?,
        None => WorldParams::default(),
    };
    if let Some(heartbeats) = args.heartbeats {
        params.heartbeats_per_second = heartbeats;
        params.validate()?;
    }

    let world = match args.seed {
        Some(seed) => World::with_seed(params, seed),
        None => World::new(params),
    };
    info!(
        "World ready: {}x{}, {} food",
        world.params().width,
        world.params().height,
        world.food_count()
    );

    let address = format!("{}:{}", args.host, args.port);
    let mut server = Server::new(&address, world).await?;
    let shutdown = server.sender();

    let mut server_handle = tokio::spawn(async move { server.run().await });

    let result = tokio::select! {
        result = &mut server_handle => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
            if shutdown.send(ServerMessage::Shutdown).is_err() {
                error!("Server loop already stopped");
            }
            // Let the loop disconnect every client before the runtime goes away
            server_handle.await
        }
    };

    match result {
        Ok(result) => result?,
        Err(e) => error!("Server task panicked: {}", e),
    }
    Ok(())
}
