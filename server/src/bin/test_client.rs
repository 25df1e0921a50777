use clap::Parser;
use server::transport::{self, ReadEvent};
use shared::{drain_records, ClientCommand, CubeRecord, DEFAULT_GAME_PORT};
use std::time::Duration;
use tokio::time::sleep;

/// Headless bot that joins a running server and wanders around
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server address
    #[clap(short, long, default_value_t = format!("127.0.0.1:{}", DEFAULT_GAME_PORT))]
    server: String,
    /// Display name to join with
    #[clap(short, long, default_value = "bot")]
    name: String,
    /// Number of move commands to send
    #[clap(short, long, default_value = "10")]
    rounds: u32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    println!("Connecting to {}", args.server);
    let mut connection = transport::connect(&args.server).await?;
    connection.write(format!("{}\n", args.name));

    // First record is our own cube
    let me = loop {
        if connection.request_more().await == ReadEvent::Closed {
            println!("Server closed the connection during join");
            return Ok(());
        }
        let records = drain_records(connection.buffer_mut());
        if let Some(first) = records.first() {
            let cube = CubeRecord::from_line(first)?;
            println!("Joined as uid {} at ({:.1}, {:.1}) with mass {}", cube.uid, cube.x, cube.y, cube.mass);
            println!("Initial snapshot holds {} records", records.len());
            break cube;
        }
    };

    for i in 0..args.rounds {
        // Walk in a circle around the spawn point
        let angle = i as f64 / 5.0;
        let command = if i == args.rounds / 2 {
            ClientCommand::Split {
                x: me.x + 100.0 * angle.sin(),
                y: me.y + 100.0 * angle.cos(),
            }
        } else {
            ClientCommand::Move {
                x: me.x + 100.0 * angle.sin(),
                y: me.y + 100.0 * angle.cos(),
            }
        };
        println!("Sending {:?}", command);
        if !connection.write(command.to_line()) {
            println!("Connection lost");
            break;
        }

        if connection.request_more().await == ReadEvent::Closed {
            println!("Server closed the connection");
            break;
        }
        let records = drain_records(connection.buffer_mut());
        let mine: Vec<CubeRecord> = records
            .iter()
            .filter_map(|line| CubeRecord::from_line(line).ok())
            .filter(|cube| !cube.is_food && cube.name == me.name)
            .collect();
        println!("Received {} records, {} of them our cells", records.len(), mine.len());
        for cube in mine {
            println!("  Cell {}: pos=({:.1}, {:.1}) mass={:.1}", cube.uid, cube.x, cube.y, cube.mass);
        }

        sleep(Duration::from_millis(500)).await;
    }

    connection.teardown();
    println!("Test client finished");
    Ok(())
}
