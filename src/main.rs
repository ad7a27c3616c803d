//! Maze Race Session Server
//!
//! Hosts one timed two-player race: waits for both clients, relays their
//! progress to each other, and referees the outcome.

use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use maze_race::{RaceServer, ServerConfig, DEFAULT_PORT, RACE_DURATION_SECS, VERSION};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");

    info!("Maze Race Server v{}", VERSION);
    info!("Port: {}", DEFAULT_PORT);
    info!("Race duration: {} seconds", RACE_DURATION_SECS);

    let server = RaceServer::new(ServerConfig::default());
    server.run().await?;

    info!("race complete, shutting down");
    Ok(())
}
