//! Board server commands: `taskboard serve` and `taskboard init`.

use anyhow::Result;
use tracing::info;

use taskboard::board::server::{self, ServerConfig};
use taskboard::config::BoardConfig;

pub async fn cmd_serve(config: &BoardConfig) -> Result<()> {
    server::start_server(ServerConfig::from(config)).await
}

/// Create the database and its schema without starting the server.
pub fn cmd_init(config: &BoardConfig) -> Result<()> {
    let db_path = &config.server.db_path;
    server::open_database(db_path)?;
    info!(db = %db_path.display(), "database initialized");
    println!("Board database initialized at {}", db_path.display());
    Ok(())
}
