use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use taskboard::config::{BoardConfig, CliOverrides};
use taskboard::telemetry;

mod cmd;

#[derive(Parser)]
#[command(name = "taskboard")]
#[command(version, about = "Kanban board server with dense task ordering")]
pub struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to taskboard.toml (defaults to ./taskboard.toml when present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the REST + WebSocket server
    Serve {
        /// Port to serve on
        #[arg(short, long)]
        port: Option<u16>,

        /// Database path
        #[arg(long)]
        db_path: Option<PathBuf>,

        /// Enable dev mode (CORS permissive for a local frontend dev server)
        #[arg(long)]
        dev: bool,
    },
    /// Create the database without starting the server
    Init {
        /// Database path
        #[arg(long)]
        db_path: Option<PathBuf>,
    },
    /// Print the effective configuration
    Config,
}

impl Cli {
    fn overrides(&self) -> CliOverrides {
        let (port, db_path, dev_mode) = match &self.command {
            Commands::Serve { port, db_path, dev } => (*port, db_path.clone(), *dev),
            Commands::Init { db_path } => (None, db_path.clone(), false),
            Commands::Config => (None, None, false),
        };
        CliOverrides {
            port,
            db_path,
            dev_mode,
            verbose: self.verbose,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = BoardConfig::resolve(cli.config.as_deref(), &cli.overrides())?;

    match &cli.command {
        Commands::Serve { .. } => {
            let _guard = telemetry::init(&config.logging)?;
            cmd::cmd_serve(&config).await?;
        }
        Commands::Init { .. } => {
            let _guard = telemetry::init(&config.logging)?;
            cmd::cmd_init(&config)?;
        }
        Commands::Config => cmd::cmd_config(&config, cli.config.as_deref())?,
    }

    Ok(())
}
