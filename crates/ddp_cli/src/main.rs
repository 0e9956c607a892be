//! DDP CLI
//!
//! Command-line client for DDP servers.
//!
//! # Commands
//!
//! - `call` - Call a method and print its result
//! - `subscribe` - Subscribe and print the published documents
//! - `login` - Log in and store the resume token
//! - `logout` - Log out and forget the stored token

mod commands;
mod error;
mod ws;

use clap::{Parser, Subcommand};
use ddp_client::{ClientConfig, ClientHandle, ConnectionStatus, DdpClient, FileCredentialStore};
use error::{CliError, CliResult};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use ws::WsTransport;

/// DDP command-line client.
#[derive(Parser)]
#[command(name = "ddp")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// WebSocket URL of the server
    #[arg(global = true, short, long, default_value = "ws://localhost:3000/websocket")]
    url: String,

    /// File holding the resume token between runs
    #[arg(global = true, short, long)]
    account_file: Option<PathBuf>,

    /// Seconds to wait for a session
    #[arg(global = true, long, default_value = "10")]
    timeout: u64,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Call a method and print its result
    Call {
        /// Method name
        method: String,

        /// Parameters, each a JSON value
        params: Vec<String>,

        /// Run the method as a barrier
        #[arg(short, long)]
        barrier: bool,
    },

    /// Subscribe and print the published documents
    Subscribe {
        /// Publication name
        name: String,

        /// Parameters, each a JSON value
        params: Vec<String>,

        /// Keep printing changes until interrupted
        #[arg(short, long)]
        watch: bool,
    },

    /// Log in with a login method
    Login {
        /// Login method name
        #[arg(short, long, default_value = "login")]
        method: String,

        /// Parameters, each a JSON value
        params: Vec<String>,
    },

    /// Log out
    Logout,

    /// Show version information
    Version,
}

async fn start(cli: &Cli) -> CliResult<ClientHandle> {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let transport = WsTransport::new(cli.url.clone(), events_tx);
    let mut client = DdpClient::new(ClientConfig::new(cli.url.clone()), transport);
    if let Some(path) = &cli.account_file {
        client = client.with_credential_store(FileCredentialStore::new(path));
    }
    let (handle, _task) = ddp_client::spawn(client, events_rx);

    handle.connect()?;
    let timeout = Duration::from_secs(cli.timeout);
    tokio::time::timeout(timeout, handle.wait_for_status(ConnectionStatus::Connected))
        .await
        .map_err(|_| CliError::ConnectTimeout(timeout))??;
    info!(url = %cli.url, "connected");
    Ok(handle)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Commands::Version = cli.command {
        println!("DDP CLI v{}", env!("CARGO_PKG_VERSION"));
        println!("DDP Core v{}", ddp_core::VERSION);
        return Ok(());
    }

    let client = start(&cli).await?;
    let outcome = match &cli.command {
        Commands::Call {
            method,
            params,
            barrier,
        } => {
            let params = commands::parse_params(params)?;
            commands::call::run(&client, method, params, *barrier).await
        }
        Commands::Subscribe {
            name,
            params,
            watch,
        } => {
            let params = commands::parse_params(params)?;
            commands::subscribe::run(&client, name, params, *watch).await
        }
        Commands::Login { method, params } => {
            let params = commands::parse_params(params)?;
            commands::session::login(&client, method, params).await
        }
        Commands::Logout => commands::session::logout(&client).await,
        Commands::Version => Ok(()),
    };

    let _ = client.shutdown();
    outcome?;
    Ok(())
}
