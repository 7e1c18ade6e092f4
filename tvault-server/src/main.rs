//! TensorVault Server - content-addressed blob store for large binary files
//!
//! Serves deduplicating uploads, framed downloads and branch metadata over
//! HTTP/1.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tvault_server::{ServerConfig, VaultHandler, serve};

#[derive(Parser, Debug)]
#[command(name = "tv-server")]
#[command(author = "TensorVault Contributors")]
#[command(version = "0.1.0")]
#[command(about = "TensorVault content store server", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the server
    Start {
        /// Listen address (e.g., 0.0.0.0:8080)
        #[arg(short, long, default_value = "0.0.0.0:8080")]
        addr: String,

        /// Store root directory
        #[arg(short, long, default_value = "./data/vault")]
        data_dir: PathBuf,

        /// Keep everything in memory instead of under --data-dir
        #[arg(long)]
        in_memory: bool,

        /// Maximum request body size in MiB
        #[arg(long, default_value_t = 512)]
        max_body_mb: usize,

        /// Enable debug logging
        #[arg(long)]
        debug: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start {
            addr,
            data_dir,
            in_memory,
            max_body_mb,
            debug,
        } => {
            let env_filter = if debug {
                tracing_subscriber::EnvFilter::new("debug")
            } else {
                tracing_subscriber::EnvFilter::from_default_env()
                    .add_directive(tracing::Level::INFO.into())
            };

            tracing_subscriber::registry()
                .with(tracing_subscriber::fmt::layer())
                .with(env_filter)
                .init();

            let config = ServerConfig {
                addr,
                data_dir: (!in_memory).then_some(data_dir),
                max_body_size: max_body_mb * 1024 * 1024,
                ..Default::default()
            };

            info!("Starting TensorVault server on {}", config.addr);
            match &config.data_dir {
                Some(dir) => info!("Store root: {}", dir.display()),
                None => info!("Store: in-memory"),
            }

            let addr = config.socket_addr()?;
            let handler = Arc::new(VaultHandler::open(config).context("failed to open store")?);
            info!("Store holds {} objects", handler.store().len());

            let listener = TcpListener::bind(addr)
                .await
                .with_context(|| format!("failed to bind {}", addr))?;
            info!("Server listening on {}", addr);

            serve(listener, handler).await?;
        }
    }

    Ok(())
}
