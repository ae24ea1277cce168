//! ringkv - A Redis-Compatible Key-Value Server
//!
//! This is the main entry point for the ringkv server.
//! It loads configuration, opens the database (replaying the AOF if enabled),
//! and serves clients until a shutdown signal arrives.

use clap::Parser;
use ringkv::config::{Cli, ServerConfig};
use ringkv::connection::RespHandler;
use ringkv::database::build_database;
use ringkv::server::{listen_and_serve, shutdown_signal};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn print_banner(config: &ServerConfig) {
    let mode = if config.is_cluster() {
        format!("cluster node {} ({} peers)", config.self_addr, config.peers.len())
    } else {
        "standalone".to_string()
    };
    let persistence = if config.appendonly {
        config.appendfilename.display().to_string()
    } else {
        "off".to_string()
    };

    println!(
        r#"
        _                 _
   _ __(_)_ __   __ _| | ____   __
  | '__| | '_ \ / _` | |/ /\ \ / /
  | |  | | | | | (_| |   <  \ V /
  |_|  |_|_| |_|\__, |_|\_\  \_/
                |___/

ringkv v{} - Redis-Compatible Key-Value Server
──────────────────────────────────────────────────────────────
Listening on {}
Mode: {}
Append-only file: {}

Use Ctrl+C to shutdown gracefully.
"#,
        ringkv::VERSION,
        config.bind_address(),
        mode,
        persistence
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = ServerConfig::load(&cli)?;

    // Set up logging; RUST_LOG overrides the default level
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    print_banner(&config);

    let listener = TcpListener::bind(config.bind_address()).await?;
    info!("Listening on {}", config.bind_address());

    let database = build_database(&config).await?;
    let handler = Arc::new(RespHandler::new(database));

    listen_and_serve(listener, handler, shutdown_signal()).await;

    Ok(())
}
