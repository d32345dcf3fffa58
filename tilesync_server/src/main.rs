//! Standalone server binary.
//!
//! Usage:
//!   cargo run -p tilesync_server -- [--config server.json] [--addr 127.0.0.1:2567]
//!       [--save-dir data] [--world game_world] [--autosave-secs 60] [--max-clients 4]
//!
//! The server loads (or generates) the world, accepts client connections,
//! runs the fixed timestep simulation and broadcasts changes to clients.
//!
//! Console commands:
//!   status         - Show server status
//!   save           - Save the world now
//!   quit           - Save and shut down

use std::env;
use std::io::{BufRead, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tilesync_server::{
    persistence::JsonFileStore,
    server::{GameServer, RoomCommand},
};
use tilesync_shared::config::EngineConfig;
use tokio::sync::oneshot;
use tracing::{info, warn};

fn parse_args() -> anyhow::Result<EngineConfig> {
    let args: Vec<String> = env::args().collect();

    let mut cfg = match args.iter().position(|a| a == "--config") {
        Some(i) if i + 1 < args.len() => EngineConfig::load(Path::new(&args[i + 1]))?,
        _ => EngineConfig::default(),
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" if i + 1 < args.len() => i += 2,
            "--addr" if i + 1 < args.len() => {
                cfg.server_addr = args[i + 1].clone();
                i += 2;
            }
            "--save-dir" if i + 1 < args.len() => {
                cfg.save_dir = args[i + 1].clone();
                i += 2;
            }
            "--world" if i + 1 < args.len() => {
                cfg.world_name = args[i + 1].clone();
                i += 2;
            }
            "--autosave-secs" if i + 1 < args.len() => {
                cfg.autosave_secs = args[i + 1].parse().unwrap_or(cfg.autosave_secs);
                i += 2;
            }
            "--max-clients" if i + 1 < args.len() => {
                cfg.max_clients = args[i + 1].parse().unwrap_or(cfg.max_clients);
                i += 2;
            }
            _ => i += 1,
        }
    }
    Ok(cfg)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args().context("parse arguments")?;
    let store = Arc::new(JsonFileStore::new(cfg.world_path()));
    info!(
        addr = %cfg.server_addr,
        world = %cfg.world_path().display(),
        max_clients = cfg.max_clients,
        "Starting server"
    );

    let server = GameServer::new(cfg, store)
        .await
        .context("create server")?;
    let local = server.local_addr()?;
    info!(%local, "Server listening");

    // Stdin reader thread feeding the room loop.
    let commands = server.commands();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut stdout = std::io::stdout();
        loop {
            print!("] ");
            let _ = stdout.flush();
            let mut line = String::new();
            match stdin.lock().read_line(&mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            let line = line.trim().to_string();
            if line.is_empty() {
                continue;
            }
            let (reply, rx) = oneshot::channel();
            if commands
                .blocking_send(RoomCommand::Console { line, reply })
                .is_err()
            {
                break;
            }
            match rx.blocking_recv() {
                Ok(out) => out.iter().for_each(|l| println!("{l}")),
                Err(_) => break,
            }
        }
    });

    println!("Server ready. Type 'status' for info, 'save' to save, 'quit' to exit.");
    println!();

    server
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        })
        .await
}
