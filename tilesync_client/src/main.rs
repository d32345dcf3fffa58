//! Standalone client binary.
//!
//! Usage:
//!   cargo run -p tilesync_client -- [--config client.json] [--addr 127.0.0.1:2567]
//!       [--side-steps 90] [--seconds 0]
//!
//! The client connects to the server, walks a square with scripted input and
//! logs its predicted position. `--seconds 0` walks until ctrl-c.
//!
//! Console commands:
//!   status              - Show client status
//!   place <x> <y> <t>   - Place block type 1 (wood) or 2 (stone)
//!   break <x> <y>       - Break a block
//!   quit                - Exit client

use std::env;
use std::io::{BufRead, Write};
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use tilesync_client::client::GameClient;
use tilesync_client::input::ScriptedInput;
use tilesync_shared::config::{self, EngineConfig};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::info;

struct Args {
    cfg: EngineConfig,
    side_steps: u32,
    seconds: u64,
}

fn parse_args() -> anyhow::Result<Args> {
    let args: Vec<String> = env::args().collect();

    let cfg = match args.iter().position(|a| a == "--config") {
        Some(i) if i + 1 < args.len() => EngineConfig::load(Path::new(&args[i + 1]))?,
        _ => EngineConfig::default(),
    };
    let mut out = Args {
        cfg,
        side_steps: 90,
        seconds: 0,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" if i + 1 < args.len() => i += 2,
            "--addr" if i + 1 < args.len() => {
                out.cfg.server_addr = args[i + 1].clone();
                i += 2;
            }
            "--side-steps" if i + 1 < args.len() => {
                out.side_steps = args[i + 1].parse().unwrap_or(out.side_steps);
                i += 2;
            }
            "--seconds" if i + 1 < args.len() => {
                out.seconds = args[i + 1].parse().unwrap_or(0);
                i += 2;
            }
            _ => i += 1,
        }
    }
    Ok(out)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = parse_args().context("parse arguments")?;
    info!(server = %args.cfg.server_addr, "Starting client");

    let mut client = GameClient::connect(&args.cfg).await.context("connect")?;

    // Set up console input channel.
    let (console_tx, mut console_rx) = mpsc::channel::<String>(32);

    // Spawn stdin reader thread.
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
            if !line.is_empty() && console_tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    println!("Client connected. Type 'status' for info, 'quit' to exit.");
    println!();

    let deadline = (args.seconds > 0).then(|| Instant::now() + Duration::from_secs(args.seconds));
    let mut script = ScriptedInput::square(args.side_steps);
    let mut frame = tokio::time::interval(config::fixed_time_step());
    frame.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last = Instant::now();
    let mut frames: u64 = 0;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            Some(line) = console_rx.recv() => {
                if matches!(line.as_str(), "quit" | "exit") {
                    break;
                }
                match client.exec_console(&line) {
                    Ok(output) => output.iter().for_each(|l| println!("{l}")),
                    Err(e) => println!("Error: {e:#}"),
                }
            }
            _ = frame.tick() => {
                let now = Instant::now();
                let input = script.next().unwrap_or_default();
                client.frame(now - last, input)?;
                last = now;

                frames += 1;
                if frames % 60 == 0 {
                    if let Some(p) = client.world().predicted_position() {
                        info!(
                            x = p.x,
                            y = p.y,
                            remotes = client.world().remotes().len(),
                            "Position"
                        );
                    }
                }
                if deadline.is_some_and(|d| now >= d) {
                    break;
                }
            }
        }
    }

    info!("Client exiting");
    Ok(())
}
