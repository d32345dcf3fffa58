//! Helpers shared by the socket-level tests.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use tilesync_client::{input::InputState, ClientWorld, GameClient};
use tilesync_server::{
    persistence::{SavedWorld, WorldStore},
    server::bind_ephemeral,
    GameServer,
};
use tilesync_shared::{
    config::{self, EngineConfig, WORLD_HEIGHT, WORLD_WIDTH},
    grid::{BlockType, WorldGrid},
    math::Vec2,
};
use tokio::{sync::oneshot, task::JoinHandle};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init();
}

/// All-grass world with the given cells set. Panics on a cell outside the
/// world.
pub fn world_with(blocks: &[(i32, i32, BlockType)]) -> SavedWorld {
    let mut grid = WorldGrid::new(WORLD_WIDTH, WORLD_HEIGHT);
    for &(x, y, block_type) in blocks {
        if let Err(e) = grid.set(x, y, block_type) {
            panic!("world_with: cell ({x}, {y}): {e}");
        }
    }
    SavedWorld::capture(&grid)
}

/// A server running in the background until `stop` is called.
pub struct RunningServer {
    pub addr: SocketAddr,
    pub cfg: EngineConfig,
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<anyhow::Result<()>>,
}

impl RunningServer {
    pub async fn start(store: Arc<dyn WorldStore>) -> anyhow::Result<Self> {
        let (server, cfg) = bind_ephemeral(store).await?;
        Self::spawn(server, cfg)
    }

    pub async fn start_with(cfg: EngineConfig, store: Arc<dyn WorldStore>) -> anyhow::Result<Self> {
        let server = GameServer::new(cfg, store).await?;
        let mut cfg = server.cfg.clone();
        cfg.server_addr = server.local_addr()?.to_string();
        Self::spawn(server, cfg)
    }

    fn spawn(server: GameServer, cfg: EngineConfig) -> anyhow::Result<Self> {
        let addr = server.local_addr()?;
        let (tx, rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(server.run(async move {
            let _ = rx.await;
        }));
        Ok(Self {
            addr,
            cfg,
            shutdown: Some(tx),
            handle,
        })
    }

    pub async fn connect(&self) -> anyhow::Result<GameClient> {
        GameClient::connect(&self.cfg).await
    }

    /// Signals shutdown and waits for the final save.
    pub async fn stop(mut self) -> anyhow::Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        self.handle.await?
    }
}

/// Runs idle client frames until `done` holds or `timeout` passes.
pub async fn pump_until(
    client: &mut GameClient,
    timeout: Duration,
    done: impl Fn(&ClientWorld) -> bool,
) -> anyhow::Result<()> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        client.frame(config::fixed_time_step(), InputState::IDLE)?;
        if done(client.world()) {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            anyhow::bail!("condition not reached within {timeout:?}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Unit axis input pointing from `pos` toward the middle of the world.
pub fn toward_centre(pos: Vec2) -> InputState {
    let mid = WORLD_WIDTH as f32 * config::TILE_SIZE / 2.0;
    InputState::new(if pos.x < mid { 1.0 } else { -1.0 }, 0.0)
}
