//! Client implementation.
//!
//! The client maintains:
//! - One TCP stream to the server, split into a reader task and a writer task
//! - A local mirror of the world, bootstrapped from the join snapshot
//! - Prediction and reconciliation for the local player
//! - Interpolated display positions for remote players
//!
//! Server messages arrive asynchronously and are buffered; `ClientWorld`
//! only applies them at the start of its next fixed step.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use tilesync_shared::{
    config::{EngineConfig, SimConstants},
    grid::BlockType,
    input::InputCommand,
    math::Vec2,
    net::{BreakBlock, Hello, NetMsg, PlaceBlock, ReliableConn, PROTOCOL_VERSION},
    sync::{SessionId, WorldSnapshot},
    tick::TickScheduler,
};
use tokio::{
    sync::mpsc::{self, error::TrySendError},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    input::{build_command, InputState},
    interp::RemotePlayers,
    mirror::{MirrorError, MirrorUpdate, WorldMirror},
    prediction::{Correction, ReconciliationEngine},
};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
/// Server messages buffered between the reader task and the next frame.
pub const INBOX_QUEUE: usize = 1024;
/// Requests buffered for the writer task.
pub const OUTBOUND_QUEUE: usize = 256;

/// Client-side game state, independent of any socket.
#[derive(Debug, Clone)]
pub struct ClientWorld {
    session_id: SessionId,
    mirror: WorldMirror,
    local: Option<ReconciliationEngine>,
    remotes: RemotePlayers,
    pending: Vec<NetMsg>,
}

impl ClientWorld {
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            mirror: WorldMirror::default(),
            local: None,
            remotes: RemotePlayers::default(),
            pending: Vec::new(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn mirror(&self) -> &WorldMirror {
        &self.mirror
    }

    pub fn remotes(&self) -> &RemotePlayers {
        &self.remotes
    }

    pub fn is_bootstrapped(&self) -> bool {
        self.mirror.is_bootstrapped()
    }

    /// Predicted position of the local player, once known.
    pub fn predicted_position(&self) -> Option<Vec2> {
        self.local.as_ref().map(|l| l.predicted())
    }

    pub fn authoritative_position(&self) -> Option<Vec2> {
        self.local.as_ref().map(|l| l.last_authoritative())
    }

    pub fn remote_position(&self, session_id: &str) -> Option<Vec2> {
        self.remotes.get(session_id).map(|r| r.display)
    }

    /// Buffers a server message for the next step.
    pub fn push(&mut self, msg: NetMsg) {
        self.pending.push(msg);
    }

    /// Applies a snapshot immediately, resetting local and remote players.
    pub fn bootstrap(&mut self, snap: &WorldSnapshot) -> Result<(), MirrorError> {
        self.mirror.apply_snapshot(snap)?;
        self.remotes.clear();
        self.local = None;
        for (id, pos) in self.mirror.players() {
            if *id == self.session_id {
                self.local = Some(ReconciliationEngine::new(*pos));
            } else {
                self.remotes.set_target(id, *pos);
            }
        }
        Ok(())
    }

    fn apply(&mut self, msg: NetMsg) {
        if let NetMsg::Snapshot(snap) = &msg {
            if let Err(e) = self.bootstrap(snap) {
                warn!(error = %e, "Rejected world snapshot");
            }
            return;
        }
        match self.mirror.apply_event(&msg) {
            Some(MirrorUpdate::PlayerUpserted {
                session_id,
                position,
            }) => {
                if session_id == self.session_id {
                    match self.local.as_mut() {
                        Some(local) => local.set_authoritative(position),
                        None => self.local = Some(ReconciliationEngine::new(position)),
                    }
                } else {
                    self.remotes.set_target(&session_id, position);
                }
            }
            Some(MirrorUpdate::PlayerRemoved { session_id }) => {
                self.remotes.remove(&session_id);
            }
            Some(MirrorUpdate::Cell(change)) => {
                debug!(x = change.x, y = change.y, block = ?change.block_type, "Cell changed");
            }
            None => {}
        }
    }

    /// One fixed client step: apply buffered messages, predict and
    /// reconcile the local player, then interpolate remote players.
    pub fn step(&mut self, cmd: InputCommand) -> Option<Correction> {
        for msg in std::mem::take(&mut self.pending) {
            self.apply(msg);
        }
        let Self {
            mirror,
            local,
            remotes,
            ..
        } = self;
        let correction = local.as_mut().map(|l| l.step(cmd, mirror.grid()));
        remotes.step();
        correction
    }
}

/// High-level game client.
pub struct GameClient {
    pub session_id: SessionId,
    world: ClientWorld,
    scheduler: TickScheduler,
    inbox: mpsc::Receiver<NetMsg>,
    outbound: mpsc::Sender<NetMsg>,
    connected: bool,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl GameClient {
    /// Connects to a server and performs the handshake.
    pub async fn connect(cfg: &EngineConfig) -> anyhow::Result<Self> {
        let server_addr: SocketAddr = cfg.server_addr.parse().context("parse server_addr")?;
        Self::connect_with(server_addr, SimConstants::CURRENT.fingerprint()).await
    }

    /// Connects announcing an explicit constants fingerprint.
    pub async fn connect_with(server_addr: SocketAddr, constants: u64) -> anyhow::Result<Self> {
        info!(server = %server_addr, "Connecting to server");
        let mut conn = ReliableConn::connect(server_addr).await?;
        conn.send(&NetMsg::Hello(Hello {
            protocol: PROTOCOL_VERSION,
            constants,
        }))
        .await?;

        let welcome = tokio::time::timeout(HANDSHAKE_TIMEOUT, conn.recv())
            .await
            .context("handshake timeout")??;
        let session_id = match welcome {
            NetMsg::Welcome(w) => w.session_id,
            NetMsg::Rejected(r) => anyhow::bail!("server rejected connection: {}", r.reason),
            other => anyhow::bail!("expected Welcome, got {:?}", other.tag()),
        };

        let mut world = ClientWorld::new(session_id.clone());
        match tokio::time::timeout(HANDSHAKE_TIMEOUT, conn.recv())
            .await
            .context("snapshot timeout")??
        {
            NetMsg::Snapshot(snap) => world.bootstrap(&snap).context("apply snapshot")?,
            other => anyhow::bail!("expected Snapshot, got {:?}", other.tag()),
        }
        info!(session_id = %session_id, "Connected to server");

        let (mut rd, mut wr) = conn.into_split();
        let (inbox_tx, inbox) = mpsc::channel(INBOX_QUEUE);
        let (outbound, mut out_rx) = mpsc::channel::<NetMsg>(OUTBOUND_QUEUE);

        let reader = tokio::spawn(async move {
            loop {
                match rd.recv().await {
                    Ok(msg) => {
                        if inbox_tx.send(msg).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        debug!(error = %format!("{e:#}"), "Server stream closed");
                        break;
                    }
                }
            }
        });
        let writer = tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                if let Err(e) = wr.send(&msg).await {
                    debug!(error = %format!("{e:#}"), "Write failed");
                    break;
                }
            }
        });

        Ok(Self {
            session_id,
            world,
            scheduler: TickScheduler::default(),
            inbox,
            outbound,
            connected: true,
            reader,
            writer,
        })
    }

    pub fn world(&self) -> &ClientWorld {
        &self.world
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Moves everything the reader task has received into the world buffer.
    fn drain_inbox(&mut self) {
        loop {
            match self.inbox.try_recv() {
                Ok(msg) => self.world.push(msg),
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    if self.connected {
                        info!(session_id = %self.session_id, "Disconnected from server");
                    }
                    self.connected = false;
                    break;
                }
            }
        }
    }

    /// Advances by `delta` of wall-clock time. Each whole step sends the
    /// sampled command (if any direction is held) and steps the world.
    pub fn frame(&mut self, delta: Duration, input: InputState) -> anyhow::Result<u32> {
        self.drain_inbox();
        if !self.connected {
            anyhow::bail!("connection to server closed");
        }

        let cmd = build_command(input);
        let Self {
            world,
            scheduler,
            outbound,
            ..
        } = self;
        let mut send_result = Ok(());
        let steps = scheduler.advance(delta, || {
            if cmd != InputCommand::IDLE && send_result.is_ok() {
                send_result = queue_send(outbound, NetMsg::Input(cmd));
            }
            world.step(cmd);
        });
        send_result?;
        Ok(steps)
    }

    pub fn place_block(&self, x: i32, y: i32, block_type: BlockType) -> anyhow::Result<()> {
        queue_send(
            &self.outbound,
            NetMsg::PlaceBlock(PlaceBlock {
                x,
                y,
                block_type: block_type as i32,
            }),
        )
    }

    pub fn break_block(&self, x: i32, y: i32) -> anyhow::Result<()> {
        queue_send(&self.outbound, NetMsg::BreakBlock(BreakBlock { x, y }))
    }

    /// Executes a console command.
    pub fn exec_console(&mut self, line: &str) -> anyhow::Result<Vec<String>> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let coords = |t: &[&str]| -> Option<(i32, i32)> {
            Some((t.get(1)?.parse().ok()?, t.get(2)?.parse().ok()?))
        };
        match tokens.first().copied() {
            None => Ok(Vec::new()),
            Some("status") => {
                let mut out = vec![format!("Session: {}", self.session_id)];
                if let Some(p) = self.world.predicted_position() {
                    out.push(format!("Position: ({:.1}, {:.1})", p.x, p.y));
                }
                out.push(format!("Remote players: {}", self.world.remotes().len()));
                Ok(out)
            }
            Some("place") => {
                let block = tokens
                    .get(3)
                    .and_then(|t| t.parse::<i32>().ok())
                    .and_then(|raw| BlockType::from_i32(raw).ok());
                match (coords(&tokens), block) {
                    (Some((x, y)), Some(block)) => {
                        self.place_block(x, y, block)?;
                        Ok(vec![format!("Requested {block:?} at ({x}, {y})")])
                    }
                    _ => Ok(vec!["Usage: place <x> <y> <1|2>".to_string()]),
                }
            }
            Some("break") => match coords(&tokens) {
                Some((x, y)) => {
                    self.break_block(x, y)?;
                    Ok(vec![format!("Requested break at ({x}, {y})")])
                }
                None => Ok(vec!["Usage: break <x> <y>".to_string()]),
            },
            Some(other) => Ok(vec![format!("Unknown command: {other}")]),
        }
    }
}

impl Drop for GameClient {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

/// Queues a request for the writer task without waiting for room.
fn queue_send(outbound: &mpsc::Sender<NetMsg>, msg: NetMsg) -> anyhow::Result<()> {
    outbound.try_send(msg).map_err(|e| match e {
        TrySendError::Full(_) => anyhow::anyhow!("send queue full"),
        TrySendError::Closed(_) => anyhow::anyhow!("writer task stopped"),
    })
}
