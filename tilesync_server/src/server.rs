//! Server implementation.
//!
//! This is an authoritative, single-room server:
//! - One task (the room loop) owns the `Room`. It runs fixed steps from
//!   measured wall-clock time, applies queued client requests between steps,
//!   and owns the auto-save schedule, so the grid has exactly one writer.
//! - Each TCP connection gets a reader task that turns frames into
//!   `RoomCommand`s, and a writer task draining that client's FIFO outbound
//!   queue. Only the room loop feeds outbound queues, which is what keeps
//!   the snapshot ahead of every incremental event.
//!
//! Determinism notes:
//! - Keep simulation in a fixed timestep.
//! - Avoid wall-clock-dependent branching in gameplay code.
//! - Use stable ordering when iterating collections.

use std::{
    collections::HashMap,
    future::Future,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use anyhow::Context;
use rand::{distributions::Alphanumeric, rngs::StdRng, Rng, SeedableRng};
use tilesync_shared::{
    config::{self, EngineConfig, SimConstants, WORLD_HEIGHT, WORLD_WIDTH},
    net::{
        Hello, NetMsg, ReliableConn, ReliableListener, Rejected, Welcome, PROTOCOL_VERSION,
    },
    sync::SessionId,
};
use tokio::{
    sync::{
        mpsc::{self, error::TrySendError},
        oneshot,
    },
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use crate::{
    persistence::{self, LoadOutcome, WorldStore},
    room::Room,
};

/// How long a new connection may take to send its `Hello`.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

const SESSION_ID_LEN: usize = 9;

const COMMAND_QUEUE: usize = 1024;

/// Frames buffered per client; a client that falls this far behind is dropped.
pub const OUTBOUND_QUEUE: usize = 256;

/// Work sent into the room loop.
#[derive(Debug)]
pub enum RoomCommand {
    Join {
        session_id: SessionId,
        outbound: mpsc::Sender<NetMsg>,
    },
    Leave {
        session_id: SessionId,
    },
    Client {
        session_id: SessionId,
        msg: NetMsg,
    },
    /// Operator console line; output lines are sent back.
    Console {
        line: String,
        reply: oneshot::Sender<Vec<String>>,
    },
}

/// Game server.
pub struct GameServer {
    pub cfg: EngineConfig,
    listener: ReliableListener,
    room: Room,
    store: Arc<dyn WorldStore>,
    commands_tx: mpsc::Sender<RoomCommand>,
    commands_rx: mpsc::Receiver<RoomCommand>,
}

impl GameServer {
    /// Binds the listener and loads (or generates) the world.
    pub async fn new(cfg: EngineConfig, store: Arc<dyn WorldStore>) -> anyhow::Result<Self> {
        let (grid, outcome) = persistence::load_or_generate(
            store.as_ref(),
            WORLD_WIDTH,
            WORLD_HEIGHT,
            &mut StdRng::from_entropy(),
        )
        .await;
        if let LoadOutcome::Generated { reason } = &outcome {
            info!(%reason, "Started with a generated world");
        }
        let room = Room::new(grid, cfg.max_clients);
        Self::with_room(cfg, store, room).await
    }

    /// Binds the listener around an already-built room.
    pub async fn with_room(
        cfg: EngineConfig,
        store: Arc<dyn WorldStore>,
        room: Room,
    ) -> anyhow::Result<Self> {
        let addr: SocketAddr = cfg.server_addr.parse().context("parse server_addr")?;
        let listener = ReliableListener::bind(addr).await?;
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_QUEUE);

        Ok(Self {
            cfg,
            listener,
            room,
            store,
            commands_tx,
            commands_rx,
        })
    }

    /// Returns the local address (after binding).
    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Sender for injecting commands (console, tests).
    pub fn commands(&self) -> mpsc::Sender<RoomCommand> {
        self.commands_tx.clone()
    }

    /// Runs until `shutdown` resolves or the console asks to quit, then
    /// saves the world one last time.
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) -> anyhow::Result<()> {
        let listener = self.listener;
        let accept_tx = self.commands_tx.clone();
        let accept_task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((conn, peer)) => {
                        let tx = accept_tx.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(conn, tx).await {
                                debug!(%peer, error = %format!("{e:#}"), "Connection ended with error");
                            }
                        });
                    }
                    Err(e) => warn!(error = %format!("{e:#}"), "Accept failed"),
                }
            }
        });

        let mut room = RoomLoop::new(self.room, self.store);

        let step = config::fixed_time_step();
        let mut frame = time::interval(step);
        frame.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let period = self.cfg.autosave_interval();
        let mut autosave = time::interval_at(Instant::now() + period, period);
        info!(autosave_secs = period.as_secs(), "Auto-save enabled");

        let mut last = Instant::now();
        tokio::pin!(shutdown);

        while !room.quit {
            tokio::select! {
                _ = &mut shutdown => break,
                Some(cmd) = self.commands_rx.recv() => {
                    room.handle_command(cmd);
                    room.flush();
                }
                _ = frame.tick() => {
                    let now = Instant::now();
                    room.room.advance(now - last);
                    last = now;
                    room.flush();
                }
                _ = autosave.tick() => room.spawn_save(),
            }
        }

        accept_task.abort();
        info!(tick = room.room.tick(), "Server shutting down, saving world");
        room.final_save().await;
        Ok(())
    }
}

/// State owned by the running room loop.
struct RoomLoop {
    room: Room,
    store: Arc<dyn WorldStore>,
    outbound: HashMap<SessionId, mpsc::Sender<NetMsg>>,
    /// Most recent background save; each new save waits for it.
    saving: Option<JoinHandle<()>>,
    quit: bool,
}

impl RoomLoop {
    fn new(room: Room, store: Arc<dyn WorldStore>) -> Self {
        Self {
            room,
            store,
            outbound: HashMap::new(),
            saving: None,
            quit: false,
        }
    }

    /// Captures the world now and writes it in the background, after any
    /// save already in flight.
    fn spawn_save(&mut self) {
        let doc = self.room.save_document();
        let store = self.store.clone();
        let previous = self.saving.take();
        self.saving = Some(tokio::spawn(async move {
            if let Some(previous) = previous {
                let _ = previous.await;
            }
            persistence::save_document(store.as_ref(), &doc).await;
        }));
    }

    /// Waits for background saves, then writes the current world.
    async fn final_save(&mut self) -> bool {
        if let Some(previous) = self.saving.take() {
            let _ = previous.await;
        }
        persistence::save_world(self.store.as_ref(), self.room.grid()).await
    }

    /// Drops a client's queue and removes its player. Its writer task ends
    /// once the queue is gone, which closes the connection.
    fn disconnect(&mut self, session_id: &str, reason: &str) {
        if self.outbound.remove(session_id).is_some() {
            warn!(session_id, reason, "Disconnecting client");
        }
        self.room.leave(session_id);
    }

    fn handle_command(&mut self, cmd: RoomCommand) {
        match cmd {
            RoomCommand::Join {
                session_id,
                outbound,
            } => match self.room.join(session_id.clone()) {
                Ok(snapshot) => {
                    let welcome = NetMsg::Welcome(Welcome {
                        session_id: session_id.clone(),
                    });
                    if outbound.try_send(welcome).is_ok()
                        && outbound.try_send(NetMsg::Snapshot(snapshot)).is_ok()
                    {
                        self.outbound.insert(session_id, outbound);
                    } else {
                        self.room.leave(&session_id);
                    }
                }
                Err(e) => {
                    // Dropping `outbound` after this closes the connection.
                    info!(session_id = %session_id, reason = %e, "Join rejected");
                    let _ = outbound.try_send(NetMsg::Rejected(Rejected {
                        reason: e.to_string(),
                    }));
                }
            },
            RoomCommand::Leave { session_id } => {
                self.outbound.remove(&session_id);
                self.room.leave(&session_id);
            }
            RoomCommand::Client { session_id, msg } => self.on_client_msg(&session_id, msg),
            RoomCommand::Console { line, reply } => {
                let out = self.exec_console(&line);
                let _ = reply.send(out);
            }
        }
    }

    fn on_client_msg(&mut self, session_id: &str, msg: NetMsg) {
        if !self.outbound.contains_key(session_id) {
            debug!(session_id, tag = ?msg.tag(), "Ignoring message from session that never joined");
            return;
        }
        match msg {
            NetMsg::Input(cmd) => {
                self.room.queue_input(session_id, cmd);
            }
            NetMsg::PlaceBlock(req) => {
                if self.room.place_block(session_id, req.x, req.y, req.block_type) {
                    info!(session_id, x = req.x, y = req.y, "Block placed");
                }
            }
            NetMsg::BreakBlock(req) => {
                if self.room.break_block(session_id, req.x, req.y) {
                    info!(session_id, x = req.x, y = req.y, "Block broken");
                }
            }
            other => {
                warn!(session_id, tag = ?other.tag(), "Unexpected message from client");
            }
        }
    }

    /// Broadcasts every pending sync event to every joined client. Clients
    /// whose queue is full or closed are disconnected, and their departure
    /// goes out in the next round.
    fn flush(&mut self) {
        loop {
            let events = self.room.drain_events();
            if events.is_empty() {
                return;
            }
            let mut dropped: Vec<(SessionId, &'static str)> = Vec::new();
            for event in events {
                let msg = NetMsg::from(event);
                for (id, tx) in &self.outbound {
                    if dropped.iter().any(|(d, _)| d == id) {
                        continue;
                    }
                    match tx.try_send(msg.clone()) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => dropped.push((id.clone(), "send queue full")),
                        Err(TrySendError::Closed(_)) => dropped.push((id.clone(), "connection closed")),
                    }
                }
            }
            for (id, reason) in dropped {
                self.disconnect(&id, reason);
            }
        }
    }

    /// Executes a console command.
    fn exec_console(&mut self, line: &str) -> Vec<String> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        match tokens.first().copied() {
            None => Vec::new(),
            Some("status") => {
                let mut out = vec![
                    format!("Tick: {}", self.room.tick()),
                    format!("Players: {}", self.room.player_count()),
                ];
                for (id, pos) in &self.room.snapshot().players {
                    out.push(format!("  {id}: ({:.1}, {:.1})", pos.x, pos.y));
                }
                out
            }
            Some("save") => {
                self.spawn_save();
                vec![format!("Saving world to {}", self.store.describe())]
            }
            Some("quit") | Some("exit") => {
                self.quit = true;
                vec!["Shutting down".to_string()]
            }
            Some(other) => vec![format!("Unknown command: {other}")],
        }
    }
}

fn new_session_id() -> SessionId {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SESSION_ID_LEN)
        .map(char::from)
        .collect()
}

/// Handshake, then pump frames into the room until the socket closes.
async fn handle_connection(
    mut conn: ReliableConn,
    commands: mpsc::Sender<RoomCommand>,
) -> anyhow::Result<()> {
    let peer = conn.peer_addr()?;
    let hello = time::timeout(HANDSHAKE_TIMEOUT, conn.recv())
        .await
        .context("handshake timeout")??;

    match hello {
        NetMsg::Hello(Hello {
            protocol,
            constants,
        }) => {
            let expected = SimConstants::CURRENT.fingerprint();
            if protocol != PROTOCOL_VERSION || constants != expected {
                warn!(%peer, protocol, constants, expected, "Rejected mismatched client build");
                conn.send(&NetMsg::Rejected(Rejected {
                    reason: format!(
                        "build mismatch: protocol {protocol} (want {PROTOCOL_VERSION}), constants {constants:#x} (want {expected:#x})"
                    ),
                }))
                .await?;
                return Ok(());
            }
        }
        other => anyhow::bail!("expected Hello, got {:?}", other.tag()),
    }

    let session_id = new_session_id();
    let (out_tx, mut out_rx) = mpsc::channel::<NetMsg>(OUTBOUND_QUEUE);
    commands
        .send(RoomCommand::Join {
            session_id: session_id.clone(),
            outbound: out_tx,
        })
        .await
        .context("room closed")?;
    info!(%peer, session_id = %session_id, "Client connected");

    let (mut reader, mut writer) = conn.into_split();
    let writer_id = session_id.clone();
    // Ends when the room drops this client's queue (rejected, lagging or
    // left) or the socket stops accepting writes.
    let mut writer_task = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            if let Err(e) = writer.send(&msg).await {
                debug!(session_id = %writer_id, error = %format!("{e:#}"), "Write failed");
                break;
            }
        }
    });

    loop {
        tokio::select! {
            _ = &mut writer_task => {
                debug!(session_id = %session_id, "Outbound queue closed, dropping connection");
                break;
            }
            res = reader.recv() => match res {
                Ok(msg @ (NetMsg::Input(_) | NetMsg::PlaceBlock(_) | NetMsg::BreakBlock(_))) => {
                    let cmd = RoomCommand::Client {
                        session_id: session_id.clone(),
                        msg,
                    };
                    if commands.send(cmd).await.is_err() {
                        break;
                    }
                }
                Ok(other) => {
                    warn!(session_id = %session_id, tag = ?other.tag(), "Ignoring unexpected message");
                }
                Err(e) => {
                    debug!(session_id = %session_id, error = %format!("{e:#}"), "Client disconnected");
                    break;
                }
            }
        }
    }

    writer_task.abort();
    let _ = commands.send(RoomCommand::Leave { session_id }).await;
    Ok(())
}

/// Helper for tests: bind to an ephemeral port on localhost.
pub async fn bind_ephemeral(
    store: Arc<dyn WorldStore>,
) -> anyhow::Result<(GameServer, EngineConfig)> {
    let cfg = EngineConfig {
        server_addr: format!("{}:{}", IpAddr::V4(Ipv4Addr::LOCALHOST), 0),
        ..Default::default()
    };
    let server = GameServer::new(cfg, store).await?;
    let mut cfg = server.cfg.clone();
    cfg.server_addr = server.local_addr()?.to_string();
    Ok((server, cfg))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{MemoryStore, SavedWorld};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tilesync_shared::{
        grid::{BlockType, WorldGrid},
        math::Vec2,
        net::PlaceBlock,
        sync::CellChange,
    };

    fn room_loop_with(max_players: usize) -> RoomLoop {
        RoomLoop::new(
            Room::new(WorldGrid::new(10, 10), max_players),
            Arc::new(MemoryStore::new()),
        )
    }

    fn room_loop() -> RoomLoop {
        room_loop_with(4)
    }

    fn place(session_id: &str, x: i32, y: i32, block_type: i32) -> RoomCommand {
        RoomCommand::Client {
            session_id: session_id.into(),
            msg: NetMsg::PlaceBlock(PlaceBlock { x, y, block_type }),
        }
    }

    #[tokio::test]
    async fn join_sends_welcome_then_snapshot_then_events() {
        let mut rl = room_loop();
        let (tx, mut rx) = mpsc::channel(OUTBOUND_QUEUE);
        rl.handle_command(RoomCommand::Join {
            session_id: "s1".into(),
            outbound: tx,
        });
        rl.flush();

        assert!(matches!(rx.try_recv(), Ok(NetMsg::Welcome(w)) if w.session_id == "s1"));
        assert!(matches!(rx.try_recv(), Ok(NetMsg::Snapshot(s)) if s.players.contains_key("s1")));
        assert!(matches!(rx.try_recv(), Ok(NetMsg::PlayerJoined(_))));

        rl.handle_command(place("s1", 4, 4, 2));
        rl.flush();
        assert_eq!(
            rx.try_recv().ok(),
            Some(NetMsg::CellChanged(CellChange {
                x: 4,
                y: 4,
                block_type: BlockType::Stone
            }))
        );
    }

    #[tokio::test]
    async fn rejected_edit_broadcasts_nothing() {
        let mut rl = room_loop();
        let (tx, mut rx) = mpsc::channel(OUTBOUND_QUEUE);
        rl.room.join_at("s1".into(), Vec2::new(48.0, 48.0)).unwrap();
        rl.outbound.insert("s1".into(), tx);
        rl.flush();
        while rx.try_recv().is_ok() {}

        rl.handle_command(place("s1", 4, 4, 7));
        rl.flush();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn session_refused_at_capacity_cannot_edit() {
        let mut rl = room_loop_with(1);
        let (member_tx, mut member_rx) = mpsc::channel(OUTBOUND_QUEUE);
        rl.handle_command(RoomCommand::Join {
            session_id: "member".into(),
            outbound: member_tx,
        });
        rl.flush();
        while member_rx.try_recv().is_ok() {}

        let (refused_tx, mut refused_rx) = mpsc::channel(OUTBOUND_QUEUE);
        rl.handle_command(RoomCommand::Join {
            session_id: "refused".into(),
            outbound: refused_tx,
        });
        assert!(matches!(refused_rx.try_recv(), Ok(NetMsg::Rejected(_))));
        // The room kept no sender, so the connection's writer winds down.
        assert!(matches!(
            refused_rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));

        rl.handle_command(place("refused", 3, 3, 2));
        rl.handle_command(RoomCommand::Client {
            session_id: "refused".into(),
            msg: NetMsg::Input(tilesync_shared::input::InputCommand {
                right: true,
                ..Default::default()
            }),
        });
        rl.flush();

        assert_eq!(rl.room.grid().get(3, 3).unwrap().block_type, BlockType::Grass);
        assert!(member_rx.try_recv().is_err());
        assert_eq!(rl.room.player_count(), 1);
    }

    #[tokio::test]
    async fn lagging_client_is_disconnected() {
        let mut rl = room_loop();
        let (fast_tx, mut fast_rx) = mpsc::channel(OUTBOUND_QUEUE);
        let (slow_tx, mut slow_rx) = mpsc::channel(1);
        rl.room.join_at("fast".into(), Vec2::new(48.0, 48.0)).unwrap();
        rl.room.join_at("slow".into(), Vec2::new(80.0, 48.0)).unwrap();
        rl.outbound.insert("fast".into(), fast_tx);
        rl.outbound.insert("slow".into(), slow_tx);

        // Two join events overflow the single-slot queue.
        rl.flush();

        assert!(!rl.outbound.contains_key("slow"));
        assert_eq!(rl.room.player_position("slow"), None);
        assert!(slow_rx.try_recv().is_ok());
        assert!(matches!(
            slow_rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));

        let mut fast_msgs = Vec::new();
        while let Ok(msg) = fast_rx.try_recv() {
            fast_msgs.push(msg);
        }
        assert!(matches!(fast_msgs.last(), Some(NetMsg::PlayerLeft(p)) if p.session_id == "slow"));
    }

    /// Records saved documents in completion order; the first save is slow.
    #[derive(Default)]
    struct RecordingStore {
        saved: Mutex<Vec<SavedWorld>>,
        calls: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl WorldStore for RecordingStore {
        async fn load(&self) -> anyhow::Result<Option<SavedWorld>> {
            Ok(None)
        }

        async fn save(&self, world: &SavedWorld) -> anyhow::Result<()> {
            let call = self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if call == 0 {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            self.saved.lock().unwrap().push(world.clone());
            Ok(())
        }

        fn describe(&self) -> String {
            "recording".to_string()
        }
    }

    #[tokio::test]
    async fn saves_complete_in_capture_order() {
        let store = Arc::new(RecordingStore::default());
        let mut rl = RoomLoop::new(Room::new(WorldGrid::new(10, 10), 4), store.clone());
        rl.room.join_at("s1".into(), Vec2::new(48.0, 48.0)).unwrap();

        rl.spawn_save();
        assert!(rl.room.place_block("s1", 1, 1, 1));
        rl.exec_console("save");
        assert!(rl.room.place_block("s1", 2, 2, 2));
        assert!(rl.final_save().await);

        let saved = store.saved.lock().unwrap();
        assert_eq!(saved.len(), 3);
        let last = saved[2].restore(10, 10).unwrap();
        assert_eq!(last.get(1, 1).unwrap().block_type, BlockType::Wood);
        assert_eq!(last.get(2, 2).unwrap().block_type, BlockType::Stone);
        assert_eq!(
            saved[0].restore(10, 10).unwrap().get(1, 1).unwrap().block_type,
            BlockType::Grass
        );
    }

    #[tokio::test]
    async fn console_quit_and_status() {
        let mut rl = room_loop();
        let status = rl.exec_console("status");
        assert!(status[0].starts_with("Tick:"));
        assert!(!rl.quit);
        rl.exec_console("quit");
        assert!(rl.quit);
    }

    #[test]
    fn session_ids_are_opaque_alphanumerics() {
        let id = new_session_id();
        assert_eq!(id.len(), SESSION_ID_LEN);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
