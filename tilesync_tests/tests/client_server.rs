//! Full socket-based integration tests for client ↔ server communication.

use std::{sync::Arc, time::Duration};

use tilesync_client::GameClient;
use tilesync_server::persistence::MemoryStore;
use tilesync_shared::{
    config::{self, EngineConfig, SimConstants},
    grid::BlockType,
    math::Vec2,
    net::{Hello, NetMsg, ReliableConn, PROTOCOL_VERSION},
};
use tilesync_tests::{init_tracing, pump_until, toward_centre, world_with, RunningServer};

const WAIT: Duration = Duration::from_secs(5);

fn flat_store() -> Arc<MemoryStore> {
    Arc::new(MemoryStore::with_world(world_with(&[])))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn handshake_delivers_welcome_and_snapshot() -> anyhow::Result<()> {
    init_tracing();
    let server = RunningServer::start(flat_store()).await?;

    let client = server.connect().await?;
    let world = client.world();
    assert!(world.is_bootstrapped());
    assert_eq!(world.session_id(), client.session_id);
    assert_eq!(client.session_id.len(), 9);
    assert!(world.predicted_position().is_some());
    assert!(world
        .mirror()
        .grid()
        .cells()
        .all(|(_, _, c)| c.block_type == BlockType::Grass));

    drop(client);
    server.stop().await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn movement_is_confirmed_by_server() -> anyhow::Result<()> {
    init_tracing();
    let server = RunningServer::start(flat_store()).await?;
    let mut client = server.connect().await?;
    let start = client.world().predicted_position().unwrap_or_default();
    let input = toward_centre(start);

    for _ in 0..30 {
        client.frame(config::fixed_time_step(), input)?;
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    // The server applies every command; prediction settles within the
    // correction dead zone of it.
    let expected = Vec2::new(start.x + 60.0 * input.move_x, start.y);
    pump_until(&mut client, WAIT, |w| {
        w.authoritative_position() == Some(expected)
            && w
                .predicted_position()
                .is_some_and(|p| p.distance(expected) <= config::CORRECTION_THRESHOLD)
    })
    .await?;

    drop(client);
    server.stop().await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn block_edits_reach_every_client_in_order() -> anyhow::Result<()> {
    init_tracing();
    let server = RunningServer::start(flat_store()).await?;
    let mut a = server.connect().await?;
    let mut b = server.connect().await?;

    // B's snapshot already has A; A learns about B from PlayerJoined.
    assert!(b.world().remote_position(&a.session_id).is_some());
    let b_id = b.session_id.clone();
    pump_until(&mut a, WAIT, |w| w.remote_position(&b_id).is_some()).await?;

    a.place_block(5, 5, BlockType::Stone)?;
    pump_until(&mut b, WAIT, |w| {
        w.mirror().grid().get(5, 5).map(|c| c.block_type).ok() == Some(BlockType::Stone)
    })
    .await?;

    // Rejected edits are silent; the valid edit sent after them proves
    // they were processed.
    a.place_block(5, 5, BlockType::Wood)?;
    a.break_block(6, 6)?;
    a.break_block(5, 5)?;
    pump_until(&mut b, WAIT, |w| {
        w.mirror().grid().get(5, 5).map(|c| c.block_type).ok() == Some(BlockType::Grass)
    })
    .await?;
    assert_eq!(b.world().mirror().grid().get(6, 6)?.block_type, BlockType::Grass);

    pump_until(&mut a, WAIT, |w| {
        w.mirror().grid().get(5, 5).map(|c| c.block_type).ok() == Some(BlockType::Grass)
    })
    .await?;

    drop(a);
    drop(b);
    server.stop().await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn remote_movement_and_departure_are_broadcast() -> anyhow::Result<()> {
    init_tracing();
    let server = RunningServer::start(flat_store()).await?;
    let mut a = server.connect().await?;
    let mut b = server.connect().await?;
    let a_id = a.session_id.clone();

    let start = a.world().predicted_position().unwrap_or_default();
    let input = toward_centre(start);
    for _ in 0..10 {
        a.frame(config::fixed_time_step(), input)?;
    }
    let target = Vec2::new(start.x + 20.0 * input.move_x, start.y);

    pump_until(&mut b, WAIT, |w| {
        w.mirror().player(&a_id) == Some(target)
            && w
                .remote_position(&a_id)
                .is_some_and(|p| (p.x - target.x).abs() < 0.5)
    })
    .await?;

    drop(a);
    pump_until(&mut b, WAIT, |w| w.remote_position(&a_id).is_none()).await?;

    drop(b);
    server.stop().await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn mismatched_constants_are_rejected() -> anyhow::Result<()> {
    init_tracing();
    let server = RunningServer::start(flat_store()).await?;

    let wrong = SimConstants::CURRENT.fingerprint() ^ 1;
    let err = match GameClient::connect_with(server.addr, wrong).await {
        Ok(_) => anyhow::bail!("mismatched client was accepted"),
        Err(e) => e,
    };
    assert!(format!("{err:#}").contains("rejected"));

    server.stop().await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn joins_beyond_capacity_are_rejected() -> anyhow::Result<()> {
    init_tracing();
    let cfg = EngineConfig {
        server_addr: "127.0.0.1:0".to_string(),
        max_clients: 1,
        ..Default::default()
    };
    let server = RunningServer::start_with(cfg, flat_store()).await?;

    let first = server.connect().await?;
    let err = match server.connect().await {
        Ok(_) => anyhow::bail!("second client was accepted"),
        Err(e) => e,
    };
    assert!(format!("{err:#}").contains("full"));

    drop(first);
    server.stop().await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rejected_connection_is_closed_by_server() -> anyhow::Result<()> {
    init_tracing();
    let cfg = EngineConfig {
        server_addr: "127.0.0.1:0".to_string(),
        max_clients: 1,
        ..Default::default()
    };
    let server = RunningServer::start_with(cfg, flat_store()).await?;
    let first = server.connect().await?;

    let mut conn = ReliableConn::connect(server.addr).await?;
    conn.send(&NetMsg::Hello(Hello {
        protocol: PROTOCOL_VERSION,
        constants: SimConstants::CURRENT.fingerprint(),
    }))
    .await?;
    let msg = tokio::time::timeout(WAIT, conn.recv()).await??;
    assert!(matches!(msg, NetMsg::Rejected(_)), "got {:?}", msg.tag());

    let next = tokio::time::timeout(WAIT, conn.recv()).await?;
    assert!(next.is_err(), "connection stayed open");

    drop(first);
    server.stop().await
}
