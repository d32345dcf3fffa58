//! Networking primitives.
//!
//! Goals:
//! - One reliable, ordered TCP stream per client.
//! - Explicit integer-tagged messages instead of implicit state replication.
//! - Keep serialization explicit and versionable.
//!
//! Frame layout: `u32` big-endian length of what follows, one tag byte, then
//! the JSON body of the tagged payload.

use anyhow::Context;
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpListener, TcpStream,
    },
};

use crate::{
    input::InputCommand,
    sync::{CellChange, PlayerState, SessionId, SyncEvent, WorldSnapshot},
};

/// Protocol version for compatibility checks.
pub const PROTOCOL_VERSION: u32 = 1;

/// Upper bound on a single frame (tag + body).
pub const MAX_FRAME_LEN: usize = 1 << 20;

/// Wire tags. Client requests keep the low numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageTag {
    Input = 0,
    PlaceBlock = 1,
    BreakBlock = 2,
    Hello = 16,
    Welcome = 17,
    Rejected = 18,
    Snapshot = 32,
    PlayerMoved = 33,
    CellChanged = 34,
    PlayerJoined = 35,
    PlayerLeft = 36,
}

impl TryFrom<u8> for MessageTag {
    type Error = ProtocolError;

    fn try_from(raw: u8) -> Result<Self, ProtocolError> {
        Ok(match raw {
            0 => MessageTag::Input,
            1 => MessageTag::PlaceBlock,
            2 => MessageTag::BreakBlock,
            16 => MessageTag::Hello,
            17 => MessageTag::Welcome,
            18 => MessageTag::Rejected,
            32 => MessageTag::Snapshot,
            33 => MessageTag::PlayerMoved,
            34 => MessageTag::CellChanged,
            35 => MessageTag::PlayerJoined,
            36 => MessageTag::PlayerLeft,
            other => return Err(ProtocolError::UnknownTag(other)),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("unknown message tag {0}")]
    UnknownTag(u8),
    #[error("frame of {0} bytes exceeds limit")]
    FrameTooLarge(usize),
    #[error("empty frame")]
    EmptyFrame,
}

/// Client request to place a block. `block_type` stays a raw integer so the
/// server can reject out-of-range values itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceBlock {
    pub x: i32,
    pub y: i32,
    pub block_type: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakBlock {
    pub x: i32,
    pub y: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    pub protocol: u32,
    /// `SimConstants::fingerprint()` of the client build.
    pub constants: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Welcome {
    pub session_id: SessionId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejected {
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerLeft {
    pub session_id: SessionId,
}

/// High-level message envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum NetMsg {
    // ─── Gameplay requests ───
    Input(InputCommand),
    PlaceBlock(PlaceBlock),
    BreakBlock(BreakBlock),

    // ─── Connection handshake ───
    Hello(Hello),
    Welcome(Welcome),
    Rejected(Rejected),

    // ─── State sync ───
    Snapshot(WorldSnapshot),
    PlayerMoved(PlayerState),
    CellChanged(CellChange),
    PlayerJoined(PlayerState),
    PlayerLeft(PlayerLeft),
}

impl NetMsg {
    pub fn tag(&self) -> MessageTag {
        match self {
            NetMsg::Input(_) => MessageTag::Input,
            NetMsg::PlaceBlock(_) => MessageTag::PlaceBlock,
            NetMsg::BreakBlock(_) => MessageTag::BreakBlock,
            NetMsg::Hello(_) => MessageTag::Hello,
            NetMsg::Welcome(_) => MessageTag::Welcome,
            NetMsg::Rejected(_) => MessageTag::Rejected,
            NetMsg::Snapshot(_) => MessageTag::Snapshot,
            NetMsg::PlayerMoved(_) => MessageTag::PlayerMoved,
            NetMsg::CellChanged(_) => MessageTag::CellChanged,
            NetMsg::PlayerJoined(_) => MessageTag::PlayerJoined,
            NetMsg::PlayerLeft(_) => MessageTag::PlayerLeft,
        }
    }

    fn body(&self) -> serde_json::Result<Vec<u8>> {
        match self {
            NetMsg::Input(p) => serde_json::to_vec(p),
            NetMsg::PlaceBlock(p) => serde_json::to_vec(p),
            NetMsg::BreakBlock(p) => serde_json::to_vec(p),
            NetMsg::Hello(p) => serde_json::to_vec(p),
            NetMsg::Welcome(p) => serde_json::to_vec(p),
            NetMsg::Rejected(p) => serde_json::to_vec(p),
            NetMsg::Snapshot(p) => serde_json::to_vec(p),
            NetMsg::PlayerMoved(p) => serde_json::to_vec(p),
            NetMsg::CellChanged(p) => serde_json::to_vec(p),
            NetMsg::PlayerJoined(p) => serde_json::to_vec(p),
            NetMsg::PlayerLeft(p) => serde_json::to_vec(p),
        }
    }

    fn from_body(tag: MessageTag, body: &[u8]) -> serde_json::Result<Self> {
        Ok(match tag {
            MessageTag::Input => NetMsg::Input(serde_json::from_slice(body)?),
            MessageTag::PlaceBlock => NetMsg::PlaceBlock(serde_json::from_slice(body)?),
            MessageTag::BreakBlock => NetMsg::BreakBlock(serde_json::from_slice(body)?),
            MessageTag::Hello => NetMsg::Hello(serde_json::from_slice(body)?),
            MessageTag::Welcome => NetMsg::Welcome(serde_json::from_slice(body)?),
            MessageTag::Rejected => NetMsg::Rejected(serde_json::from_slice(body)?),
            MessageTag::Snapshot => NetMsg::Snapshot(serde_json::from_slice(body)?),
            MessageTag::PlayerMoved => NetMsg::PlayerMoved(serde_json::from_slice(body)?),
            MessageTag::CellChanged => NetMsg::CellChanged(serde_json::from_slice(body)?),
            MessageTag::PlayerJoined => NetMsg::PlayerJoined(serde_json::from_slice(body)?),
            MessageTag::PlayerLeft => NetMsg::PlayerLeft(serde_json::from_slice(body)?),
        })
    }
}

impl From<SyncEvent> for NetMsg {
    fn from(e: SyncEvent) -> Self {
        match e {
            SyncEvent::PlayerJoined(p) => NetMsg::PlayerJoined(p),
            SyncEvent::PlayerMoved(p) => NetMsg::PlayerMoved(p),
            SyncEvent::PlayerLeft { session_id } => NetMsg::PlayerLeft(PlayerLeft { session_id }),
            SyncEvent::CellChanged(c) => NetMsg::CellChanged(c),
        }
    }
}

/// Encodes tag + body (no length prefix).
pub fn encode_to_bytes(msg: &NetMsg) -> anyhow::Result<Bytes> {
    let body = msg.body().context("serialize")?;
    let mut buf = BytesMut::with_capacity(1 + body.len());
    buf.put_u8(msg.tag() as u8);
    buf.extend_from_slice(&body);
    Ok(buf.freeze())
}

/// Decodes tag + body (no length prefix).
pub fn decode_from_bytes(b: &[u8]) -> anyhow::Result<NetMsg> {
    let (&raw_tag, body) = b.split_first().ok_or(ProtocolError::EmptyFrame)?;
    let tag = MessageTag::try_from(raw_tag)?;
    NetMsg::from_body(tag, body).with_context(|| format!("deserialize {tag:?}"))
}

/// Writes one length-prefixed frame.
pub async fn write_frame<W: AsyncWrite + Unpin>(w: &mut W, msg: &NetMsg) -> anyhow::Result<()> {
    let payload = encode_to_bytes(msg)?;
    if payload.len() > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge(payload.len()).into());
    }
    let mut buf = BytesMut::with_capacity(4 + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.extend_from_slice(&payload);
    w.write_all(&buf).await.context("tcp write")?;
    Ok(())
}

/// Reads one length-prefixed frame.
pub async fn read_frame<R: AsyncRead + Unpin>(r: &mut R) -> anyhow::Result<NetMsg> {
    let mut len_buf = [0u8; 4];
    r.read_exact(&mut len_buf).await.context("tcp read len")?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge(len).into());
    }
    let mut payload = vec![0u8; len];
    r.read_exact(&mut payload)
        .await
        .context("tcp read payload")?;
    decode_from_bytes(&payload)
}

/// Reliable connection over TCP with length-prefixed frames.
#[derive(Debug)]
pub struct ReliableConn {
    stream: TcpStream,
}

impl ReliableConn {
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }

    pub async fn connect(addr: SocketAddr) -> anyhow::Result<Self> {
        let stream = TcpStream::connect(addr).await.context("tcp connect")?;
        stream.set_nodelay(true).context("tcp nodelay")?;
        Ok(Self::new(stream))
    }

    pub async fn send(&mut self, msg: &NetMsg) -> anyhow::Result<()> {
        write_frame(&mut self.stream, msg).await
    }

    pub async fn recv(&mut self) -> anyhow::Result<NetMsg> {
        read_frame(&mut self.stream).await
    }

    pub fn peer_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.stream.peer_addr()?)
    }

    /// Splits into independently owned read/write halves.
    pub fn into_split(self) -> (FrameReader, FrameWriter) {
        let (r, w) = self.stream.into_split();
        (FrameReader { inner: r }, FrameWriter { inner: w })
    }
}

#[derive(Debug)]
pub struct FrameReader {
    inner: OwnedReadHalf,
}

impl FrameReader {
    pub async fn recv(&mut self) -> anyhow::Result<NetMsg> {
        read_frame(&mut self.inner).await
    }
}

#[derive(Debug)]
pub struct FrameWriter {
    inner: OwnedWriteHalf,
}

impl FrameWriter {
    pub async fn send(&mut self, msg: &NetMsg) -> anyhow::Result<()> {
        write_frame(&mut self.inner, msg).await
    }
}

/// TCP server listener.
pub struct ReliableListener {
    listener: TcpListener,
}

impl ReliableListener {
    pub async fn bind(addr: SocketAddr) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).await.context("tcp bind")?;
        Ok(Self { listener })
    }

    pub async fn accept(&self) -> anyhow::Result<(ReliableConn, SocketAddr)> {
        let (stream, addr) = self.listener.accept().await.context("tcp accept")?;
        stream.set_nodelay(true).context("tcp nodelay")?;
        Ok((ReliableConn::new(stream), addr))
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}
