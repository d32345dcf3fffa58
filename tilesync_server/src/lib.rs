//! `tilesync_server`
//!
//! Server-side systems:
//! - Fixed timestep simulation of queued player input
//! - Grid mutation rules for placing and breaking blocks
//! - Per-tick change tracking and broadcast to every client
//! - World persistence with auto-save
//!
//! Networking model:
//! - One TCP stream per client carrying tagged frames in both directions.
//! - A single room loop owns all authoritative state.

pub mod mutation;
pub mod persistence;
pub mod room;
pub mod server;
pub mod simulation;
pub mod tracker;

pub use server::GameServer;
