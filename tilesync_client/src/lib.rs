//! `tilesync_client`
//!
//! Client-side systems:
//! - Connection management and handshake
//! - Local world mirror fed by snapshots and incremental events
//! - Prediction and reconciliation for the local player
//! - Interpolation for remote players
//! - Input sampling and command generation

pub mod client;
pub mod input;
pub mod interp;
pub mod mirror;
pub mod prediction;

pub use client::{ClientWorld, GameClient};
