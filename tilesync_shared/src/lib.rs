//! `tilesync_shared`
//!
//! Shared libraries linked into both client and server.
//!
//! Design goals:
//! - Deterministic: the same grid and inputs resolve to the same positions
//!   on both ends, so collision and scheduling live here exactly once.
//! - Clear separation of concerns (config, grid, movement, tick, net, sync).
//! - Traits at the seams the simulation reads through.
//! - No `unsafe`.

pub mod config;
pub mod grid;
pub mod input;
pub mod math;
pub mod movement;
pub mod net;
pub mod sync;
pub mod tick;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::config::*;
    pub use crate::grid::*;
    pub use crate::input::*;
    pub use crate::math::*;
    pub use crate::movement::*;
    pub use crate::net::*;
    pub use crate::sync::*;
    pub use crate::tick::*;
}
