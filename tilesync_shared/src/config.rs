//! Configuration system.
//!
//! Two layers live here:
//! - Simulation constants compiled into both client and server. These must
//!   match bit-for-bit on both ends, so the handshake carries a fingerprint
//!   of them (see [`SimConstants::fingerprint`]).
//! - Process configuration (`EngineConfig`) loaded from JSON by the binaries.

use std::{path::Path, path::PathBuf, time::Duration};

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Fixed simulation rate, identical on client and server.
pub const TICK_RATE: u32 = 60;

/// Distance moved per axis for every applied input command.
pub const PLAYER_VELOCITY: f32 = 2.0;

/// Edge length of one tile in world units.
pub const TILE_SIZE: f32 = 32.0;

/// World width in cells.
pub const WORLD_WIDTH: u32 = 50;

/// World height in cells.
pub const WORLD_HEIGHT: u32 = 50;

/// Half the edge of the player's square collision box.
pub const PLAYER_HALF_EXTENT: f32 = 12.0;

/// Prediction error above which the client snaps to the server position.
pub const SNAP_THRESHOLD: f32 = 50.0;

/// Prediction error below which the client leaves its prediction alone.
pub const CORRECTION_THRESHOLD: f32 = 2.0;

/// Fraction of the prediction error removed per client step.
pub const CORRECTION_SPEED: f32 = 0.2;

/// Fraction of the gap to the server position closed per step for remote players.
pub const INTERPOLATION_SPEED: f32 = 0.3;

/// Health assigned to a cell whenever its block type is set.
pub const FULL_HEALTH: u8 = 100;

/// Duration of one fixed simulation step.
pub fn fixed_time_step() -> Duration {
    Duration::from_secs(1) / TICK_RATE
}

/// Every constant that must agree between client and server builds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimConstants {
    pub tick_rate: u32,
    pub player_velocity: f32,
    pub tile_size: f32,
    pub world_width: u32,
    pub world_height: u32,
    pub player_half_extent: f32,
    pub snap_threshold: f32,
    pub correction_threshold: f32,
    pub correction_speed: f32,
    pub interpolation_speed: f32,
}

impl SimConstants {
    /// The constants this build was compiled with.
    pub const CURRENT: Self = Self {
        tick_rate: TICK_RATE,
        player_velocity: PLAYER_VELOCITY,
        tile_size: TILE_SIZE,
        world_width: WORLD_WIDTH,
        world_height: WORLD_HEIGHT,
        player_half_extent: PLAYER_HALF_EXTENT,
        snap_threshold: SNAP_THRESHOLD,
        correction_threshold: CORRECTION_THRESHOLD,
        correction_speed: CORRECTION_SPEED,
        interpolation_speed: INTERPOLATION_SPEED,
    };

    /// FNV-1a over the exact bit patterns of every field.
    ///
    /// Stable across platforms and compiler versions, unlike `DefaultHasher`.
    pub fn fingerprint(&self) -> u64 {
        const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
        const PRIME: u64 = 0x0000_0100_0000_01b3;

        let words = [
            self.tick_rate,
            self.player_velocity.to_bits(),
            self.tile_size.to_bits(),
            self.world_width,
            self.world_height,
            self.player_half_extent.to_bits(),
            self.snap_threshold.to_bits(),
            self.correction_threshold.to_bits(),
            self.correction_speed.to_bits(),
            self.interpolation_speed.to_bits(),
        ];

        let mut hash = OFFSET;
        for word in words {
            for byte in word.to_le_bytes() {
                hash ^= u64::from(byte);
                hash = hash.wrapping_mul(PRIME);
            }
        }
        hash
    }
}

impl Default for SimConstants {
    fn default() -> Self {
        Self::CURRENT
    }
}

/// Process configuration shared by client/server binaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Server listen/connect address, e.g. `127.0.0.1:2567`.
    pub server_addr: String,
    /// Directory holding saved worlds.
    #[serde(default = "default_save_dir")]
    pub save_dir: String,
    /// World file stem; the file is `<save_dir>/<world_name>.json`.
    #[serde(default = "default_world_name")]
    pub world_name: String,
    /// Auto-save period in seconds.
    #[serde(default = "default_autosave_secs")]
    pub autosave_secs: u64,
    /// Maximum concurrently joined players.
    #[serde(default = "default_max_clients")]
    pub max_clients: usize,
}

fn default_save_dir() -> String {
    "data".to_string()
}

fn default_world_name() -> String {
    "game_world".to_string()
}

fn default_autosave_secs() -> u64 {
    60
}

fn default_max_clients() -> usize {
    4
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:2567".to_string(),
            save_dir: default_save_dir(),
            world_name: default_world_name(),
            autosave_secs: default_autosave_secs(),
            max_clients: default_max_clients(),
        }
    }
}

impl EngineConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    /// Reads and parses a JSON config file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        Self::from_json_str(&text).with_context(|| format!("parse config {}", path.display()))
    }

    /// Path of the world save file.
    pub fn world_path(&self) -> PathBuf {
        Path::new(&self.save_dir).join(format!("{}.json", self.world_name))
    }

    pub fn autosave_interval(&self) -> Duration {
        Duration::from_secs(self.autosave_secs.max(1))
    }
}
