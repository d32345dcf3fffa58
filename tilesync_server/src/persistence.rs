//! World persistence.
//!
//! The saved document is `{version, width, height, blocks, lastSaved}`. A
//! world is only restored if its dimensions match the compiled-in world and
//! every block decodes; anything else falls back to a freshly generated
//! world, which is saved right away.

use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tilesync_shared::grid::{BlockType, GridError, SavedBlock, WorldGrid};
use tracing::{info, warn};

/// Current save format version.
pub const SAVE_VERSION: u32 = 1;

/// Chance that an interior cell becomes wood.
const WOOD_CHANCE: f64 = 0.05;

/// Chance that a non-wood interior cell becomes stone.
const STONE_CHANCE: f64 = 0.03;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedWorld {
    pub version: u32,
    pub width: u32,
    pub height: u32,
    pub blocks: Vec<SavedBlock>,
    pub last_saved: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RestoreError {
    #[error("save version {0} is not supported by this build")]
    UnsupportedVersion(u32),
    #[error("saved world is {found_w}x{found_h}, expected {width}x{height}")]
    DimensionMismatch {
        width: u32,
        height: u32,
        found_w: u32,
        found_h: u32,
    },
    #[error(transparent)]
    Grid(#[from] GridError),
}

impl SavedWorld {
    pub fn capture(grid: &WorldGrid) -> Self {
        Self {
            version: SAVE_VERSION,
            width: grid.width(),
            height: grid.height(),
            blocks: grid.to_save_data(),
            last_saved: Utc::now(),
        }
    }

    /// Rebuilds a grid, requiring the expected dimensions.
    pub fn restore(&self, width: u32, height: u32) -> Result<WorldGrid, RestoreError> {
        if self.version != SAVE_VERSION {
            return Err(RestoreError::UnsupportedVersion(self.version));
        }
        if self.width != width || self.height != height {
            return Err(RestoreError::DimensionMismatch {
                width,
                height,
                found_w: self.width,
                found_h: self.height,
            });
        }
        let mut grid = WorldGrid::new(width, height);
        grid.load_from_data(&self.blocks)?;
        Ok(grid)
    }
}

/// Load/save gateway for the world document.
#[async_trait]
pub trait WorldStore: Send + Sync {
    /// Returns `None` when nothing has been saved yet.
    async fn load(&self) -> anyhow::Result<Option<SavedWorld>>;

    async fn save(&self, world: &SavedWorld) -> anyhow::Result<()>;

    /// Human-readable location for logs.
    fn describe(&self) -> String;
}

/// Stores the world as a JSON file. Saves through one store (and its
/// clones) run one at a time.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
    write_lock: Arc<tokio::sync::Mutex<()>>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

#[async_trait]
impl WorldStore for JsonFileStore {
    async fn load(&self) -> anyhow::Result<Option<SavedWorld>> {
        if !tokio::fs::try_exists(&self.path)
            .await
            .with_context(|| format!("stat {}", self.path.display()))?
        {
            return Ok(None);
        }
        let text = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("read {}", self.path.display()))?;
        let world = serde_json::from_str(&text)
            .with_context(|| format!("parse {}", self.path.display()))?;
        Ok(Some(world))
    }

    async fn save(&self, world: &SavedWorld) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock().await;
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("create {}", dir.display()))?;
        }
        let json = serde_json::to_vec(world).context("serialize world")?;
        // Write a sibling temp file, then rename it over the old save.
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &json)
            .await
            .with_context(|| format!("write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("rename to {}", self.path.display()))?;
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// In-memory store for tests and ephemeral servers.
#[derive(Debug, Default)]
pub struct MemoryStore {
    slot: Mutex<Option<SavedWorld>>,
    saves: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_world(world: SavedWorld) -> Self {
        Self {
            slot: Mutex::new(Some(world)),
            saves: AtomicUsize::new(0),
        }
    }

    /// The most recently saved document.
    pub fn saved(&self) -> Option<SavedWorld> {
        self.slot.lock().ok().and_then(|slot| slot.clone())
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl WorldStore for MemoryStore {
    async fn load(&self) -> anyhow::Result<Option<SavedWorld>> {
        let slot = self
            .slot
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store poisoned"))?;
        Ok(slot.clone())
    }

    async fn save(&self, world: &SavedWorld) -> anyhow::Result<()> {
        let mut slot = self
            .slot
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store poisoned"))?;
        *slot = Some(world.clone());
        self.saves.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

/// How the world came to be.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    Loaded { last_saved: DateTime<Utc> },
    Generated { reason: String },
}

/// Generates a world with a stone border and a mostly-grass interior with
/// scattered wood and stone, rolled independently per cell.
pub fn generate_default_world(width: u32, height: u32, rng: &mut impl Rng) -> WorldGrid {
    let (w, h) = (width as i32, height as i32);
    WorldGrid::from_fn(width, height, |x, y| {
        let border = x == 0 || y == 0 || x == w - 1 || y == h - 1;
        if border {
            BlockType::Stone
        } else if rng.gen_bool(WOOD_CHANCE) {
            BlockType::Wood
        } else if rng.gen_bool(STONE_CHANCE) {
            BlockType::Stone
        } else {
            BlockType::Grass
        }
    })
}

/// Restores the saved world, or generates and immediately saves a new one.
pub async fn load_or_generate(
    store: &dyn WorldStore,
    width: u32,
    height: u32,
    rng: &mut (impl Rng + Send),
) -> (WorldGrid, LoadOutcome) {
    let reason = match store.load().await {
        Ok(Some(saved)) => match saved.restore(width, height) {
            Ok(grid) => {
                info!(store = %store.describe(), last_saved = %saved.last_saved, "World loaded");
                return (
                    grid,
                    LoadOutcome::Loaded {
                        last_saved: saved.last_saved,
                    },
                );
            }
            Err(e) => {
                warn!(store = %store.describe(), error = %e, "Saved world rejected");
                e.to_string()
            }
        },
        Ok(None) => {
            info!(store = %store.describe(), "No saved world found");
            "no saved world".to_string()
        }
        Err(e) => {
            warn!(store = %store.describe(), error = %format!("{e:#}"), "Failed to load world");
            format!("{e:#}")
        }
    };

    info!(width, height, "Generating default world");
    let grid = generate_default_world(width, height, rng);
    save_world(store, &grid).await;
    (grid, LoadOutcome::Generated { reason })
}

/// Saves the grid, logging instead of failing; in-memory state is untouched.
pub async fn save_world(store: &dyn WorldStore, grid: &WorldGrid) -> bool {
    save_document(store, &SavedWorld::capture(grid)).await
}

pub async fn save_document(store: &dyn WorldStore, doc: &SavedWorld) -> bool {
    match store.save(doc).await {
        Ok(()) => {
            info!(store = %store.describe(), "World saved");
            true
        }
        Err(e) => {
            warn!(store = %store.describe(), error = %format!("{e:#}"), "Failed to save world");
            false
        }
    }
}
