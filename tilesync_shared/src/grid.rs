//! Tile grid.
//!
//! A dense, fixed-size, row-major array of cells with origin `(0, 0)` at the
//! top-left. Dimensions never change after construction, and every index in
//! `0..width * height` always holds a valid cell.

use serde::{Deserialize, Serialize};

use crate::config::FULL_HEALTH;

/// Block occupying a cell. Only `Grass` is walkable and only `Grass` may be
/// built on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum BlockType {
    #[default]
    Grass = 0,
    Wood = 1,
    Stone = 2,
}

impl BlockType {
    pub const ALL: [BlockType; 3] = [BlockType::Grass, BlockType::Wood, BlockType::Stone];

    pub fn is_walkable(self) -> bool {
        self == BlockType::Grass
    }

    /// Converts a wire/integer value, rejecting anything outside the enum range.
    pub fn from_i32(raw: i32) -> Result<Self, GridError> {
        match raw {
            0 => Ok(BlockType::Grass),
            1 => Ok(BlockType::Wood),
            2 => Ok(BlockType::Stone),
            other => Err(GridError::InvalidBlockType(other)),
        }
    }
}

impl From<BlockType> for u8 {
    fn from(b: BlockType) -> u8 {
        b as u8
    }
}

impl TryFrom<u8> for BlockType {
    type Error = GridError;

    fn try_from(raw: u8) -> Result<Self, GridError> {
        BlockType::from_i32(i32::from(raw))
    }
}

/// One grid cell. Health is tracked but no gameplay rule reads it yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cell {
    pub block_type: BlockType,
    pub health: u8,
}

impl Default for Cell {
    fn default() -> Self {
        Self {
            block_type: BlockType::Grass,
            health: FULL_HEALTH,
        }
    }
}

/// Grid errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GridError {
    #[error("cell ({x}, {y}) is outside the grid")]
    OutOfBounds { x: i32, y: i32 },
    #[error("block type {0} is not a known block")]
    InvalidBlockType(i32),
    #[error("expected {expected} cells, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },
}

/// Persisted form of a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedBlock {
    pub block_type: u8,
    pub health: u8,
}

/// Dense world grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorldGrid {
    width: u32,
    height: u32,
    cells: Vec<Cell>,
}

impl WorldGrid {
    /// Creates an all-grass grid.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            cells: vec![Cell::default(); width as usize * height as usize],
        }
    }

    /// Builds a grid by asking `block_at` for every cell in row-major order.
    pub fn from_fn(width: u32, height: u32, mut block_at: impl FnMut(i32, i32) -> BlockType) -> Self {
        let mut cells = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height as i32 {
            for x in 0..width as i32 {
                cells.push(Cell {
                    block_type: block_at(x, y),
                    health: FULL_HEALTH,
                });
            }
        }
        Self {
            width,
            height,
            cells,
        }
    }

    /// Builds a grid from row-major block types, e.g. a received snapshot.
    pub fn from_block_types(width: u32, height: u32, blocks: &[u8]) -> Result<Self, GridError> {
        let expected = width as usize * height as usize;
        if blocks.len() != expected {
            return Err(GridError::SizeMismatch {
                expected,
                actual: blocks.len(),
            });
        }
        let cells = blocks
            .iter()
            .map(|&raw| {
                Ok(Cell {
                    block_type: BlockType::try_from(raw)?,
                    health: FULL_HEALTH,
                })
            })
            .collect::<Result<Vec<_>, GridError>>()?;
        Ok(Self {
            width,
            height,
            cells,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn in_bounds(&self, x: i32, y: i32) -> bool {
        x >= 0 && y >= 0 && (x as u32) < self.width && (y as u32) < self.height
    }

    fn index(&self, x: i32, y: i32) -> Result<usize, GridError> {
        if self.in_bounds(x, y) {
            Ok(y as usize * self.width as usize + x as usize)
        } else {
            Err(GridError::OutOfBounds { x, y })
        }
    }

    pub fn get(&self, x: i32, y: i32) -> Result<Cell, GridError> {
        self.index(x, y).map(|i| self.cells[i])
    }

    /// Sets the block type of a cell and resets its health.
    pub fn set(&mut self, x: i32, y: i32, block_type: BlockType) -> Result<(), GridError> {
        let i = self.index(x, y)?;
        self.cells[i] = Cell {
            block_type,
            health: FULL_HEALTH,
        };
        Ok(())
    }

    /// Row-major block types, as sent in snapshots.
    pub fn block_types(&self) -> Vec<u8> {
        self.cells.iter().map(|c| u8::from(c.block_type)).collect()
    }

    pub fn cells(&self) -> impl Iterator<Item = (i32, i32, Cell)> + '_ {
        let w = self.width as usize;
        self.cells
            .iter()
            .enumerate()
            .map(move |(i, c)| ((i % w) as i32, (i / w) as i32, *c))
    }

    pub fn to_save_data(&self) -> Vec<SavedBlock> {
        self.cells
            .iter()
            .map(|c| SavedBlock {
                block_type: u8::from(c.block_type),
                health: c.health,
            })
            .collect()
    }

    /// Replaces every cell from saved data.
    ///
    /// The data must cover the grid exactly and hold only known block types;
    /// on error the grid is left untouched.
    pub fn load_from_data(&mut self, data: &[SavedBlock]) -> Result<(), GridError> {
        if data.len() != self.cells.len() {
            return Err(GridError::SizeMismatch {
                expected: self.cells.len(),
                actual: data.len(),
            });
        }
        let cells = data
            .iter()
            .map(|b| {
                Ok(Cell {
                    block_type: BlockType::try_from(b.block_type)?,
                    health: b.health,
                })
            })
            .collect::<Result<Vec<_>, GridError>>()?;
        self.cells = cells;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_fn_visits_cells_row_major() {
        let grid = WorldGrid::from_fn(3, 2, |x, y| {
            if (x, y) == (2, 1) {
                BlockType::Wood
            } else {
                BlockType::Grass
            }
        });
        assert_eq!(grid.block_types(), vec![0, 0, 0, 0, 0, 1]);
        assert_eq!(grid.get(2, 1).unwrap().health, FULL_HEALTH);
    }

    #[test]
    fn get_and_set_respect_bounds() {
        let mut grid = WorldGrid::new(4, 3);
        assert_eq!(grid.len(), 12);
        assert!(grid.get(3, 2).is_ok());
        assert_eq!(grid.get(4, 0), Err(GridError::OutOfBounds { x: 4, y: 0 }));
        assert_eq!(grid.get(0, -1), Err(GridError::OutOfBounds { x: 0, y: -1 }));
        assert_eq!(
            grid.set(-1, 0, BlockType::Stone),
            Err(GridError::OutOfBounds { x: -1, y: 0 })
        );
    }

    #[test]
    fn set_resets_health_and_uses_row_major_order() {
        let mut grid = WorldGrid::new(4, 3);
        let mut data = grid.to_save_data();
        data[6].health = 7;
        grid.load_from_data(&data).unwrap();
        assert_eq!(grid.get(2, 1).unwrap().health, 7);

        grid.set(2, 1, BlockType::Wood).unwrap();
        let cell = grid.get(2, 1).unwrap();
        assert_eq!(cell.block_type, BlockType::Wood);
        assert_eq!(cell.health, FULL_HEALTH);
        assert_eq!(grid.block_types()[6], 1);
    }

    #[test]
    fn save_data_reloads_into_identical_grid() {
        let mut grid = WorldGrid::new(5, 5);
        grid.set(0, 0, BlockType::Stone).unwrap();
        grid.set(4, 4, BlockType::Wood).unwrap();
        let mut data = grid.to_save_data();
        data[12].health = 42;

        let mut original = WorldGrid::new(5, 5);
        original.load_from_data(&data).unwrap();

        let mut reloaded = WorldGrid::new(5, 5);
        reloaded.load_from_data(&original.to_save_data()).unwrap();
        assert_eq!(reloaded, original);
    }

    #[test]
    fn load_rejects_bad_data_without_mutating() {
        let mut grid = WorldGrid::new(2, 2);
        grid.set(1, 1, BlockType::Stone).unwrap();
        let before = grid.clone();

        let short = vec![SavedBlock { block_type: 0, health: 100 }; 3];
        assert!(matches!(
            grid.load_from_data(&short),
            Err(GridError::SizeMismatch { expected: 4, actual: 3 })
        ));

        let mut bad = grid.to_save_data();
        bad[0].block_type = 9;
        assert_eq!(grid.load_from_data(&bad), Err(GridError::InvalidBlockType(9)));
        assert_eq!(grid, before);
    }

    #[test]
    fn block_type_serializes_as_integer() {
        assert_eq!(serde_json::to_string(&BlockType::Stone).unwrap(), "2");
        assert_eq!(serde_json::from_str::<BlockType>("1").unwrap(), BlockType::Wood);
        assert!(serde_json::from_str::<BlockType>("3").is_err());
        assert!(BlockType::from_i32(-1).is_err());
    }
}
