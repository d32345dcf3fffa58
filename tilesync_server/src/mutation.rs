//! Block placement and breaking rules.
//!
//! - Place: in bounds, known block type, target must currently be grass.
//! - Break: in bounds, target must not be grass; it becomes grass.
//!
//! Rejections never mutate the grid. The protocol has no error reply, so
//! callers only broadcast on success.

use tilesync_shared::{
    grid::{BlockType, GridError, WorldGrid},
    sync::CellChange,
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MutationError {
    #[error("cell ({x}, {y}) is outside the grid")]
    OutOfBounds { x: i32, y: i32 },
    #[error("block type {0} is not a known block")]
    InvalidBlockType(i32),
    #[error("cell ({x}, {y}) holds {found:?}, which does not allow this edit")]
    IllegalMutation { x: i32, y: i32, found: BlockType },
}

fn out_of_bounds(x: i32, y: i32) -> impl FnOnce(GridError) -> MutationError {
    move |_| MutationError::OutOfBounds { x, y }
}

/// Places `raw_type` at `(x, y)` if the cell is grass.
pub fn place_block(
    grid: &mut WorldGrid,
    x: i32,
    y: i32,
    raw_type: i32,
) -> Result<CellChange, MutationError> {
    let current = grid.get(x, y).map_err(out_of_bounds(x, y))?;
    let block_type =
        BlockType::from_i32(raw_type).map_err(|_| MutationError::InvalidBlockType(raw_type))?;
    if current.block_type != BlockType::Grass {
        return Err(MutationError::IllegalMutation {
            x,
            y,
            found: current.block_type,
        });
    }
    grid.set(x, y, block_type).map_err(out_of_bounds(x, y))?;
    Ok(CellChange { x, y, block_type })
}

/// Turns a non-grass cell back into grass.
pub fn break_block(grid: &mut WorldGrid, x: i32, y: i32) -> Result<CellChange, MutationError> {
    let current = grid.get(x, y).map_err(out_of_bounds(x, y))?;
    if current.block_type == BlockType::Grass {
        return Err(MutationError::IllegalMutation {
            x,
            y,
            found: current.block_type,
        });
    }
    grid.set(x, y, BlockType::Grass).map_err(out_of_bounds(x, y))?;
    Ok(CellChange {
        x,
        y,
        block_type: BlockType::Grass,
    })
}
