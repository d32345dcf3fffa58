//! Movement resolution against the tile grid.
//!
//! Both the server (authoritative) and the client (prediction) call the same
//! resolver here, so identical grids and inputs always give identical results.
//!
//! Collision is axis-aligned: the combined move is tried first, and when it
//! is blocked each axis is retried on its own so the player slides along
//! walls instead of sticking to them.

use crate::{
    config::SimConstants,
    grid::WorldGrid,
    math::Vec2,
};

/// Read access to walkability, in cell coordinates.
pub trait TileQuery {
    /// Returns false for out-of-bounds or non-walkable cells.
    fn is_walkable(&self, cx: i32, cy: i32) -> bool;
}

impl TileQuery for WorldGrid {
    fn is_walkable(&self, cx: i32, cy: i32) -> bool {
        self.get(cx, cy)
            .map(|cell| cell.block_type.is_walkable())
            .unwrap_or(false)
    }
}

/// Square collision box resolver.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MovementResolver {
    pub half_extent: f32,
    pub tile_size: f32,
}

impl MovementResolver {
    pub fn new(half_extent: f32, tile_size: f32) -> Self {
        Self {
            half_extent,
            tile_size,
        }
    }

    pub fn from_constants(c: &SimConstants) -> Self {
        Self::new(c.player_half_extent, c.tile_size)
    }

    /// Cell index containing a world coordinate.
    pub fn world_to_cell(&self, v: f32) -> i32 {
        (v / self.tile_size).floor() as i32
    }

    /// True when all four corners of the box centred at `pos` are walkable.
    pub fn box_fits(&self, pos: Vec2, world: &impl TileQuery) -> bool {
        let h = self.half_extent;
        let corners = [
            (pos.x - h, pos.y - h),
            (pos.x + h, pos.y - h),
            (pos.x - h, pos.y + h),
            (pos.x + h, pos.y + h),
        ];
        corners
            .iter()
            .all(|&(x, y)| world.is_walkable(self.world_to_cell(x), self.world_to_cell(y)))
    }

    /// Resolves a requested displacement and returns the new position.
    pub fn resolve(&self, pos: Vec2, delta: Vec2, world: &impl TileQuery) -> Vec2 {
        if delta == Vec2::ZERO {
            return pos;
        }

        let combined = pos + delta;
        if self.box_fits(combined, world) {
            return combined;
        }

        let mut out = pos;
        let x_only = Vec2::new(out.x + delta.x, out.y);
        if delta.x != 0.0 && self.box_fits(x_only, world) {
            out = x_only;
        }
        let y_only = Vec2::new(out.x, out.y + delta.y);
        if delta.y != 0.0 && self.box_fits(y_only, world) {
            out = y_only;
        }
        out
    }
}

impl Default for MovementResolver {
    fn default() -> Self {
        Self::from_constants(&SimConstants::CURRENT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::BlockType;

    const TILE: f32 = 32.0;

    fn resolver() -> MovementResolver {
        MovementResolver::new(12.0, TILE)
    }

    /// 10x10 grass with a stone border.
    fn walled_grid() -> WorldGrid {
        let mut grid = WorldGrid::new(10, 10);
        for i in 0..10 {
            grid.set(i, 0, BlockType::Stone).unwrap();
            grid.set(i, 9, BlockType::Stone).unwrap();
            grid.set(0, i, BlockType::Stone).unwrap();
            grid.set(9, i, BlockType::Stone).unwrap();
        }
        grid
    }

    fn centre_of(cx: i32, cy: i32) -> Vec2 {
        Vec2::new(cx as f32 * TILE + TILE / 2.0, cy as f32 * TILE + TILE / 2.0)
    }

    #[test]
    fn free_move_applies_both_axes() {
        let grid = walled_grid();
        let start = centre_of(4, 4);
        let end = resolver().resolve(start, Vec2::new(2.0, -2.0), &grid);
        assert_eq!(end, Vec2::new(start.x + 2.0, start.y - 2.0));
    }

    #[test]
    fn wall_blocks_one_axis_and_slides_along_the_other() {
        let mut grid = walled_grid();
        // Column of wood directly to the right of cell (4, *).
        for y in 1..9 {
            grid.set(5, y, BlockType::Wood).unwrap();
        }
        let r = resolver();
        // Right edge of the box sits 1 unit left of the wood column.
        let start = Vec2::new(5.0 * TILE - 12.0 - 1.0, centre_of(4, 4).y);
        let end = r.resolve(start, Vec2::new(2.0, 2.0), &grid);

        assert_eq!(end.x, start.x, "x is blocked by the wall");
        assert_eq!(end.y, start.y + 2.0, "y component of the diagonal survives");
    }

    #[test]
    fn out_of_bounds_corners_block() {
        let grid = WorldGrid::new(4, 4);
        let r = resolver();
        let start = Vec2::new(13.0, 13.0);
        assert_eq!(r.resolve(start, Vec2::new(-2.0, -2.0), &grid), start);
        assert_eq!(r.world_to_cell(-0.5), -1);
    }

    #[test]
    fn resolved_box_never_overlaps_solid_cells() {
        let mut grid = walled_grid();
        // Scatter some obstacles.
        for &(x, y) in &[(3, 3), (6, 2), (2, 6), (5, 5), (7, 7), (4, 7)] {
            grid.set(x, y, BlockType::Stone).unwrap();
        }
        let r = resolver();
        let deltas = [
            Vec2::new(2.0, 0.0),
            Vec2::new(-2.0, 0.0),
            Vec2::new(0.0, 2.0),
            Vec2::new(0.0, -2.0),
            Vec2::new(2.0, 2.0),
            Vec2::new(-2.0, 2.0),
            Vec2::new(2.0, -2.0),
            Vec2::new(-2.0, -2.0),
        ];

        for (cx, cy, cell) in grid.clone().cells() {
            if !cell.block_type.is_walkable() {
                continue;
            }
            let mut pos = centre_of(cx, cy);
            if !r.box_fits(pos, &grid) {
                continue;
            }
            // Walk each direction for long enough to hit something.
            for d in deltas {
                let mut p = pos;
                for _ in 0..200 {
                    p = r.resolve(p, d, &grid);
                    assert!(r.box_fits(p, &grid), "box overlaps a solid cell at {p:?}");
                }
            }
            pos = r.resolve(pos, Vec2::ZERO, &grid);
            assert!(r.box_fits(pos, &grid));
        }
    }

    #[test]
    fn resolution_is_deterministic() {
        let grid = walled_grid();
        let r = resolver();
        let mut a = centre_of(2, 2);
        let mut b = centre_of(2, 2);
        for i in 0..500 {
            let d = Vec2::new(if i % 7 < 4 { 2.0 } else { -2.0 }, if i % 5 < 3 { 2.0 } else { -2.0 });
            a = r.resolve(a, d, &grid);
            b = r.resolve(b, d, &grid);
        }
        assert_eq!(a, b);
    }
}
