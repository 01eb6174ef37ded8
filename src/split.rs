//! Domain decomposition: global shapes, balanced partitions, process grids,
//! and per-rank block geometry.
//!
//! A real array of shape (X, Y, Z) is distributed over a 2D grid of ranks in
//! the "xy" layout: X split over grid rows, Y over grid columns, full extent
//! in Z. Its forward transform of shape (X, Y, Z/2 + 1) lives in the "yz"
//! layout: full extent in X, Y split over grid rows, the complex depth over
//! grid columns. Geometry is a pure function of (shape, grid, rank), so
//! every rank can recompute every other rank's block without exchanging
//! geometry messages.

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitError {
    EmptyDimension,
    RankOutOfRange { rank: usize, active: usize },
    GridExceedsWorld { active: usize, world: usize },
    GeometryMismatch { expected: usize, got: usize },
}

impl fmt::Display for SplitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SplitError::EmptyDimension => write!(f, "global shape has an empty dimension"),
            SplitError::RankOutOfRange { rank, active } => {
                write!(f, "rank {rank} outside the active grid of {active}")
            }
            SplitError::GridExceedsWorld { active, world } => {
                write!(f, "grid needs {active} ranks but only {world} exist")
            }
            SplitError::GeometryMismatch { expected, got } => {
                write!(f, "blocks cover {got} elements, expected {expected}")
            }
        }
    }
}

impl std::error::Error for SplitError {}

/// Logical problem size of the real-valued array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalShape {
    pub x: usize,
    pub y: usize,
    pub z: usize,
}

impl GlobalShape {
    pub fn new(x: usize, y: usize, z: usize) -> Result<Self, SplitError> {
        if x == 0 || y == 0 || z == 0 {
            return Err(SplitError::EmptyDimension);
        }
        Ok(Self { x, y, z })
    }

    /// Depth of the Hermitian-compressed complex array.
    pub fn complex_depth(&self) -> usize {
        self.z / 2 + 1
    }

    pub fn real_len(&self) -> usize {
        self.x * self.y * self.z
    }

    pub fn complex_len(&self) -> usize {
        self.x * self.y * self.complex_depth()
    }
}

impl fmt::Display for GlobalShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.x, self.y, self.z)
    }
}

/// Balanced split of `n` items over `parts`: returns `(offset, len)` of part
/// `index`. The first `n % parts` parts hold one extra item, so extents
/// never differ by more than one.
pub fn partition(n: usize, parts: usize, index: usize) -> (usize, usize) {
    debug_assert!(parts > 0 && index < parts);
    let q = n / parts;
    let r = n % parts;
    if index < r {
        (index * (q + 1), q + 1)
    } else {
        (r * (q + 1) + (index - r) * q, q)
    }
}

/// Largest extent any part of a balanced split can have.
pub fn partition_max(n: usize, parts: usize) -> usize {
    debug_assert!(parts > 0);
    n.div_ceil(parts)
}

/// 2D arrangement of the cooperating ranks, row-major
/// (`rank = row * cols + col`). Ranks at or past `rows * cols` take no part
/// in the transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessGrid {
    pub rows: usize,
    pub cols: usize,
    pub rank: usize,
    pub world: usize,
}

impl ProcessGrid {
    /// Deterministic shape-aware factorization of `world` ranks: `cols` is
    /// the largest divisor of `world` not exceeding its square root (so
    /// `rows >= cols`, favoring the outermost axis), then each side is
    /// clamped by the dimensions it splits.
    pub fn new(world: usize, rank: usize, shape: &GlobalShape) -> Self {
        let cols = (1..=world)
            .filter(|c| c * c <= world && world % c == 0)
            .max()
            .unwrap_or(1);
        let rows = world / cols;
        // Rows split X (real) and Y (complex); cols split Y (real) and the
        // complex depth. Clamp so no side outnumbers what it splits.
        let rows = rows.min(shape.x).min(shape.y);
        let cols = cols.min(shape.y).min(shape.complex_depth());
        Self {
            rows,
            cols,
            rank,
            world,
        }
    }

    /// Explicit grid dimensions, e.g. for tests pinning a known layout.
    pub fn with_dims(
        rows: usize,
        cols: usize,
        world: usize,
        rank: usize,
    ) -> Result<Self, SplitError> {
        if rows * cols > world {
            return Err(SplitError::GridExceedsWorld {
                active: rows * cols,
                world,
            });
        }
        Ok(Self {
            rows,
            cols,
            rank,
            world,
        })
    }

    pub fn active_count(&self) -> usize {
        self.rows * self.cols
    }

    pub fn is_active(&self) -> bool {
        self.rank < self.active_count()
    }

    pub fn coords_of(&self, rank: usize) -> (usize, usize) {
        debug_assert!(rank < self.active_count());
        (rank / self.cols, rank % self.cols)
    }

    pub fn rank_at(&self, row: usize, col: usize) -> usize {
        debug_assert!(row < self.rows && col < self.cols);
        row * self.cols + col
    }

    /// World ranks forming grid row `row`, in column order.
    pub fn row_members(&self, row: usize) -> Vec<usize> {
        (0..self.cols).map(|c| self.rank_at(row, c)).collect()
    }

    /// World ranks forming grid column `col`, in row order.
    pub fn col_members(&self, col: usize) -> Vec<usize> {
        (0..self.rows).map(|r| self.rank_at(r, col)).collect()
    }

    /// The active world ranks, in rank order.
    pub fn active_ranks(&self) -> Vec<usize> {
        (0..self.active_count()).collect()
    }
}

/// One rank's sub-block of a distributed 3D array: global extents of the
/// variant it belongs to, plus the local offset and extent per dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Split3 {
    pub gx: usize,
    pub gy: usize,
    pub gz: usize,
    pub x0: usize,
    pub y0: usize,
    pub z0: usize,
    pub xl: usize,
    pub yl: usize,
    pub zl: usize,
}

impl Split3 {
    /// Real-layout block of `rank`: X over grid rows, Y over grid columns,
    /// full Z.
    pub fn xy(shape: &GlobalShape, grid: &ProcessGrid, rank: usize) -> Result<Self, SplitError> {
        let active = grid.active_count();
        if rank >= active {
            return Err(SplitError::RankOutOfRange { rank, active });
        }
        let (row, col) = grid.coords_of(rank);
        let (x0, xl) = partition(shape.x, grid.rows, row);
        let (y0, yl) = partition(shape.y, grid.cols, col);
        Ok(Self {
            gx: shape.x,
            gy: shape.y,
            gz: shape.z,
            x0,
            y0,
            z0: 0,
            xl,
            yl,
            zl: shape.z,
        })
    }

    /// Complex-layout block of `rank`: full X, Y over grid rows, the complex
    /// depth over grid columns.
    pub fn yz(shape: &GlobalShape, grid: &ProcessGrid, rank: usize) -> Result<Self, SplitError> {
        let active = grid.active_count();
        if rank >= active {
            return Err(SplitError::RankOutOfRange { rank, active });
        }
        let (row, col) = grid.coords_of(rank);
        let zp = shape.complex_depth();
        let (y0, yl) = partition(shape.y, grid.rows, row);
        let (z0, zl) = partition(zp, grid.cols, col);
        Ok(Self {
            gx: shape.x,
            gy: shape.y,
            gz: zp,
            x0: 0,
            y0,
            z0,
            xl: shape.x,
            yl,
            zl,
        })
    }

    /// The whole real array as a single block (reference-transform side).
    pub fn full_real(shape: &GlobalShape) -> Self {
        Self {
            gx: shape.x,
            gy: shape.y,
            gz: shape.z,
            x0: 0,
            y0: 0,
            z0: 0,
            xl: shape.x,
            yl: shape.y,
            zl: shape.z,
        }
    }

    /// The whole complex array as a single block.
    pub fn full_complex(shape: &GlobalShape) -> Self {
        Self {
            gx: shape.x,
            gy: shape.y,
            gz: shape.complex_depth(),
            x0: 0,
            y0: 0,
            z0: 0,
            xl: shape.x,
            yl: shape.y,
            zl: shape.complex_depth(),
        }
    }

    /// Local element count.
    pub fn len(&self) -> usize {
        self.xl * self.yl * self.zl
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element count of the full array this block belongs to.
    pub fn global_len(&self) -> usize {
        self.gx * self.gy * self.gz
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_is_balanced_and_tiles() {
        for n in 1..40usize {
            for parts in 1..=n {
                let mut next = 0;
                let mut min_len = usize::MAX;
                let mut max_len = 0;
                for i in 0..parts {
                    let (off, len) = partition(n, parts, i);
                    assert_eq!(off, next, "n={n} parts={parts} i={i}");
                    next += len;
                    min_len = min_len.min(len);
                    max_len = max_len.max(len);
                }
                assert_eq!(next, n);
                assert!(max_len - min_len <= 1);
                assert_eq!(max_len, partition_max(n, parts));
            }
        }
    }

    #[test]
    fn remainder_goes_to_leading_parts() {
        // 10 over 4: 3 3 2 2.
        assert_eq!(partition(10, 4, 0), (0, 3));
        assert_eq!(partition(10, 4, 1), (3, 3));
        assert_eq!(partition(10, 4, 2), (6, 2));
        assert_eq!(partition(10, 4, 3), (8, 2));
    }

    #[test]
    fn auto_grid_prefers_rows() {
        let shape = GlobalShape::new(8, 8, 8).unwrap();
        let grid = ProcessGrid::new(2, 0, &shape);
        assert_eq!((grid.rows, grid.cols), (2, 1));
        let grid = ProcessGrid::new(6, 0, &shape);
        assert_eq!((grid.rows, grid.cols), (3, 2));
        let grid = ProcessGrid::new(4, 0, &shape);
        assert_eq!((grid.rows, grid.cols), (2, 2));
    }

    #[test]
    fn auto_grid_clamps_to_shape() {
        let shape = GlobalShape::new(2, 2, 2).unwrap();
        let grid = ProcessGrid::new(16, 7, &shape);
        assert!(grid.rows <= 2 && grid.cols <= 2);
        assert!(!grid.is_active() || grid.rank < grid.active_count());
    }

    #[test]
    fn xy_blocks_tile_exactly() {
        let shape = GlobalShape::new(5, 7, 3).unwrap();
        let grid = ProcessGrid::with_dims(2, 3, 6, 0).unwrap();
        let mut seen = vec![0u8; shape.real_len()];
        for rank in 0..grid.active_count() {
            let d = Split3::xy(&shape, &grid, rank).unwrap();
            assert_eq!(d.zl, shape.z);
            for i in 0..d.xl {
                for j in 0..d.yl {
                    for k in 0..d.zl {
                        let gidx = ((d.x0 + i) * d.gy + d.y0 + j) * d.gz + d.z0 + k;
                        seen[gidx] += 1;
                    }
                }
            }
        }
        assert!(seen.iter().all(|&c| c == 1));
    }

    #[test]
    fn yz_blocks_tile_exactly() {
        let shape = GlobalShape::new(5, 7, 9).unwrap();
        let grid = ProcessGrid::with_dims(3, 2, 6, 0).unwrap();
        let mut seen = vec![0u8; shape.complex_len()];
        for rank in 0..grid.active_count() {
            let d = Split3::yz(&shape, &grid, rank).unwrap();
            assert_eq!(d.xl, shape.x);
            for i in 0..d.xl {
                for j in 0..d.yl {
                    for k in 0..d.zl {
                        let gidx = ((d.x0 + i) * d.gy + d.y0 + j) * d.gz + d.z0 + k;
                        seen[gidx] += 1;
                    }
                }
            }
        }
        assert!(seen.iter().all(|&c| c == 1));
    }

    #[test]
    fn two_row_grid_halves_x() {
        let shape = GlobalShape::new(8, 4, 4).unwrap();
        let grid = ProcessGrid::with_dims(2, 1, 2, 0).unwrap();
        let d0 = Split3::xy(&shape, &grid, 0).unwrap();
        let d1 = Split3::xy(&shape, &grid, 1).unwrap();
        assert_eq!((d0.x0, d0.xl, d0.y0, d0.yl), (0, 4, 0, 4));
        assert_eq!((d1.x0, d1.xl, d1.y0, d1.yl), (4, 4, 0, 4));
        assert_eq!(d0.len(), 4 * 4 * 4);
        assert_eq!(d1.len(), 4 * 4 * 4);
    }

    #[test]
    fn inactive_rank_is_rejected() {
        let shape = GlobalShape::new(4, 4, 4).unwrap();
        let grid = ProcessGrid::with_dims(1, 1, 4, 3).unwrap();
        assert!(!grid.is_active());
        assert_eq!(
            Split3::xy(&shape, &grid, 3),
            Err(SplitError::RankOutOfRange { rank: 3, active: 1 })
        );
    }
}
