//! Deterministic region splitting strategies.
//!
//! A splitter partitions a region into non-overlapping pieces whose union
//! is the original region. Piece order is stable: the same region and
//! count always yield the same pieces in the same order.
//!
//! - [`StripSplitter`] divides rows only, keeping on-disk row locality.
//! - [`TileSplitter`] produces near-square tiles whose edges fall on an
//!   alignment grid anchored at the raster origin.

use crate::core::error::ConfigurationError;
use crate::core::region::Region;
use serde::{Deserialize, Serialize};

/// Splitting strategy selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum SplitStrategy {
    /// Horizontal strips spanning the full width.
    Strip,
    /// Square-ish tiles aligned to `alignment` pixels.
    Tile {
        /// On-disk tile granularity in pixels.
        alignment: u64,
    },
}

impl Default for SplitStrategy {
    fn default() -> Self {
        SplitStrategy::Strip
    }
}

impl SplitStrategy {
    /// Build the splitter for this strategy.
    pub fn splitter(&self) -> Result<Box<dyn ImageRegionSplitter>, ConfigurationError> {
        match *self {
            SplitStrategy::Strip => Ok(Box::new(StripSplitter)),
            SplitStrategy::Tile { alignment } => Ok(Box::new(TileSplitter::new(alignment)?)),
        }
    }

    /// Short name for logs and errors.
    pub fn name(&self) -> &'static str {
        match self {
            SplitStrategy::Strip => "strip",
            SplitStrategy::Tile { .. } => "tile",
        }
    }
}

/// Partitions a region into a requested number of pieces.
pub trait ImageRegionSplitter: Send + Sync {
    /// Number of pieces `split` will actually produce for `requested`.
    ///
    /// Never exceeds what the splittable dimensions support, never returns
    /// a count that would need a degenerate piece. An empty region yields 0.
    fn number_of_splits(&self, region: &Region, requested: usize) -> usize;

    /// Piece `index` of the partition, `None` past the last piece.
    fn split(&self, region: &Region, index: usize, requested: usize) -> Option<Region>;

    /// All pieces in order.
    fn split_all(&self, region: &Region, requested: usize) -> Vec<Region> {
        (0..self.number_of_splits(region, requested))
            .filter_map(|i| self.split(region, i, requested))
            .collect()
    }
}

/// Splits along rows only.
///
/// Piece heights differ by at most one row; the trailing pieces absorb the
/// remainder.
#[derive(Debug, Clone, Copy, Default)]
pub struct StripSplitter;

impl ImageRegionSplitter for StripSplitter {
    fn number_of_splits(&self, region: &Region, requested: usize) -> usize {
        if region.is_empty() {
            return 0;
        }
        (requested.max(1) as u64).min(region.height) as usize
    }

    fn split(&self, region: &Region, index: usize, requested: usize) -> Option<Region> {
        let count = self.number_of_splits(region, requested) as u64;
        let index = index as u64;
        if index >= count {
            return None;
        }
        let base = region.height / count;
        let remainder = region.height % count;
        let first_long = count - remainder;
        let offset = index * base + index.saturating_sub(first_long);
        let height = base + u64::from(index >= first_long);
        Some(Region::new(
            region.x,
            region.y + offset as i64,
            region.width,
            height,
        ))
    }
}

/// Splits into near-square tiles on an alignment grid.
///
/// The tile side is the largest multiple of the alignment that still
/// yields the requested piece count, never less than one alignment unit.
/// An optional area cap ([`TileSplitter::with_max_area`]) takes precedence
/// and may drop the side below the alignment.
#[derive(Debug, Clone, Copy)]
pub struct TileSplitter {
    alignment: u64,
    max_side: Option<u64>,
}

/// Grid layout of a tiled split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TileGrid {
    side: u64,
    first_col: i64,
    first_row: i64,
    cols: u64,
    rows: u64,
}

impl TileSplitter {
    /// Create a tile splitter; `alignment` is the on-disk tile granularity.
    pub fn new(alignment: u64) -> Result<Self, ConfigurationError> {
        if alignment == 0 {
            return Err(ConfigurationError::NonPositive {
                parameter: "tile alignment",
                value: 0.0,
            });
        }
        Ok(Self {
            alignment,
            max_side: None,
        })
    }

    /// Cap every tile at `max_area` pixels.
    ///
    /// The side stays on the alignment grid when one aligned tile fits the
    /// cap, otherwise it becomes the largest square that does.
    pub fn with_max_area(mut self, max_area: u64) -> Self {
        let side = isqrt(max_area).max(1);
        self.max_side = Some(if side >= self.alignment {
            side / self.alignment * self.alignment
        } else {
            side
        });
        self
    }

    /// Tile granularity in pixels.
    pub fn alignment(&self) -> u64 {
        self.alignment
    }

    /// Side length of the tiles used for `requested` pieces.
    pub fn tile_side(&self, region: &Region, requested: usize) -> u64 {
        let a = self.alignment;
        let requested = requested.max(1) as u64;
        let ideal = (region.area() as f64 / requested as f64).sqrt().ceil().max(1.0) as u64;
        // Any aligned side up to this one covers the region with enough cells.
        let smallest = isqrt(region.area() / requested) / a * a;
        let mut side = ideal.div_ceil(a) * a;
        while side > a && side > smallest && self.cell_count(region, side) < requested {
            side -= a;
        }
        match self.max_side {
            Some(cap) => side.min(cap),
            None => side,
        }
    }

    fn cell_count(&self, region: &Region, side: u64) -> u64 {
        Self::grid_with_side(region, side)
            .map(|g| g.cols * g.rows)
            .unwrap_or(0)
    }

    fn grid(&self, region: &Region, requested: usize) -> Option<TileGrid> {
        Self::grid_with_side(region, self.tile_side(region, requested))
    }

    fn grid_with_side(region: &Region, side: u64) -> Option<TileGrid> {
        if region.is_empty() {
            return None;
        }
        let s = side as i64;
        let first_col = region.x.div_euclid(s);
        let first_row = region.y.div_euclid(s);
        let last_col = (region.right() + s - 1).div_euclid(s);
        let last_row = (region.bottom() + s - 1).div_euclid(s);
        Some(TileGrid {
            side,
            first_col,
            first_row,
            cols: (last_col - first_col) as u64,
            rows: (last_row - first_row) as u64,
        })
    }
}

fn isqrt(n: u64) -> u64 {
    let mut root = (n as f64).sqrt() as u64;
    while root.checked_mul(root).map_or(true, |sq| sq > n) {
        root -= 1;
    }
    while (root + 1).checked_mul(root + 1).map_or(false, |sq| sq <= n) {
        root += 1;
    }
    root
}

impl ImageRegionSplitter for TileSplitter {
    fn number_of_splits(&self, region: &Region, requested: usize) -> usize {
        self.grid(region, requested)
            .map(|g| (g.cols * g.rows) as usize)
            .unwrap_or(0)
    }

    fn split(&self, region: &Region, index: usize, requested: usize) -> Option<Region> {
        let grid = self.grid(region, requested)?;
        let index = index as u64;
        if index >= grid.cols * grid.rows {
            return None;
        }
        let s = grid.side as i64;
        let col = grid.first_col + (index % grid.cols) as i64;
        let row = grid.first_row + (index / grid.cols) as i64;
        Region::new(col * s, row * s, grid.side, grid.side).intersection(region)
    }
}
