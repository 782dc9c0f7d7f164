//! Streaming managers.
//!
//! A manager decides how many divisions a run uses and delegates their
//! geometry to a splitter. Usage is always `prepare` once, then `split(i)`
//! for `i < number_of_divisions()`.

use crate::core::error::{ConfigurationError, PipelineResult};
use crate::core::region::Region;
use crate::core::splitter::{ImageRegionSplitter, SplitStrategy, StripSplitter, TileSplitter};
use crate::pipeline::graph::{NodeHandle, Pipeline};
use crate::streaming::budget::{MemoryBudget, PipelineMemoryEstimator};
use log::info;

/// Partitions the output of a run into streaming divisions.
pub trait StreamingManager: Send {
    /// Policy name for logs.
    fn name(&self) -> &'static str;

    /// Plan the divisions of `region`, the region the terminal will be
    /// asked for. Output information must be up to date. Returns the
    /// number of divisions.
    fn prepare(&mut self, pipeline: &Pipeline, terminal: NodeHandle, region: &Region)
        -> PipelineResult<usize>;

    /// Division count decided by the last `prepare` (0 before).
    fn number_of_divisions(&self) -> usize;

    /// Division `index`, `None` past the end or before `prepare`.
    fn split(&self, index: usize) -> Option<Region>;

    /// All divisions in order.
    fn divisions(&self) -> Vec<Region> {
        (0..self.number_of_divisions())
            .filter_map(|i| self.split(i))
            .collect()
    }
}

/// A prepared partition: region, requested piece count and splitter.
pub struct SplitPlan {
    splitter: Box<dyn ImageRegionSplitter>,
    region: Region,
    requested: usize,
    count: usize,
}

impl std::fmt::Debug for SplitPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SplitPlan")
            .field("region", &self.region)
            .field("requested", &self.requested)
            .field("count", &self.count)
            .finish()
    }
}

impl SplitPlan {
    fn new(splitter: Box<dyn ImageRegionSplitter>) -> Self {
        Self {
            splitter,
            region: Region::default(),
            requested: 0,
            count: 0,
        }
    }

    fn plan(&mut self, manager: &'static str, region: &Region, requested: usize) -> usize {
        self.region = *region;
        self.requested = requested;
        self.count = self.splitter.number_of_splits(region, requested);
        info!(
            "{} manager: {} divisions of {} (requested {})",
            manager, self.count, region, requested
        );
        self.count
    }

    fn split(&self, index: usize) -> Option<Region> {
        if index >= self.count {
            return None;
        }
        self.splitter.split(&self.region, index, self.requested)
    }

    /// Number of divisions planned.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Piece count that was asked of the splitter.
    pub fn requested(&self) -> usize {
        self.requested
    }
}

fn positive(parameter: &'static str, value: u64) -> Result<u64, ConfigurationError> {
    if value == 0 {
        return Err(ConfigurationError::NonPositive {
            parameter,
            value: 0.0,
        });
    }
    Ok(value)
}

// ============================================================================
// Fixed count
// ============================================================================

/// Uses a caller-supplied division count.
#[derive(Debug)]
pub struct FixedDivisionsManager {
    divisions: usize,
    plan: SplitPlan,
}

impl FixedDivisionsManager {
    /// Split into `divisions` pieces using `strategy`.
    pub fn new(divisions: usize, strategy: SplitStrategy) -> Result<Self, ConfigurationError> {
        positive("number of divisions", divisions as u64)?;
        Ok(Self {
            divisions,
            plan: SplitPlan::new(strategy.splitter()?),
        })
    }

    /// One division: the whole region in a single pass.
    pub fn single_pass() -> Self {
        Self {
            divisions: 1,
            plan: SplitPlan::new(Box::new(StripSplitter)),
        }
    }
}

impl StreamingManager for FixedDivisionsManager {
    fn name(&self) -> &'static str {
        "fixed-divisions"
    }

    fn prepare(&mut self, _pipeline: &Pipeline, _terminal: NodeHandle, region: &Region) -> PipelineResult<usize> {
        Ok(self.plan.plan(self.name(), region, self.divisions))
    }

    fn number_of_divisions(&self) -> usize {
        self.plan.count()
    }

    fn split(&self, index: usize) -> Option<Region> {
        self.plan.split(index)
    }
}

// ============================================================================
// Lines per block
// ============================================================================

/// Strips of a fixed number of rows.
#[derive(Debug)]
pub struct LinesPerBlockManager {
    lines: u64,
    plan: SplitPlan,
}

impl LinesPerBlockManager {
    /// Strips of at most `lines` rows. Heights are balanced by
    /// [`StripSplitter`], so strips may be shorter than `lines`.
    pub fn new(lines: u64) -> Result<Self, ConfigurationError> {
        Ok(Self {
            lines: positive("lines per block", lines)?,
            plan: SplitPlan::new(Box::new(StripSplitter)),
        })
    }
}

impl StreamingManager for LinesPerBlockManager {
    fn name(&self) -> &'static str {
        "lines-per-block"
    }

    fn prepare(&mut self, _pipeline: &Pipeline, _terminal: NodeHandle, region: &Region) -> PipelineResult<usize> {
        let requested = region.height.div_ceil(self.lines).max(1) as usize;
        Ok(self.plan.plan(self.name(), region, requested))
    }

    fn number_of_divisions(&self) -> usize {
        self.plan.count()
    }

    fn split(&self, index: usize) -> Option<Region> {
        self.plan.split(index)
    }
}

// ============================================================================
// Tile size
// ============================================================================

/// Square tiles of approximately `tile_size × tile_size` pixels, aligned
/// to a `tile_size` grid.
#[derive(Debug)]
pub struct TileSizeManager {
    tile_size: u64,
    plan: SplitPlan,
}

impl TileSizeManager {
    /// Target tiles of `tile_size` pixels per side.
    pub fn new(tile_size: u64) -> Result<Self, ConfigurationError> {
        let tile_size = positive("tile size", tile_size)?;
        Ok(Self {
            tile_size,
            plan: SplitPlan::new(Box::new(TileSplitter::new(tile_size)?)),
        })
    }
}

impl StreamingManager for TileSizeManager {
    fn name(&self) -> &'static str {
        "tile-size"
    }

    fn prepare(&mut self, _pipeline: &Pipeline, _terminal: NodeHandle, region: &Region) -> PipelineResult<usize> {
        let tile_area = self.tile_size.saturating_mul(self.tile_size);
        let requested = region.area().div_ceil(tile_area).max(1) as usize;
        Ok(self.plan.plan(self.name(), region, requested))
    }

    fn number_of_divisions(&self) -> usize {
        self.plan.count()
    }

    fn split(&self, index: usize) -> Option<Region> {
        self.plan.split(index)
    }
}

// ============================================================================
// RAM budget
// ============================================================================

/// Derives the division count from a memory budget and the pipeline's
/// estimated per-pixel footprint.
///
/// The geometry honours the budget per division, not only in total:
/// strips hold at most as many rows as fit, tiles are capped in area.
/// A single row wider than the budget is the one unavoidable excess.
#[derive(Debug)]
pub struct RamBudgetManager {
    budget: MemoryBudget,
    estimator: PipelineMemoryEstimator,
    tiles: Option<TileSplitter>,
    plan: SplitPlan,
}

impl RamBudgetManager {
    /// Stay within `budget`, splitting with `strategy`.
    pub fn new(budget: MemoryBudget, strategy: SplitStrategy) -> Result<Self, ConfigurationError> {
        let tiles = match strategy {
            SplitStrategy::Strip => None,
            SplitStrategy::Tile { alignment } => Some(TileSplitter::new(alignment)?),
        };
        Ok(Self {
            budget,
            estimator: PipelineMemoryEstimator,
            tiles,
            plan: SplitPlan::new(strategy.splitter()?),
        })
    }

    /// The budget in use.
    pub fn budget(&self) -> &MemoryBudget {
        &self.budget
    }
}

impl StreamingManager for RamBudgetManager {
    fn name(&self) -> &'static str {
        "ram-budget"
    }

    fn prepare(&mut self, pipeline: &Pipeline, terminal: NodeHandle, region: &Region) -> PipelineResult<usize> {
        let footprint = self.estimator.estimate(pipeline, terminal)?.per_pixel();
        let mut requested = self.budget.divisions_for(region.area(), footprint);
        let max_pixels = self.budget.max_division_pixels(footprint);

        let splitter: Box<dyn ImageRegionSplitter> = match self.tiles {
            Some(tiles) => Box::new(tiles.with_max_area(max_pixels)),
            None => {
                let lines = max_pixels / region.width.max(1);
                let strips = if lines == 0 {
                    region.height
                } else {
                    region.height.div_ceil(lines)
                };
                requested = requested.max(strips as usize);
                Box::new(StripSplitter)
            }
        };
        self.plan = SplitPlan::new(splitter);
        Ok(self.plan.plan(self.name(), region, requested))
    }

    fn number_of_divisions(&self) -> usize {
        self.plan.count()
    }

    fn split(&self, index: usize) -> Option<Region> {
        self.plan.split(index)
    }
}
