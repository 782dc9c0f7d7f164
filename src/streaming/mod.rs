//! Division planning: memory budgets and streaming managers.

pub mod budget;
pub mod manager;

pub use budget::{MemoryBudget, PipelineMemoryEstimator, PixelFootprint, FALLBACK_PIXEL_FOOTPRINT};
pub use manager::{
    FixedDivisionsManager, LinesPerBlockManager, RamBudgetManager, SplitPlan, StreamingManager,
    TileSizeManager,
};
