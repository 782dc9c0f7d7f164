//! Core types for the RasterFlow streaming engine.
//!
//! This module contains the value types everything else is built on:
//! - Regions and the splitting strategies that partition them
//! - Raster buffers and row-band views for workers
//! - Output information descriptors
//! - Error types

pub mod buffer;
pub mod error;
pub mod region;
pub mod splitter;
pub mod types;

// Re-export commonly used types
pub use buffer::{RasterBuffer, RasterTileMut};
pub use error::{
    ConfigurationError, GraphError, IoError, NodeId, NodeRef, PipelineError, RasterFlowError,
    RunError, StageError,
};
pub use region::Region;
pub use splitter::{ImageRegionSplitter, SplitStrategy, StripSplitter, TileSplitter};
pub use types::{ImageInfo, SampleType};
