//! # RasterFlow - Out-of-core Raster Streaming
//!
//! RasterFlow processes rasters far larger than memory by pulling them
//! through a graph of stages one division at a time. Each division is
//! requested from the terminal stage; the request is propagated upstream
//! (padded by neighbourhood stages, clipped to each node's extent),
//! executed bottom-up, and the result is handed to a block sink before the
//! next division starts.
//!
//! ## Features
//!
//! - **Demand-driven pipeline**: stages declare what input they need for
//!   an output region; the engine never computes more than was requested
//! - **Streaming managers**: fixed division count, lines per block, tile
//!   size, or a RAM budget estimated from the stage graph
//! - **Parallel generation**: each node splits its output into row bands
//!   processed on a rayon pool
//! - **Buffer reuse**: nodes whose fresh output already covers a request
//!   are skipped
//! - **Cancellation and progress**: checked and reported between divisions
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use rasterflow::prelude::*;
//! use std::sync::Arc;
//!
//! let mut pipeline = Pipeline::new();
//! let source = pipeline.add_source(Arc::new(PatternSource::gradient(4096, 4096)));
//! let mean = pipeline.add_stage(MeanFilterStage::new(2), &[source])?;
//!
//! let config = StreamingConfig::ram_budget(64.0).with_threads(4);
//! let mut manager = config.build_manager()?;
//! let writer = StreamingWriter::new(config.writer_options())?;
//!
//! let mut sink = AtomicFileSink::new("mean.raw");
//! let report = writer.run(&mut pipeline, mean, manager.as_mut(), &mut sink)?;
//! println!("{} divisions", report.divisions);
//! ```
//!
//! ## Architecture
//!
//! - [`core`]: regions, buffers, output information, splitters and errors
//! - [`pipeline`]: the stage contract and the pipeline graph
//! - [`streaming`]: memory budgets and streaming managers
//! - [`execution`]: the demand engine, progress tracking and the writer
//! - [`io`]: block sources and sinks, and the codec registry
//! - [`stages`]: built-in stages
//! - [`config`]: TOML/environment configuration
//!
//! ## Writing a Stage
//!
//! A stage reports its output information, maps an output request to
//! input requests, and fills an output tile:
//!
//! ```rust,ignore
//! use rasterflow::prelude::*;
//!
//! struct Invert;
//!
//! impl OutputInformationProvider for Invert {
//!     fn output_information(&self, inputs: &[ImageInfo]) -> StageResult<ImageInfo> {
//!         Ok(inputs[0])
//!     }
//! }
//!
//! impl RequestedRegionPropagator for Invert {}
//!
//! impl DataGenerator for Invert {
//!     fn generate(&self, inputs: &StageInputs<'_>, output: &mut RasterTileMut<'_>) -> StageResult<()> {
//!         let input = inputs.buffer(0)?;
//!         output.fill_with(|x, y, pixel| {
//!             if let Some(source) = input.pixel(x, y) {
//!                 for (out, v) in pixel.iter_mut().zip(source) {
//!                     *out = -v;
//!                 }
//!             }
//!         });
//!         Ok(())
//!     }
//! }
//!
//! impl Stage for Invert {
//!     fn name(&self) -> &str {
//!         "invert"
//!     }
//!
//!     fn input_count(&self) -> usize {
//!         1
//!     }
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod core;
pub mod execution;
pub mod io;
pub mod pipeline;
pub mod stages;
pub mod streaming;

/// Prelude module for convenient imports.
///
/// Import everything commonly needed with:
/// ```rust,ignore
/// use rasterflow::prelude::*;
/// ```
pub mod prelude {
    // Core types
    pub use crate::core::buffer::{RasterBuffer, RasterTileMut};
    pub use crate::core::region::Region;
    pub use crate::core::splitter::{ImageRegionSplitter, SplitStrategy, StripSplitter, TileSplitter};
    pub use crate::core::types::{ImageInfo, SampleType};

    // Errors
    pub use crate::core::error::{
        ConfigurationError, DivisionFailure, GraphError, IoError, NodeId, NodeRef, PipelineError,
        RasterFlowError, RunError, StageError, StageResult,
    };

    // Pipeline
    pub use crate::pipeline::graph::{NodeHandle, Pipeline, PipelineNode};
    pub use crate::pipeline::stage::{
        neighborhood_request, DataGenerator, NeighborhoodRadius, OutputInformationProvider,
        RequestedRegionPropagator, Stage, StageInputs,
    };
    pub use crate::pipeline::state::CacheValidity;

    // Streaming
    pub use crate::streaming::budget::{MemoryBudget, PipelineMemoryEstimator};
    pub use crate::streaming::manager::{
        FixedDivisionsManager, LinesPerBlockManager, RamBudgetManager, StreamingManager,
        TileSizeManager,
    };

    // Execution
    pub use crate::execution::engine::{DemandEngine, EngineOptions, ExecutionStats};
    pub use crate::execution::progress::{CancellationToken, ProgressUpdate};
    pub use crate::execution::writer::{RunReport, StreamingWriter, WriterOptions};

    // I/O
    pub use crate::io::block::{
        BlockSink, BlockSource, MemoryBlockSink, MemoryBlockSource, PatternSource,
    };
    pub use crate::io::file::{AtomicFileSink, RawFileSink, RawFileSource};
    pub use crate::io::registry::CodecRegistry;

    // Stages
    pub use crate::stages::{
        AlignedStage, BandMathStage, BlockSourceStage, MeanFilterStage, PixelMapStage,
    };

    // Configuration
    pub use crate::config::{StrategyKind, StreamingConfig, StreamingMode};
}

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
