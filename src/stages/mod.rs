//! Built-in stages.
//!
//! Numerical algorithms are not this crate's concern; these stages cover
//! the region contracts a stage can have (leaf, pixel-wise, neighbourhood,
//! aligned) and are what the demo binary and tests build pipelines from.

pub mod aligned;
pub mod neighborhood;
pub mod pointwise;
pub mod source;

pub use aligned::AlignedStage;
pub use neighborhood::MeanFilterStage;
pub use pointwise::{BandMathStage, PixelMapStage};
pub use source::BlockSourceStage;
