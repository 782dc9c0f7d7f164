//! Pipeline graph and the stage contract.
//!
//! This module provides:
//! - [`Stage`] and its capability traits
//! - The [`Pipeline`] graph with fan-in, fan-out and cycle rejection
//! - Per-node streaming state

pub mod graph;
pub mod stage;
pub mod state;

pub use graph::{NodeHandle, Pipeline, PipelineNode};
pub use stage::{
    neighborhood_request, DataGenerator, NeighborhoodRadius, OutputInformationProvider,
    RequestedRegionPropagator, Stage, StageInputs,
};
pub use state::{CacheValidity, NodeState};
