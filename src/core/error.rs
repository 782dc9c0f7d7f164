//! Error types for RasterFlow.
//!
//! Uses thiserror for structured errors with context. Every error raised
//! while streaming carries enough information (division index, region
//! bounds, node identity) to reproduce the failure.

use crate::core::region::Region;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

/// Unique identifier for a node in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub Uuid);

impl NodeId {
    /// Create a new random node ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// Identity of a pipeline node as reported in errors: stable id plus the
/// stage name it was built from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeRef {
    /// Node identifier.
    pub id: NodeId,
    /// Stage name (or user label).
    pub name: String,
}

impl NodeRef {
    /// Create a new node reference.
    pub fn new(id: NodeId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' ({})", self.name, self.id)
    }
}

/// Top-level error type for RasterFlow.
///
/// This enum encompasses all error categories and enables automatic
/// conversion between specific error types.
#[derive(Error, Debug)]
pub enum RasterFlowError {
    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    /// Malformed pipeline graph.
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    /// Propagation or execution failure.
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// Block transfer failure.
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// Aborted streamed run.
    #[error("Run aborted: {0}")]
    Run(#[from] RunError),

    /// Report or configuration serialization failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Invalid streaming or engine configuration.
///
/// Reported before any division runs.
#[derive(Error, Debug)]
pub enum ConfigurationError {
    /// Memory budget is zero, negative or not finite.
    #[error("memory budget must be positive, got {0} MB")]
    NonPositiveBudget(f64),

    /// Bias outside `(0, 1]`.
    #[error("bias must lie in (0, 1], got {0}")]
    InvalidBias(f64),

    /// A count or size that must be positive.
    #[error("{parameter} must be positive, got {value}")]
    NonPositive {
        /// Parameter name.
        parameter: &'static str,
        /// Offending value.
        value: f64,
    },

    /// A count or size given with a fractional part.
    #[error("{parameter} is not an integer: {value}")]
    NotAnInteger {
        /// Parameter name.
        parameter: &'static str,
        /// Offending value.
        value: f64,
    },

    /// A manager that cannot split with the chosen strategy.
    #[error("streaming strategy '{strategy}' is not supported by {manager}")]
    UnsupportedStrategy {
        /// Manager name.
        manager: &'static str,
        /// Strategy name.
        strategy: String,
    },

    /// Division index past the prepared count.
    #[error("division {index} requested but only {total} divisions were prepared")]
    DivisionOutOfRange {
        /// Requested index.
        index: usize,
        /// Prepared division count.
        total: usize,
    },

    /// No sink factory for the format or extension.
    #[error("no codec registered for format '{0}'")]
    UnknownFormat(String),

    /// Worker pool construction failed.
    #[error("failed to build worker pool: {0}")]
    ThreadPool(String),

    /// Configuration file could not be read.
    #[error("failed to read configuration {path}: {source}")]
    Read {
        /// File path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Configuration file is not valid TOML for [`crate::config::StreamingConfig`].
    #[error("malformed configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Errors related to pipeline graph structure.
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum GraphError {
    /// No node with this index.
    #[error("Node {0} not found")]
    NodeNotFound(usize),

    /// The graph contains a cycle through this node.
    #[error("Cycle detected in pipeline at node {0}")]
    CycleDetected(usize),

    /// Adding the edge would close a cycle.
    #[error("Connecting node {from} to node {to} would create a cycle")]
    WouldCreateCycle {
        /// Producer node index.
        from: usize,
        /// Consumer node index.
        to: usize,
    },

    /// Input slot beyond the stage's arity.
    #[error("Stage '{stage}' has {arity} inputs, slot {slot} is invalid")]
    InvalidSlot {
        /// Stage name.
        stage: String,
        /// Requested slot.
        slot: usize,
        /// Number of inputs the stage takes.
        arity: usize,
    },

    /// Input slot already fed by another node.
    #[error("Input slot {slot} of stage '{stage}' is already connected")]
    SlotAlreadyConnected {
        /// Stage name.
        stage: String,
        /// Occupied slot.
        slot: usize,
    },

    /// Input slot left unconnected.
    #[error("Input slot {slot} of stage '{stage}' is not connected")]
    MissingInput {
        /// Stage name.
        stage: String,
        /// Empty slot.
        slot: usize,
    },

    /// Wrong number of inputs supplied when adding a stage.
    #[error("Stage '{stage}' expects {expected} inputs, got {got}")]
    ArityMismatch {
        /// Stage name.
        stage: String,
        /// Inputs the stage takes.
        expected: usize,
        /// Inputs supplied.
        got: usize,
    },
}

/// Errors raised by a raster buffer operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BufferError {
    /// Sample vector length does not match region × bands.
    #[error("buffer for {region} with {bands} bands needs {expected} samples, got {got}")]
    SizeMismatch {
        /// Buffer region.
        region: Region,
        /// Band count.
        bands: usize,
        /// Samples needed.
        expected: usize,
        /// Samples supplied.
        got: usize,
    },

    /// Region not held by the buffer.
    #[error("region {requested} is not covered by buffered region {buffered}")]
    NotCovered {
        /// Region asked for.
        requested: Region,
        /// Region held.
        buffered: Region,
    },

    /// Band counts of two buffers differ.
    #[error("band count mismatch: expected {expected}, got {got}")]
    BandMismatch {
        /// Band count of the destination.
        expected: usize,
        /// Band count of the source.
        got: usize,
    },
}

/// Block transfer failure at the codec boundary.
#[derive(Error, Debug)]
pub enum IoError {
    /// Reading a block failed.
    #[error("failed to read block {region}: {source}")]
    Read {
        /// Block being read.
        region: Region,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Writing a block failed.
    #[error("failed to write block {region}: {source}")]
    Write {
        /// Block being written.
        region: Region,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Block outside the raster.
    #[error("block {region} lies outside raster extent {extent}")]
    OutOfExtent {
        /// Offending block.
        region: Region,
        /// Raster extent.
        extent: Region,
    },

    /// Opening, renaming or removing a file failed.
    #[error("{path}: {source}")]
    File {
        /// File path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Sink written to before `initialize`.
    #[error("sink used before initialization")]
    NotInitialized,

    /// Buffer shape error during transfer.
    #[error(transparent)]
    Buffer(#[from] BufferError),

    /// Any other codec failure.
    #[error("{0}")]
    Other(String),
}

/// Failure reported by a stage implementation.
#[derive(Error, Debug)]
pub enum StageError {
    /// Input slot without a buffer.
    #[error("input {0} is missing")]
    MissingInput(usize),

    /// Inputs whose information cannot be combined.
    #[error("incompatible inputs: {0}")]
    IncompatibleInputs(String),

    /// Source read failure.
    #[error(transparent)]
    Io(#[from] IoError),

    /// Buffer shape error.
    #[error(transparent)]
    Buffer(#[from] BufferError),

    /// Any other stage failure.
    #[error("{0}")]
    Other(String),
}

/// Errors from demand propagation and execution of a pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Graph structure error.
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// A stage asked its input for pixels outside that input's extent.
    #[error("node {node} requested {requested} outside available extent {available}")]
    BoundaryComputation {
        /// Node whose request escaped.
        node: NodeRef,
        /// Request after propagation.
        requested: Region,
        /// Extent of the input.
        available: Region,
    },

    /// A node's buffer does not cover what its consumer needs.
    #[error("node {node} buffered {buffered} which does not cover requested {requested}")]
    BufferUnderrun {
        /// Node holding the buffer.
        node: NodeRef,
        /// Region needed.
        requested: Region,
        /// Region buffered.
        buffered: Region,
    },

    /// Output information was never computed.
    #[error("node {node} has no output information; update it first")]
    MissingInformation {
        /// Node lacking information.
        node: NodeRef,
    },

    /// No requested region was propagated to the node.
    #[error("node {node} has no requested region for this pass")]
    MissingRequest {
        /// Node lacking a request.
        node: NodeRef,
    },

    /// A stage could not report its output information.
    #[error("node {node} could not report its output information: {source}")]
    OutputInformation {
        /// Failing node.
        node: NodeRef,
        /// Stage error.
        #[source]
        source: StageError,
    },

    /// A stage failed to generate data.
    #[error("node {node} failed on {region}: {source}")]
    Stage {
        /// Failing node.
        node: NodeRef,
        /// Region being generated.
        region: Region,
        /// Stage error.
        #[source]
        source: StageError,
    },

    /// A source failed to read.
    #[error("node {node} could not transfer {region}: {source}")]
    Io {
        /// Failing node.
        node: NodeRef,
        /// Region being read.
        region: Region,
        /// Codec error.
        #[source]
        source: IoError,
    },

    /// Buffer shape error while assembling a result.
    #[error(transparent)]
    Buffer(#[from] BufferError),
}

impl PipelineError {
    /// Node that originated this error, if any.
    pub fn node(&self) -> Option<&NodeRef> {
        match self {
            PipelineError::BoundaryComputation { node, .. }
            | PipelineError::BufferUnderrun { node, .. }
            | PipelineError::MissingInformation { node }
            | PipelineError::MissingRequest { node }
            | PipelineError::OutputInformation { node, .. }
            | PipelineError::Stage { node, .. }
            | PipelineError::Io { node, .. } => Some(node),
            PipelineError::Graph(_) | PipelineError::Buffer(_) => None,
        }
    }

    /// Whether this error indicates a stage failing to pad or clip its
    /// request (a stage bug rather than a data problem).
    pub fn is_boundary_error(&self) -> bool {
        matches!(
            self,
            PipelineError::BoundaryComputation { .. } | PipelineError::BufferUnderrun { .. }
        )
    }

    /// Wrap a stage failure with the node and region it happened on.
    pub(crate) fn from_stage(node: NodeRef, region: Region, error: StageError) -> Self {
        match error {
            StageError::Io(source) => PipelineError::Io {
                node,
                region,
                source,
            },
            source => PipelineError::Stage {
                node,
                region,
                source,
            },
        }
    }
}

/// Cause of a failed streaming division.
#[derive(Error, Debug)]
pub enum DivisionFailure {
    /// Propagation or execution failed.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// The sink rejected the block.
    #[error(transparent)]
    Io(#[from] IoError),
}

/// Abort of a streamed run.
///
/// Already-written blocks are not rolled back.
#[derive(Error, Debug)]
pub enum RunError {
    /// Invalid manager or writer configuration.
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    /// Output information or manager preparation failed.
    #[error("pipeline setup failed: {0}")]
    Setup(#[source] PipelineError),

    /// Sink initialization or finalization failed.
    #[error("sink failure: {0}")]
    Sink(#[source] IoError),

    /// A division failed.
    #[error("division {index} ({region}) failed{}: {source}", node_suffix(.node))]
    Division {
        /// Division index.
        index: usize,
        /// Division bounds.
        region: Region,
        /// Node the failure originated in.
        node: Option<NodeRef>,
        /// Cause.
        #[source]
        source: DivisionFailure,
    },

    /// Cancellation observed between divisions.
    #[error("run cancelled after {completed}/{total} divisions")]
    Cancelled {
        /// Divisions written.
        completed: usize,
        /// Divisions planned.
        total: usize,
    },
}

fn node_suffix(node: &Option<NodeRef>) -> String {
    match node {
        Some(node) => format!(" at node {}", node),
        None => String::new(),
    }
}

impl RunError {
    /// Index of the failing division, if the failure happened mid-run.
    pub fn division_index(&self) -> Option<usize> {
        match self {
            RunError::Division { index, .. } => Some(*index),
            _ => None,
        }
    }

    /// Region of the failing division.
    pub fn region(&self) -> Option<Region> {
        match self {
            RunError::Division { region, .. } => Some(*region),
            _ => None,
        }
    }

    /// Node the failure originated in.
    pub fn node(&self) -> Option<&NodeRef> {
        match self {
            RunError::Division { node, .. } => node.as_ref(),
            RunError::Setup(error) => error.node(),
            _ => None,
        }
    }
}

/// Result type alias for graph operations.
pub type GraphResult<T> = Result<T, GraphError>;

/// Result type alias for propagation and execution.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Result type alias for stage implementations.
pub type StageResult<T> = Result<T, StageError>;

/// Result type alias for block transfer.
pub type IoResult<T> = Result<T, IoError>;
