//! Execution module.
//!
//! This module pulls regions through a pipeline and streams them to sinks.

pub mod engine;
pub mod progress;
pub mod writer;

pub use engine::{DemandEngine, EngineOptions, ExecutionStats};
pub use progress::{CancellationToken, ProgressCallback, ProgressTracker, ProgressUpdate};
pub use writer::{FractionObserver, ProgressListener, RunReport, StreamingWriter, WriterOptions};
