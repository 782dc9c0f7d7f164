//! Block I/O at the codec boundary.
//!
//! Sources and sinks exchange whole blocks with the engine; nothing in this
//! module knows about the pipeline.

pub mod block;
pub mod file;
pub mod registry;

pub use block::{BlockSink, BlockSource, MemoryBlockSink, MemoryBlockSource, PatternSource};
pub use file::{AtomicFileSink, RawFileSink, RawFileSource};
pub use registry::CodecRegistry;
