//! Block-level source and sink contracts.
//!
//! Sources provide output information and read arbitrary blocks; sinks
//! accept blocks in division order. The streaming writer is the only
//! caller of a sink during a run:
//! `initialize` → `write_block`* → `finalize`, or `abort` on failure.

use crate::core::buffer::RasterBuffer;
use crate::core::error::{IoError, IoResult};
use crate::core::region::Region;
use crate::core::types::{ImageInfo, SampleType};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Raster data that can be read block by block.
pub trait BlockSource: Send + Sync {
    /// Whole-image information.
    fn info(&self) -> ImageInfo;

    /// Read exactly `region`, which must lie inside the extent.
    fn read_block(&self, region: &Region) -> IoResult<RasterBuffer>;

    /// Human-readable name for logs.
    fn name(&self) -> &str {
        "source"
    }
}

/// Destination receiving blocks in division order.
pub trait BlockSink: Send {
    /// Prepare for a raster described by `info`.
    fn initialize(&mut self, info: &ImageInfo) -> IoResult<()>;

    /// Write one block; `data` covers exactly `region`.
    fn write_block(&mut self, region: &Region, data: &RasterBuffer) -> IoResult<()>;

    /// Flush and close. Called once after the last block.
    fn finalize(&mut self) -> IoResult<()>;

    /// Called instead of `finalize` when a run fails or is cancelled.
    ///
    /// Blocks already written stay written unless the sink stages its
    /// output somewhere it can discard.
    fn abort(&mut self) {}
}

pub(crate) fn check_in_extent(region: &Region, extent: &Region) -> IoResult<()> {
    if extent.contains(region) {
        Ok(())
    } else {
        Err(IoError::OutOfExtent {
            region: *region,
            extent: *extent,
        })
    }
}

// ============================================================================
// In-memory source
// ============================================================================

/// Source backed by a buffer held in memory.
#[derive(Debug)]
pub struct MemoryBlockSource {
    buffer: RasterBuffer,
    sample_type: SampleType,
    reads: AtomicUsize,
}

impl MemoryBlockSource {
    /// Wrap a buffer; its region becomes the extent.
    pub fn new(buffer: RasterBuffer) -> Self {
        Self {
            buffer,
            sample_type: SampleType::F32,
            reads: AtomicUsize::new(0),
        }
    }

    /// Declare the on-disk sample type used for memory estimation.
    pub fn with_sample_type(mut self, sample_type: SampleType) -> Self {
        self.sample_type = sample_type;
        self
    }

    /// Number of `read_block` calls served so far.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }
}

impl BlockSource for MemoryBlockSource {
    fn info(&self) -> ImageInfo {
        ImageInfo::new(self.buffer.region(), self.buffer.bands(), self.sample_type)
    }

    fn read_block(&self, region: &Region) -> IoResult<RasterBuffer> {
        check_in_extent(region, &self.buffer.region())?;
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(self.buffer.extract(region)?)
    }

    fn name(&self) -> &str {
        "memory"
    }
}

// ============================================================================
// Synthetic source
// ============================================================================

/// Sample generator `f(x, y, band)`.
pub type PatternFn = Arc<dyn Fn(i64, i64, usize) -> f64 + Send + Sync>;

/// Source computing every sample from a function; never holds the image.
///
/// Used for synthetic inputs far larger than memory.
#[derive(Clone)]
pub struct PatternSource {
    info: ImageInfo,
    pattern: PatternFn,
    reads: Arc<AtomicUsize>,
}

impl fmt::Debug for PatternSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PatternSource")
            .field("info", &self.info)
            .field("reads", &self.reads)
            .finish()
    }
}

impl PatternSource {
    /// Create a source over `info.extent`.
    pub fn new<F>(info: ImageInfo, pattern: F) -> Self
    where
        F: Fn(i64, i64, usize) -> f64 + Send + Sync + 'static,
    {
        Self {
            info,
            pattern: Arc::new(pattern),
            reads: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Gradient `x + width * y` over a single band.
    pub fn gradient(width: u64, height: u64) -> Self {
        let info = ImageInfo::new(Region::from_size(width, height), 1, SampleType::F32);
        Self::new(info, move |x, y, _| (x + y * width as i64) as f64)
    }

    /// Number of `read_block` calls served so far.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }
}

impl BlockSource for PatternSource {
    fn info(&self) -> ImageInfo {
        self.info
    }

    fn read_block(&self, region: &Region) -> IoResult<RasterBuffer> {
        check_in_extent(region, &self.info.extent)?;
        self.reads.fetch_add(1, Ordering::Relaxed);
        let pattern = &self.pattern;
        Ok(RasterBuffer::from_fn(*region, self.info.bands, |x, y, b| {
            pattern(x, y, b)
        }))
    }

    fn name(&self) -> &str {
        "pattern"
    }
}

// ============================================================================
// In-memory sink
// ============================================================================

/// Sink assembling the whole output in memory and recording write order.
#[derive(Debug, Default)]
pub struct MemoryBlockSink {
    output: Option<RasterBuffer>,
    writes: Vec<Region>,
    finalized: bool,
    aborted: bool,
}

impl MemoryBlockSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Assembled output, available after `initialize`.
    pub fn buffer(&self) -> Option<&RasterBuffer> {
        self.output.as_ref()
    }

    /// Take the assembled output.
    pub fn into_buffer(self) -> Option<RasterBuffer> {
        self.output
    }

    /// Regions received, in arrival order.
    pub fn writes(&self) -> &[Region] {
        &self.writes
    }

    /// Whether `finalize` ran.
    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Whether `abort` ran.
    pub fn is_aborted(&self) -> bool {
        self.aborted
    }
}

impl BlockSink for MemoryBlockSink {
    fn initialize(&mut self, info: &ImageInfo) -> IoResult<()> {
        self.output = Some(RasterBuffer::new(info.extent, info.bands));
        self.writes.clear();
        self.finalized = false;
        self.aborted = false;
        Ok(())
    }

    fn write_block(&mut self, region: &Region, data: &RasterBuffer) -> IoResult<()> {
        let output = self.output.as_mut().ok_or(IoError::NotInitialized)?;
        check_in_extent(region, &output.region())?;
        let block = data.extract(region)?;
        output.paste(&block)?;
        self.writes.push(*region);
        Ok(())
    }

    fn finalize(&mut self) -> IoResult<()> {
        self.output.as_ref().ok_or(IoError::NotInitialized)?;
        self.finalized = true;
        Ok(())
    }

    fn abort(&mut self) {
        self.aborted = true;
    }
}
