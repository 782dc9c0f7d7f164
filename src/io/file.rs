//! Raw raster files.
//!
//! The raw layout has no header: samples are little-endian `f32`,
//! pixel-interleaved, row-major over the whole extent. Blocks are written
//! row by row at their absolute offset, so divisions may arrive in any
//! order.

use crate::core::buffer::RasterBuffer;
use crate::core::error::{BufferError, IoError, IoResult};
use crate::core::region::Region;
use crate::core::types::{ImageInfo, SampleType};
use crate::io::block::{check_in_extent, BlockSink, BlockSource};
use log::{debug, warn};
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

const SAMPLE_BYTES: u64 = 4;

fn file_error(path: &Path, source: std::io::Error) -> IoError {
    IoError::File {
        path: path.to_path_buf(),
        source,
    }
}

/// Byte offset of pixel `(x, y)` inside a raw file covering `extent`.
fn byte_offset(extent: &Region, bands: usize, x: i64, y: i64) -> u64 {
    let row = (y - extent.y) as u64;
    let col = (x - extent.x) as u64;
    (row * extent.width + col) * bands as u64 * SAMPLE_BYTES
}

// ============================================================================
// Sink
// ============================================================================

/// Writes blocks into a raw `f32` file at `path`.
#[derive(Debug)]
pub struct RawFileSink {
    path: PathBuf,
    file: Option<File>,
    info: Option<ImageInfo>,
    row_bytes: Vec<u8>,
}

impl RawFileSink {
    /// Create a sink for `path`. Nothing is opened until `initialize`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: None,
            info: None,
            row_bytes: Vec::new(),
        }
    }

    /// Destination path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn close(&mut self) {
        self.file = None;
        self.info = None;
    }
}

impl BlockSink for RawFileSink {
    fn initialize(&mut self, info: &ImageInfo) -> IoResult<()> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)
            .map_err(|e| file_error(&self.path, e))?;
        let len = info.extent.area() * info.bands as u64 * SAMPLE_BYTES;
        file.set_len(len).map_err(|e| file_error(&self.path, e))?;
        debug!(
            "Raw sink {} sized to {} bytes for {}",
            self.path.display(),
            len,
            info.extent
        );
        self.file = Some(file);
        self.info = Some(*info);
        Ok(())
    }

    fn write_block(&mut self, region: &Region, data: &RasterBuffer) -> IoResult<()> {
        let info = self.info.ok_or(IoError::NotInitialized)?;
        let file = self.file.as_mut().ok_or(IoError::NotInitialized)?;
        check_in_extent(region, &info.extent)?;
        if !data.region().contains(region) {
            return Err(IoError::Buffer(BufferError::NotCovered {
                requested: *region,
                buffered: data.region(),
            }));
        }

        let samples_per_row = region.width as usize * data.bands();
        for y in region.y..region.bottom() {
            let row = data
                .row(y)
                .ok_or_else(|| IoError::Other(format!("row {} missing from block", y)))?;
            let start = (region.x - data.region().x) as usize * data.bands();
            self.row_bytes.clear();
            for &sample in &row[start..start + samples_per_row] {
                self.row_bytes.extend_from_slice(&(sample as f32).to_le_bytes());
            }
            let offset = byte_offset(&info.extent, info.bands, region.x, y);
            file.seek(SeekFrom::Start(offset))
                .and_then(|_| file.write_all(&self.row_bytes))
                .map_err(|source| IoError::Write {
                    region: *region,
                    source,
                })?;
        }
        Ok(())
    }

    fn finalize(&mut self) -> IoResult<()> {
        let file = self.file.as_mut().ok_or(IoError::NotInitialized)?;
        file.flush().map_err(|e| file_error(&self.path, e))?;
        file.sync_all().map_err(|e| file_error(&self.path, e))?;
        self.close();
        Ok(())
    }

    fn abort(&mut self) {
        self.close();
    }
}

// ============================================================================
// Atomic sink
// ============================================================================

/// Raw sink that stages output in a sibling temporary file and renames it
/// into place on `finalize`.
///
/// On `abort` the temporary file is removed and any previous file at the
/// destination is left untouched.
#[derive(Debug)]
pub struct AtomicFileSink {
    destination: PathBuf,
    staging: RawFileSink,
}

impl AtomicFileSink {
    /// Create a sink publishing to `destination`.
    pub fn new(destination: impl Into<PathBuf>) -> Self {
        let destination = destination.into();
        let staging = RawFileSink::new(staging_path(&destination));
        Self {
            destination,
            staging,
        }
    }

    /// Final path.
    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Temporary path written during the run.
    pub fn staging_path(&self) -> &Path {
        self.staging.path()
    }
}

fn staging_path(destination: &Path) -> PathBuf {
    let name = destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    let tag = Uuid::new_v4().simple().to_string();
    destination.with_file_name(format!(".{}.{}.partial", name, &tag[..8]))
}

impl BlockSink for AtomicFileSink {
    fn initialize(&mut self, info: &ImageInfo) -> IoResult<()> {
        self.staging.initialize(info)
    }

    fn write_block(&mut self, region: &Region, data: &RasterBuffer) -> IoResult<()> {
        self.staging.write_block(region, data)
    }

    fn finalize(&mut self) -> IoResult<()> {
        self.staging.finalize()?;
        fs::rename(self.staging.path(), &self.destination)
            .map_err(|e| file_error(&self.destination, e))?;
        debug!("Published {}", self.destination.display());
        Ok(())
    }

    fn abort(&mut self) {
        self.staging.abort();
        let path = self.staging.path();
        if path.exists() {
            if let Err(e) = fs::remove_file(path) {
                warn!("Could not remove staging file {}: {}", path.display(), e);
            }
        }
    }
}

// ============================================================================
// Source
// ============================================================================

/// Reads blocks from a raw `f32` file of known geometry.
#[derive(Debug)]
pub struct RawFileSource {
    path: PathBuf,
    info: ImageInfo,
    file: Mutex<File>,
}

impl RawFileSource {
    /// Open a raw file holding `bands` bands over `extent`.
    pub fn open(path: impl Into<PathBuf>, extent: Region, bands: usize) -> IoResult<Self> {
        let path = path.into();
        let file = File::open(&path).map_err(|e| file_error(&path, e))?;
        let expected = extent.area() * bands as u64 * SAMPLE_BYTES;
        let actual = file
            .metadata()
            .map_err(|e| file_error(&path, e))?
            .len();
        if actual < expected {
            return Err(IoError::Other(format!(
                "{} holds {} bytes, {} expected for {} with {} bands",
                path.display(),
                actual,
                expected,
                extent,
                bands
            )));
        }
        Ok(Self {
            path,
            info: ImageInfo::new(extent, bands, SampleType::F32),
            file: Mutex::new(file),
        })
    }

    /// Source path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl BlockSource for RawFileSource {
    fn info(&self) -> ImageInfo {
        self.info
    }

    fn read_block(&self, region: &Region) -> IoResult<RasterBuffer> {
        check_in_extent(region, &self.info.extent)?;
        let bands = self.info.bands;
        let mut bytes = vec![0u8; region.width as usize * bands * SAMPLE_BYTES as usize];
        let mut data = Vec::with_capacity(region.area() as usize * bands);

        let mut file = self.file.lock();
        for y in region.y..region.bottom() {
            let offset = byte_offset(&self.info.extent, bands, region.x, y);
            file.seek(SeekFrom::Start(offset))
                .and_then(|_| file.read_exact(&mut bytes))
                .map_err(|source| IoError::Read {
                    region: *region,
                    source,
                })?;
            data.extend(
                bytes
                    .chunks_exact(SAMPLE_BYTES as usize)
                    .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]) as f64),
            );
        }
        Ok(RasterBuffer::from_vec(*region, bands, data)?)
    }

    fn name(&self) -> &str {
        "raw-file"
    }
}
