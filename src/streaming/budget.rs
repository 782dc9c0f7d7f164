//! Memory budgets and per-pixel footprint estimation.
//!
//! The division count for a RAM-driven run is
//! `ceil(area × footprint / (megabytes × 2^20 × bias))`, where the
//! footprint is bytes per sample × bands × the depth of the stage graph
//! (one live buffer per node on the longest path).

use crate::core::error::{ConfigurationError, PipelineError, PipelineResult};
use crate::pipeline::graph::{NodeHandle, Pipeline};
use log::warn;
use serde::Serialize;

/// Bytes assumed per pixel and node when a footprint is undeterminable
/// (4 bands of `f64`).
pub const FALLBACK_PIXEL_FOOTPRINT: u64 = 32;

const BYTES_PER_MEGABYTE: f64 = (1u64 << 20) as f64;

/// A memory ceiling plus a safety multiplier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MemoryBudget {
    megabytes: f64,
    bias: f64,
}

impl MemoryBudget {
    /// Create a budget. `megabytes` must be positive, `bias` in `(0, 1]`.
    pub fn new(megabytes: f64, bias: f64) -> Result<Self, ConfigurationError> {
        if !(megabytes.is_finite() && megabytes > 0.0) {
            return Err(ConfigurationError::NonPositiveBudget(megabytes));
        }
        if !(bias > 0.0 && bias <= 1.0) {
            return Err(ConfigurationError::InvalidBias(bias));
        }
        Ok(Self { megabytes, bias })
    }

    /// Ceiling in megabytes.
    pub fn megabytes(&self) -> f64 {
        self.megabytes
    }

    /// Safety multiplier.
    pub fn bias(&self) -> f64 {
        self.bias
    }

    /// Ceiling in bytes.
    pub fn bytes(&self) -> f64 {
        self.megabytes * BYTES_PER_MEGABYTE
    }

    /// Bytes actually allowed per division (`bytes × bias`).
    pub fn effective_bytes(&self) -> f64 {
        self.bytes() * self.bias
    }

    /// Divisions needed to keep `area` pixels of `footprint` bytes each
    /// under the effective budget. Never less than 1.
    pub fn divisions_for(&self, area: u64, footprint: u64) -> usize {
        let total = area as f64 * footprint as f64;
        ((total / self.effective_bytes()).ceil() as usize).max(1)
    }

    /// Largest pixel count of `footprint` bytes each that fits the
    /// effective budget. Never less than 1.
    pub fn max_division_pixels(&self, footprint: u64) -> u64 {
        ((self.effective_bytes() / footprint.max(1) as f64).floor() as u64).max(1)
    }
}

/// Estimated bytes held per output pixel while a division runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelFootprint {
    /// Bytes per pixel of the widest node (sample size × bands).
    pub bytes_per_pixel: u64,
    /// Graph-depth multiplier.
    pub depth: usize,
    /// Whether `bytes_per_pixel` is the fallback value.
    pub fallback: bool,
}

impl PixelFootprint {
    /// Total bytes per output pixel.
    pub fn per_pixel(&self) -> u64 {
        self.bytes_per_pixel * self.depth.max(1) as u64
    }
}

/// Estimates the per-pixel footprint of a pipeline.
#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineMemoryEstimator;

impl PipelineMemoryEstimator {
    /// Estimate the footprint of the subgraph ending at `terminal`.
    ///
    /// Output information must already be up to date. When any upstream
    /// node cannot report its bytes per pixel the estimate falls back to
    /// [`FALLBACK_PIXEL_FOOTPRINT`] and a warning is logged.
    pub fn estimate(&self, pipeline: &Pipeline, terminal: NodeHandle) -> PipelineResult<PixelFootprint> {
        let depth = pipeline.depth(terminal)?;
        let mut widest = Some(0u64);
        for handle in pipeline.upstream_of(terminal)? {
            let node = pipeline.node(handle)?;
            let info = node
                .state()
                .info
                .ok_or_else(|| PipelineError::MissingInformation {
                    node: node.node_ref(),
                })?;
            widest = match (widest, info.bytes_per_pixel()) {
                (Some(current), Some(bpp)) if bpp > 0 => Some(current.max(bpp)),
                _ => None,
            };
        }

        Ok(match widest {
            Some(bytes_per_pixel) if bytes_per_pixel > 0 => PixelFootprint {
                bytes_per_pixel,
                depth,
                fallback: false,
            },
            _ => {
                warn!(
                    "Pixel footprint undeterminable; assuming {} bytes per pixel per node over depth {}, memory use may exceed the budget",
                    FALLBACK_PIXEL_FOOTPRINT, depth
                );
                PixelFootprint {
                    bytes_per_pixel: FALLBACK_PIXEL_FOOTPRINT,
                    depth,
                    fallback: true,
                }
            }
        })
    }
}
