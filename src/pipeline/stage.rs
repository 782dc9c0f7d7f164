//! Stage capability traits.
//!
//! A stage is described by three small capabilities instead of an
//! inheritance chain:
//! - [`OutputInformationProvider`]: what the stage can produce for the
//!   whole image
//! - [`RequestedRegionPropagator`]: which input region it needs for a given
//!   output region
//! - [`DataGenerator`]: how it fills (part of) its output buffer
//!
//! [`Stage`] ties them together with a name and an input arity.

use crate::core::buffer::{RasterBuffer, RasterTileMut};
use crate::core::error::{StageError, StageResult};
use crate::core::region::Region;
use crate::core::types::ImageInfo;

/// Declares the output information of a stage.
pub trait OutputInformationProvider {
    /// Compute output information from the information of the inputs
    /// (in slot order).
    fn output_information(&self, inputs: &[ImageInfo]) -> StageResult<ImageInfo>;
}

/// Maps an output request to input requests.
pub trait RequestedRegionPropagator {
    /// Input region needed on slot `input` to produce `output_requested`.
    ///
    /// The default is the identity clipped to the input extent, right for
    /// any pixel-wise stage. Stages reading a neighbourhood must go through
    /// [`neighborhood_request`].
    fn input_requested_region(
        &self,
        input: usize,
        output_requested: &Region,
        input_info: &ImageInfo,
    ) -> StageResult<Region> {
        let _ = input;
        Ok(output_requested.clipped_to(&input_info.extent))
    }

    /// Region actually allocated and generated for `requested`.
    ///
    /// May exceed the request (alignment rounding) but must stay inside the
    /// stage's own extent.
    fn buffered_region(&self, requested: &Region, info: &ImageInfo) -> Region {
        let _ = info;
        *requested
    }
}

/// Produces output samples.
pub trait DataGenerator {
    /// Fill `output` from `inputs`.
    ///
    /// `output` is either the whole buffered region or, for threaded stages,
    /// a band of rows of it; the same stage may be invoked concurrently on
    /// disjoint tiles.
    fn generate(&self, inputs: &StageInputs<'_>, output: &mut RasterTileMut<'_>) -> StageResult<()>;

    /// Whether `generate` may be split across the worker pool.
    fn supports_threading(&self) -> bool {
        true
    }
}

/// A pipeline stage.
pub trait Stage:
    OutputInformationProvider + RequestedRegionPropagator + DataGenerator + Send + Sync
{
    /// Stage name used in logs and errors.
    fn name(&self) -> &str;

    /// Number of input slots (0 for sources).
    fn input_count(&self) -> usize;
}

/// Input buffers and descriptors handed to [`DataGenerator::generate`].
#[derive(Debug, Clone, Copy)]
pub struct StageInputs<'a> {
    buffers: &'a [&'a RasterBuffer],
    infos: &'a [ImageInfo],
}

impl<'a> StageInputs<'a> {
    /// Bundle input buffers with their output information.
    pub fn new(buffers: &'a [&'a RasterBuffer], infos: &'a [ImageInfo]) -> Self {
        Self { buffers, infos }
    }

    /// No inputs (sources).
    pub fn none() -> StageInputs<'static> {
        StageInputs {
            buffers: &[],
            infos: &[],
        }
    }

    /// Number of inputs.
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    /// Whether there are no inputs.
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Buffered data of input `index`.
    pub fn buffer(&self, index: usize) -> StageResult<&'a RasterBuffer> {
        self.buffers
            .get(index)
            .copied()
            .ok_or(StageError::MissingInput(index))
    }

    /// Output information of input `index`.
    pub fn info(&self, index: usize) -> StageResult<&'a ImageInfo> {
        self.infos.get(index).ok_or(StageError::MissingInput(index))
    }

    /// All input buffers.
    pub fn buffers(&self) -> &'a [&'a RasterBuffer] {
        self.buffers
    }
}

/// Neighbourhood radius of a stage, per axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NeighborhoodRadius {
    /// Columns needed on each side.
    pub x: u64,
    /// Rows needed on each side.
    pub y: u64,
}

impl NeighborhoodRadius {
    /// Same radius on both axes.
    pub fn symmetric(radius: u64) -> Self {
        Self {
            x: radius,
            y: radius,
        }
    }

    /// Different radius per axis.
    pub fn new(x: u64, y: u64) -> Self {
        Self { x, y }
    }

    /// Component-wise maximum, for stages combining several kernels.
    pub fn combine(&self, other: &NeighborhoodRadius) -> NeighborhoodRadius {
        NeighborhoodRadius {
            x: self.x.max(other.x),
            y: self.y.max(other.y),
        }
    }
}

/// Input region for a neighbourhood stage: `output` dilated by `radius`,
/// then clipped to the extent the input can provide.
///
/// Every neighbourhood stage computes its request through this helper so
/// that padding cannot be forgotten on one side.
pub fn neighborhood_request(
    output: &Region,
    radius: NeighborhoodRadius,
    available: &Region,
) -> Region {
    if output.is_empty() {
        return output.clipped_to(available);
    }
    output.pad_xy(radius.x, radius.y).clipped_to(available)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_neighborhood_request_pads_then_clips() {
        let extent = Region::from_size(100, 100);
        let strip = Region::new(0, 20, 100, 20);
        assert_eq!(
            neighborhood_request(&strip, NeighborhoodRadius::symmetric(1), &extent),
            Region::new(0, 19, 100, 22)
        );
        let top = Region::new(0, 0, 100, 20);
        assert_eq!(
            neighborhood_request(&top, NeighborhoodRadius::new(2, 3), &extent),
            Region::new(0, 0, 100, 23)
        );
    }

    #[test]
    fn test_radius_combine() {
        let a = NeighborhoodRadius::new(1, 4);
        let b = NeighborhoodRadius::new(3, 2);
        assert_eq!(a.combine(&b), NeighborhoodRadius::new(3, 4));
    }

    #[test]
    fn test_stage_inputs_missing_slot() {
        let inputs = StageInputs::none();
        assert!(inputs.is_empty());
        assert!(matches!(inputs.buffer(0), Err(StageError::MissingInput(0))));
    }
}
