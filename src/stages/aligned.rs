//! Stage whose output is rounded up to an alignment grid.
//!
//! Mimics a codec-backed stage that can only produce whole on-disk tiles:
//! its buffered region exceeds what was requested, and consumers (or the
//! writer) must extract exactly the region they asked for.

use crate::core::buffer::RasterTileMut;
use crate::core::error::{StageError, StageResult};
use crate::core::region::Region;
use crate::core::types::ImageInfo;
use crate::pipeline::stage::{
    DataGenerator, OutputInformationProvider, RequestedRegionPropagator, Stage, StageInputs,
};

/// Pass-through stage generating whole `alignment`-sized tiles.
#[derive(Debug, Clone, Copy)]
pub struct AlignedStage {
    alignment: u64,
}

impl AlignedStage {
    /// Create a stage rounding to `alignment` pixels.
    pub fn new(alignment: u64) -> Self {
        Self {
            alignment: alignment.max(1),
        }
    }

    /// Grid size in pixels.
    pub fn alignment(&self) -> u64 {
        self.alignment
    }

    fn aligned(&self, region: &Region, extent: &Region) -> Region {
        region.align_outward(self.alignment).clipped_to(extent)
    }
}

impl OutputInformationProvider for AlignedStage {
    fn output_information(&self, inputs: &[ImageInfo]) -> StageResult<ImageInfo> {
        inputs.first().copied().ok_or(StageError::MissingInput(0))
    }
}

impl RequestedRegionPropagator for AlignedStage {
    fn input_requested_region(
        &self,
        _input: usize,
        output_requested: &Region,
        input_info: &ImageInfo,
    ) -> StageResult<Region> {
        Ok(self.aligned(output_requested, &input_info.extent))
    }

    fn buffered_region(&self, requested: &Region, info: &ImageInfo) -> Region {
        self.aligned(requested, &info.extent)
    }
}

impl DataGenerator for AlignedStage {
    fn generate(&self, inputs: &StageInputs<'_>, output: &mut RasterTileMut<'_>) -> StageResult<()> {
        output.copy_from(inputs.buffer(0)?)?;
        Ok(())
    }
}

impl Stage for AlignedStage {
    fn name(&self) -> &str {
        "aligned"
    }

    fn input_count(&self) -> usize {
        1
    }
}
