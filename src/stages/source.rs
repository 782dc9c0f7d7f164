//! Leaf stage reading from a block source.

use crate::core::buffer::RasterTileMut;
use crate::core::error::StageResult;
use crate::core::types::ImageInfo;
use crate::io::block::BlockSource;
use crate::pipeline::stage::{
    DataGenerator, OutputInformationProvider, RequestedRegionPropagator, Stage, StageInputs,
};
use std::sync::Arc;

/// Pipeline leaf fetching exactly its buffered region from a [`BlockSource`].
pub struct BlockSourceStage {
    source: Arc<dyn BlockSource>,
}

impl BlockSourceStage {
    /// Wrap a source.
    pub fn new(source: Arc<dyn BlockSource>) -> Self {
        Self { source }
    }

    /// The wrapped source.
    pub fn source(&self) -> &Arc<dyn BlockSource> {
        &self.source
    }
}

impl OutputInformationProvider for BlockSourceStage {
    fn output_information(&self, _inputs: &[ImageInfo]) -> StageResult<ImageInfo> {
        Ok(self.source.info())
    }
}

impl RequestedRegionPropagator for BlockSourceStage {}

impl DataGenerator for BlockSourceStage {
    fn generate(&self, _inputs: &StageInputs<'_>, output: &mut RasterTileMut<'_>) -> StageResult<()> {
        let block = self.source.read_block(&output.region())?;
        output.copy_from(&block)?;
        Ok(())
    }

    // One read per division keeps source access sequential.
    fn supports_threading(&self) -> bool {
        false
    }
}

impl Stage for BlockSourceStage {
    fn name(&self) -> &str {
        self.source.name()
    }

    fn input_count(&self) -> usize {
        0
    }
}
