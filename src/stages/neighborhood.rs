//! Neighbourhood stages.

use crate::core::buffer::RasterTileMut;
use crate::core::error::{StageError, StageResult};
use crate::core::region::Region;
use crate::core::types::ImageInfo;
use crate::pipeline::stage::{
    neighborhood_request, DataGenerator, NeighborhoodRadius, OutputInformationProvider,
    RequestedRegionPropagator, Stage, StageInputs,
};

/// Box mean over a `(2rx+1) × (2ry+1)` window.
///
/// At the raster edge the window shrinks to the part inside the extent, so
/// the result never depends on where divisions fall. Samples are summed in
/// row-major window order.
#[derive(Debug, Clone, Copy)]
pub struct MeanFilterStage {
    radius: NeighborhoodRadius,
}

impl MeanFilterStage {
    /// Square window of the given radius.
    pub fn new(radius: u64) -> Self {
        Self {
            radius: NeighborhoodRadius::symmetric(radius),
        }
    }

    /// Rectangular window.
    pub fn with_radius(radius: NeighborhoodRadius) -> Self {
        Self { radius }
    }

    /// Window radius.
    pub fn radius(&self) -> NeighborhoodRadius {
        self.radius
    }
}

impl OutputInformationProvider for MeanFilterStage {
    fn output_information(&self, inputs: &[ImageInfo]) -> StageResult<ImageInfo> {
        inputs.first().copied().ok_or(StageError::MissingInput(0))
    }
}

impl RequestedRegionPropagator for MeanFilterStage {
    fn input_requested_region(
        &self,
        _input: usize,
        output_requested: &Region,
        input_info: &ImageInfo,
    ) -> StageResult<Region> {
        Ok(neighborhood_request(
            output_requested,
            self.radius,
            &input_info.extent,
        ))
    }
}

impl DataGenerator for MeanFilterStage {
    fn generate(&self, inputs: &StageInputs<'_>, output: &mut RasterTileMut<'_>) -> StageResult<()> {
        let input = inputs.buffer(0)?;
        let extent = inputs.info(0)?.extent;
        let bands = input.bands();
        let (rx, ry) = (self.radius.x as i64, self.radius.y as i64);
        let mut failed = None;

        output.fill_with(|x, y, pixel| {
            let window = Region::new(
                x - rx,
                y - ry,
                self.radius.x * 2 + 1,
                self.radius.y * 2 + 1,
            );
            let window = window.clipped_to(&extent);
            if !input.region().contains(&window) {
                failed.get_or_insert(window);
                return;
            }
            pixel.iter_mut().for_each(|v| *v = 0.0);
            for wy in window.y..window.bottom() {
                for wx in window.x..window.right() {
                    if let Some(source) = input.pixel(wx, wy) {
                        for band in 0..bands {
                            pixel[band] += source[band];
                        }
                    }
                }
            }
            let count = window.area() as f64;
            pixel.iter_mut().for_each(|v| *v /= count);
        });

        match failed {
            Some(window) => Err(StageError::Other(format!(
                "window {} exceeds buffered input {}",
                window,
                input.region()
            ))),
            None => Ok(()),
        }
    }
}

impl Stage for MeanFilterStage {
    fn name(&self) -> &str {
        "mean"
    }

    fn input_count(&self) -> usize {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::buffer::RasterBuffer;
    use crate::core::types::SampleType;

    #[test]
    fn test_request_is_padded_and_clipped() {
        let stage = MeanFilterStage::new(2);
        let info = ImageInfo::new(Region::from_size(10, 10), 1, SampleType::F32);
        let request = stage
            .input_requested_region(0, &Region::new(0, 4, 10, 2), &info)
            .unwrap();
        assert_eq!(request, Region::new(0, 2, 10, 6));
    }

    #[test]
    fn test_edge_window_shrinks() {
        let extent = Region::from_size(3, 3);
        let input = RasterBuffer::from_fn(extent, 1, |x, y, _| (x + 3 * y) as f64);
        let infos = [ImageInfo::new(extent, 1, SampleType::F32)];
        let buffers = [&input];

        let mut output = RasterBuffer::new(extent, 1);
        MeanFilterStage::new(1)
            .generate(&StageInputs::new(&buffers, &infos), &mut output.as_tile_mut())
            .unwrap();
        // corner: mean of 0, 1, 3, 4
        assert_eq!(output.get(0, 0, 0), Some(2.0));
        // centre: mean of 0..=8
        assert_eq!(output.get(1, 1, 0), Some(4.0));
    }

    #[test]
    fn test_under_buffered_input_is_reported() {
        let extent = Region::from_size(4, 4);
        let input = RasterBuffer::new(Region::new(0, 1, 4, 2), 1);
        let infos = [ImageInfo::new(extent, 1, SampleType::F32)];
        let buffers = [&input];

        let mut output = RasterBuffer::new(Region::new(0, 1, 4, 2), 1);
        let result = MeanFilterStage::new(1)
            .generate(&StageInputs::new(&buffers, &infos), &mut output.as_tile_mut());
        assert!(matches!(result, Err(StageError::Other(_))));
    }
}
