//! Pixel-wise stages.
//!
//! Both stages need exactly their output region from every input, so they
//! rely on the default identity request.

use crate::core::buffer::RasterTileMut;
use crate::core::error::{StageError, StageResult};
use crate::core::types::ImageInfo;
use crate::pipeline::stage::{
    DataGenerator, OutputInformationProvider, RequestedRegionPropagator, Stage, StageInputs,
};
use std::sync::Arc;

/// Applies `f(sample)` to every sample of its single input.
pub struct PixelMapStage {
    name: String,
    map: Arc<dyn Fn(f64) -> f64 + Send + Sync>,
}

impl PixelMapStage {
    /// Create a stage from a per-sample function.
    pub fn new<F>(name: impl Into<String>, map: F) -> Self
    where
        F: Fn(f64) -> f64 + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            map: Arc::new(map),
        }
    }

    /// `v * factor + offset`.
    pub fn linear(factor: f64, offset: f64) -> Self {
        Self::new("linear", move |v| v * factor + offset)
    }
}

impl OutputInformationProvider for PixelMapStage {
    fn output_information(&self, inputs: &[ImageInfo]) -> StageResult<ImageInfo> {
        inputs.first().copied().ok_or(StageError::MissingInput(0))
    }
}

impl RequestedRegionPropagator for PixelMapStage {}

impl DataGenerator for PixelMapStage {
    fn generate(&self, inputs: &StageInputs<'_>, output: &mut RasterTileMut<'_>) -> StageResult<()> {
        let input = inputs.buffer(0)?;
        let region = output.region();
        if !input.region().contains(&region) || input.bands() != output.bands() {
            return Err(StageError::Other(format!(
                "output {} with {} bands exceeds buffered input {} with {} bands",
                region,
                output.bands(),
                input.region(),
                input.bands()
            )));
        }
        let row_len = region.width as usize * output.bands();
        let start = (region.x - input.region().x) as usize * input.bands();
        let data = output.data_mut();
        for (row, y) in (region.y..region.bottom()).enumerate() {
            let source = input
                .row(y)
                .ok_or_else(|| StageError::Other(format!("input row {} not buffered", y)))?;
            let target = &mut data[row * row_len..(row + 1) * row_len];
            for (out, &v) in target.iter_mut().zip(&source[start..start + row_len]) {
                *out = (self.map)(v);
            }
        }
        Ok(())
    }
}

impl Stage for PixelMapStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn input_count(&self) -> usize {
        1
    }
}

/// Combines the same band of several inputs pixel by pixel.
///
/// Every input must share extent and band count.
pub struct BandMathStage {
    name: String,
    arity: usize,
    combine: Arc<dyn Fn(&[f64]) -> f64 + Send + Sync>,
}

impl BandMathStage {
    /// Create a stage over `arity` inputs; `combine` receives one sample per
    /// input in slot order.
    pub fn new<F>(name: impl Into<String>, arity: usize, combine: F) -> Self
    where
        F: Fn(&[f64]) -> f64 + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            arity,
            combine: Arc::new(combine),
        }
    }

    /// Sum of all inputs.
    pub fn sum(arity: usize) -> Self {
        Self::new("sum", arity, |values| values.iter().sum())
    }

    /// `(a - b) / (a + b)`, zero where the denominator vanishes.
    pub fn normalized_difference() -> Self {
        Self::new("normalized-difference", 2, |values| {
            let (a, b) = (values[0], values[1]);
            if a + b == 0.0 {
                0.0
            } else {
                (a - b) / (a + b)
            }
        })
    }
}

impl OutputInformationProvider for BandMathStage {
    fn output_information(&self, inputs: &[ImageInfo]) -> StageResult<ImageInfo> {
        let first = inputs.first().copied().ok_or(StageError::MissingInput(0))?;
        if inputs.len() != self.arity {
            return Err(StageError::MissingInput(inputs.len()));
        }
        for (slot, info) in inputs.iter().enumerate().skip(1) {
            if info.extent != first.extent || info.bands != first.bands {
                return Err(StageError::IncompatibleInputs(format!(
                    "input {} is {} with {} bands, input 0 is {} with {} bands",
                    slot, info.extent, info.bands, first.extent, first.bands
                )));
            }
        }
        Ok(first)
    }
}

impl RequestedRegionPropagator for BandMathStage {}

impl DataGenerator for BandMathStage {
    fn generate(&self, inputs: &StageInputs<'_>, output: &mut RasterTileMut<'_>) -> StageResult<()> {
        let buffers = inputs.buffers();
        if buffers.len() != self.arity {
            return Err(StageError::MissingInput(buffers.len()));
        }
        let mut values = vec![0.0; self.arity];
        let mut missing = None;
        output.fill_with(|x, y, pixel| {
            for (band, out) in pixel.iter_mut().enumerate() {
                for (slot, buffer) in buffers.iter().enumerate() {
                    match buffer.get(x, y, band) {
                        Some(v) => values[slot] = v,
                        None => {
                            missing.get_or_insert((x, y));
                            return;
                        }
                    }
                }
                *out = (self.combine)(&values);
            }
        });
        match missing {
            Some((x, y)) => Err(StageError::Other(format!(
                "pixel ({}, {}) not buffered by every input",
                x, y
            ))),
            None => Ok(()),
        }
    }
}

impl Stage for BandMathStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn input_count(&self) -> usize {
        self.arity
    }
}
