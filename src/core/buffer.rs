//! Raster sample buffers.
//!
//! A [`RasterBuffer`] owns the samples of one region, pixel-interleaved
//! (all bands of a pixel are adjacent). [`RasterTileMut`] is a mutable view
//! over a band of whole rows, handed to workers so that each one writes a
//! disjoint part of a node's output.

use crate::core::error::BufferError;
use crate::core::region::Region;

/// Samples of a rectangular region, stored row-major and pixel-interleaved.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterBuffer {
    region: Region,
    bands: usize,
    data: Vec<f64>,
}

fn sample_count(region: &Region, bands: usize) -> usize {
    region.area() as usize * bands
}

impl RasterBuffer {
    /// Create a zero-filled buffer.
    pub fn new(region: Region, bands: usize) -> Self {
        Self {
            region,
            bands,
            data: vec![0.0; sample_count(&region, bands)],
        }
    }

    /// Wrap existing samples.
    pub fn from_vec(region: Region, bands: usize, data: Vec<f64>) -> Result<Self, BufferError> {
        let expected = sample_count(&region, bands);
        if data.len() != expected {
            return Err(BufferError::SizeMismatch {
                region,
                bands,
                expected,
                got: data.len(),
            });
        }
        Ok(Self {
            region,
            bands,
            data,
        })
    }

    /// Build a buffer by evaluating `f(x, y, band)` for every sample.
    pub fn from_fn<F>(region: Region, bands: usize, f: F) -> Self
    where
        F: Fn(i64, i64, usize) -> f64,
    {
        let mut data = Vec::with_capacity(sample_count(&region, bands));
        for y in region.y..region.bottom() {
            for x in region.x..region.right() {
                for band in 0..bands {
                    data.push(f(x, y, band));
                }
            }
        }
        Self {
            region,
            bands,
            data,
        }
    }

    /// Region covered by this buffer.
    pub fn region(&self) -> Region {
        self.region
    }

    /// Number of bands per pixel.
    pub fn bands(&self) -> usize {
        self.bands
    }

    /// Raw samples.
    pub fn data(&self) -> &[f64] {
        &self.data
    }

    /// Raw samples, mutable.
    pub fn data_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }

    /// Consume the buffer and return its samples.
    pub fn into_data(self) -> Vec<f64> {
        self.data
    }

    /// Approximate heap size in bytes.
    pub fn memory_size(&self) -> usize {
        self.data.len() * std::mem::size_of::<f64>()
    }

    fn offset(&self, x: i64, y: i64) -> Option<usize> {
        if !self.region.contains_point(x, y) {
            return None;
        }
        let col = (x - self.region.x) as usize;
        let row = (y - self.region.y) as usize;
        Some((row * self.region.width as usize + col) * self.bands)
    }

    /// Sample at absolute raster coordinates.
    pub fn get(&self, x: i64, y: i64, band: usize) -> Option<f64> {
        if band >= self.bands {
            return None;
        }
        self.offset(x, y).map(|i| self.data[i + band])
    }

    /// All bands of the pixel at absolute raster coordinates.
    pub fn pixel(&self, x: i64, y: i64) -> Option<&[f64]> {
        self.offset(x, y).map(|i| &self.data[i..i + self.bands])
    }

    /// Set a sample; returns `false` when outside the buffer.
    pub fn set(&mut self, x: i64, y: i64, band: usize, value: f64) -> bool {
        if band >= self.bands {
            return false;
        }
        match self.offset(x, y) {
            Some(i) => {
                self.data[i + band] = value;
                true
            }
            None => false,
        }
    }

    /// Samples of one full row of the buffer.
    pub fn row(&self, y: i64) -> Option<&[f64]> {
        let start = self.offset(self.region.x, y)?;
        Some(&self.data[start..start + self.region.width as usize * self.bands])
    }

    /// Copy out exactly `sub`, which must lie inside this buffer.
    pub fn extract(&self, sub: &Region) -> Result<RasterBuffer, BufferError> {
        if !self.region.contains(sub) {
            return Err(BufferError::NotCovered {
                requested: *sub,
                buffered: self.region,
            });
        }
        if *sub == self.region {
            return Ok(self.clone());
        }
        let row_len = sub.width as usize * self.bands;
        let mut data = Vec::with_capacity(sample_count(sub, self.bands));
        for y in sub.y..sub.bottom() {
            if let Some(start) = self.offset(sub.x, y) {
                data.extend_from_slice(&self.data[start..start + row_len]);
            }
        }
        RasterBuffer::from_vec(*sub, self.bands, data)
    }

    /// Copy the overlapping part of `other` into this buffer.
    ///
    /// Returns the region that was written.
    pub fn paste(&mut self, other: &RasterBuffer) -> Result<Option<Region>, BufferError> {
        if other.bands != self.bands {
            return Err(BufferError::BandMismatch {
                expected: self.bands,
                got: other.bands,
            });
        }
        let overlap = match self.region.intersection(&other.region) {
            Some(overlap) => overlap,
            None => return Ok(None),
        };
        let row_len = overlap.width as usize * self.bands;
        for y in overlap.y..overlap.bottom() {
            if let (Some(dst), Some(src)) = (self.offset(overlap.x, y), other.offset(overlap.x, y)) {
                self.data[dst..dst + row_len].copy_from_slice(&other.data[src..src + row_len]);
            }
        }
        Ok(Some(overlap))
    }

    /// View the whole buffer as a single mutable tile.
    pub fn as_tile_mut(&mut self) -> RasterTileMut<'_> {
        RasterTileMut {
            region: self.region,
            bands: self.bands,
            data: &mut self.data,
        }
    }

    /// Split the buffer into disjoint bands of at most `rows` rows each.
    pub fn row_tiles_mut(&mut self, rows: u64) -> Vec<RasterTileMut<'_>> {
        let rows = rows.max(1);
        let row_len = self.region.width as usize * self.bands;
        if row_len == 0 {
            return vec![self.as_tile_mut()];
        }
        let region = self.region;
        let bands = self.bands;
        self.data
            .chunks_mut(row_len * rows as usize)
            .enumerate()
            .map(|(i, data)| {
                let y = region.y + (i as u64 * rows) as i64;
                let height = (data.len() / row_len) as u64;
                RasterTileMut {
                    region: Region::new(region.x, y, region.width, height),
                    bands,
                    data,
                }
            })
            .collect()
    }
}

/// Mutable view over whole rows of a [`RasterBuffer`].
#[derive(Debug)]
pub struct RasterTileMut<'a> {
    region: Region,
    bands: usize,
    data: &'a mut [f64],
}

impl<'a> RasterTileMut<'a> {
    /// Region this tile covers, in absolute raster coordinates.
    pub fn region(&self) -> Region {
        self.region
    }

    /// Number of bands per pixel.
    pub fn bands(&self) -> usize {
        self.bands
    }

    /// Raw samples of the tile.
    pub fn data_mut(&mut self) -> &mut [f64] {
        &mut self.data[..]
    }

    /// Mutable samples of one pixel.
    pub fn pixel_mut(&mut self, x: i64, y: i64) -> Option<&mut [f64]> {
        if !self.region.contains_point(x, y) {
            return None;
        }
        let col = (x - self.region.x) as usize;
        let row = (y - self.region.y) as usize;
        let start = (row * self.region.width as usize + col) * self.bands;
        Some(&mut self.data[start..start + self.bands])
    }

    /// Set one sample; returns `false` when outside the tile.
    pub fn set(&mut self, x: i64, y: i64, band: usize, value: f64) -> bool {
        let bands = self.bands;
        match self.pixel_mut(x, y) {
            Some(pixel) if band < bands => {
                pixel[band] = value;
                true
            }
            _ => false,
        }
    }

    /// Fill every pixel with `f(x, y, pixel)`.
    pub fn fill_with<F>(&mut self, mut f: F)
    where
        F: FnMut(i64, i64, &mut [f64]),
    {
        let width = self.region.width as usize;
        let bands = self.bands;
        if width == 0 || bands == 0 {
            return;
        }
        let (x0, y0) = (self.region.x, self.region.y);
        for (i, pixel) in self.data.chunks_mut(bands).enumerate() {
            let x = x0 + (i % width) as i64;
            let y = y0 + (i / width) as i64;
            f(x, y, pixel);
        }
    }

    /// Copy the overlapping samples of `source` into this tile.
    pub fn copy_from(&mut self, source: &RasterBuffer) -> Result<(), BufferError> {
        if source.bands() != self.bands {
            return Err(BufferError::BandMismatch {
                expected: self.bands,
                got: source.bands(),
            });
        }
        if !source.region().contains(&self.region) {
            return Err(BufferError::NotCovered {
                requested: self.region,
                buffered: source.region(),
            });
        }
        let row_len = self.region.width as usize * self.bands;
        for (row, y) in (self.region.y..self.region.bottom()).enumerate() {
            if let Some(src) = source.offset(self.region.x, y) {
                let dst = row * row_len;
                self.data[dst..dst + row_len].copy_from_slice(&source.data()[src..src + row_len]);
            }
        }
        Ok(())
    }
}
