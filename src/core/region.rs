//! Rectangular raster regions.
//!
//! A [`Region`] is an origin plus a size. Regions are immutable value
//! objects: every operation returns a new region.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A rectangular sub-area of a raster.
///
/// The origin is signed so that dilation can be expressed before clipping;
/// regions handed to nodes and collaborators always lie inside the extent
/// they were derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Region {
    /// Column of the first pixel.
    pub x: i64,
    /// Row of the first pixel.
    pub y: i64,
    /// Number of columns.
    pub width: u64,
    /// Number of rows.
    pub height: u64,
}

impl Region {
    /// Create a new region.
    pub const fn new(x: i64, y: i64, width: u64, height: u64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Create a region anchored at the origin.
    pub const fn from_size(width: u64, height: u64) -> Self {
        Self::new(0, 0, width, height)
    }

    /// An empty region located at `(x, y)`.
    pub const fn empty_at(x: i64, y: i64) -> Self {
        Self::new(x, y, 0, 0)
    }

    /// Right edge (exclusive).
    pub fn right(&self) -> i64 {
        self.x + self.width as i64
    }

    /// Bottom edge (exclusive).
    pub fn bottom(&self) -> i64 {
        self.y + self.height as i64
    }

    /// Number of pixels.
    pub fn area(&self) -> u64 {
        self.width * self.height
    }

    /// Whether the region holds no pixels.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Whether `other` lies entirely inside this region.
    ///
    /// An empty region is contained by every region.
    pub fn contains(&self, other: &Region) -> bool {
        if other.is_empty() {
            return true;
        }
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }

    /// Whether the pixel at `(x, y)` lies inside this region.
    pub fn contains_point(&self, x: i64, y: i64) -> bool {
        x >= self.x && y >= self.y && x < self.right() && y < self.bottom()
    }

    /// Whether the two regions share at least one pixel.
    pub fn overlaps(&self, other: &Region) -> bool {
        self.intersection(other).is_some()
    }

    /// Overlapping part of two regions, `None` when disjoint.
    pub fn intersection(&self, other: &Region) -> Option<Region> {
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        if right <= x || bottom <= y {
            return None;
        }
        Some(Region::new(x, y, (right - x) as u64, (bottom - y) as u64))
    }

    /// Clip this region to `bounds`, yielding an empty region at the
    /// clamped origin when they do not overlap.
    pub fn clipped_to(&self, bounds: &Region) -> Region {
        self.intersection(bounds).unwrap_or_else(|| {
            Region::empty_at(
                self.x.clamp(bounds.x, bounds.right()),
                self.y.clamp(bounds.y, bounds.bottom()),
            )
        })
    }

    /// Dilate by `radius` pixels on every side.
    pub fn pad(&self, radius: u64) -> Region {
        self.pad_xy(radius, radius)
    }

    /// Dilate by `rx` columns left/right and `ry` rows above/below.
    pub fn pad_xy(&self, rx: u64, ry: u64) -> Region {
        Region::new(
            self.x - rx as i64,
            self.y - ry as i64,
            self.width + 2 * rx,
            self.height + 2 * ry,
        )
    }

    /// Smallest region covering both. Empty operands are ignored.
    pub fn union(&self, other: &Region) -> Region {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        let right = self.right().max(other.right());
        let bottom = self.bottom().max(other.bottom());
        Region::new(x, y, (right - x) as u64, (bottom - y) as u64)
    }

    /// Expand outward so every edge falls on a multiple of `alignment`
    /// (grid anchored at the raster origin).
    pub fn align_outward(&self, alignment: u64) -> Region {
        if alignment <= 1 || self.is_empty() {
            return *self;
        }
        let a = alignment as i64;
        let x = self.x.div_euclid(a) * a;
        let y = self.y.div_euclid(a) * a;
        let right = (self.right() + a - 1).div_euclid(a) * a;
        let bottom = (self.bottom() + a - 1).div_euclid(a) * a;
        Region::new(x, y, (right - x) as u64, (bottom - y) as u64)
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {}; {}x{}]",
            self.x, self.y, self.width, self.height
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_edges() {
        let region = Region::new(10, 20, 100, 200);
        assert_eq!(region.right(), 110);
        assert_eq!(region.bottom(), 220);
        assert_eq!(region.area(), 20000);
    }

    #[test]
    fn test_pad_and_clip() {
        let extent = Region::from_size(200, 200);
        let region = Region::new(50, 50, 100, 100);
        let padded = region.pad(10).clipped_to(&extent);
        assert_eq!(padded, Region::new(40, 40, 120, 120));
    }

    #[test]
    fn test_pad_at_boundary() {
        let extent = Region::from_size(200, 200);
        let padded = Region::new(0, 0, 100, 100).pad(10).clipped_to(&extent);
        assert_eq!(padded, Region::new(0, 0, 110, 110));
    }

    #[test]
    fn test_intersection_disjoint() {
        let a = Region::new(0, 0, 10, 10);
        let b = Region::new(10, 0, 10, 10);
        assert!(a.intersection(&b).is_none());
        assert!(!a.overlaps(&b));
        assert!(a.clipped_to(&b).is_empty());
    }

    #[test]
    fn test_contains() {
        let outer = Region::from_size(100, 100);
        assert!(outer.contains(&Region::new(10, 10, 90, 90)));
        assert!(!outer.contains(&Region::new(-1, 10, 10, 10)));
        assert!(!outer.contains(&Region::new(95, 10, 10, 10)));
        assert!(outer.contains(&Region::empty_at(500, 500)));
    }

    #[test]
    fn test_union_ignores_empty() {
        let a = Region::new(0, 0, 10, 10);
        let b = Region::new(20, 5, 10, 10);
        assert_eq!(a.union(&b), Region::new(0, 0, 30, 15));
        assert_eq!(a.union(&Region::empty_at(99, 99)), a);
    }

    #[test]
    fn test_align_outward() {
        let region = Region::new(5, 17, 10, 3);
        assert_eq!(region.align_outward(16), Region::new(0, 16, 16, 16));
        assert_eq!(region.align_outward(1), region);
    }
}
