use crate::{Crs, GeoTransform};
use ndarray::{Array2, Array3, ArrayView2, s};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Band-major 8-bit raster with its georeferencing.
///
/// Samples are stored as `[band, row, col]`. Imagery and class masks both
/// use unsigned bytes, so there is a single sample type.
#[derive(Clone, Debug, PartialEq)]
pub struct Raster {
    pub data: Array3<u8>,
    pub crs: Crs,
    pub transform: GeoTransform,
}

impl Raster {
    pub fn new(data: Array3<u8>, crs: Crs, transform: GeoTransform) -> Self {
        Self {
            data,
            crs,
            transform,
        }
    }

    /// Single-band raster from a `[row, col]` grid.
    pub fn from_band(band: Array2<u8>, crs: Crs, transform: GeoTransform) -> Self {
        Self::new(band.insert_axis(ndarray::Axis(0)), crs, transform)
    }

    /// Builds a raster from pixel-interleaved samples (`RGBRGB...`).
    pub fn from_interleaved(
        width: u32,
        height: u32,
        bands: usize,
        samples: Vec<u8>,
        crs: Crs,
        transform: GeoTransform,
    ) -> Result<Self, ndarray::ShapeError> {
        let hwc = Array3::from_shape_vec((height as usize, width as usize, bands), samples)?;
        let data = hwc.permuted_axes([2, 0, 1]).as_standard_layout().to_owned();
        Ok(Self::new(data, crs, transform))
    }

    pub fn width(&self) -> u32 {
        self.data.dim().2 as u32
    }

    pub fn height(&self) -> u32 {
        self.data.dim().1 as u32
    }

    pub fn band_count(&self) -> usize {
        self.data.dim().0
    }

    pub fn band(&self, index: usize) -> ArrayView2<'_, u8> {
        self.data.slice(s![index, .., ..])
    }

    /// Pixel-interleaved copy of the samples, the layout image encoders expect.
    pub fn to_interleaved(&self) -> Vec<u8> {
        self.data
            .view()
            .permuted_axes([1, 2, 0])
            .iter()
            .copied()
            .collect()
    }

    /// Copies the window `[row, row + height) x [col, col + width)` into a new
    /// raster whose transform is translated to the window origin.
    pub fn window(&self, col: u32, row: u32, width: u32, height: u32) -> Raster {
        let (c0, r0) = (col as usize, row as usize);
        let data = self
            .data
            .slice(s![.., r0..r0 + height as usize, c0..c0 + width as usize])
            .to_owned();
        Raster::new(
            data,
            self.crs,
            self.transform.translate_pixels(col as i64, row as i64),
        )
    }

    /// World-space bounds as `[min_x, min_y, max_x, max_y]`.
    pub fn bounds(&self) -> [f64; 4] {
        let (w, h) = (self.width() as f64, self.height() as f64);
        let corners = [
            self.transform.apply(0.0, 0.0),
            self.transform.apply(w, 0.0),
            self.transform.apply(0.0, h),
            self.transform.apply(w, h),
        ];
        corners.iter().fold(
            [f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY],
            |acc, &(x, y)| [acc[0].min(x), acc[1].min(y), acc[2].max(x), acc[3].max(y)],
        )
    }
}

/// Grid position of a tile, row-major.
#[derive(
    Serialize, Deserialize, JsonSchema, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
pub struct TileIndex {
    pub row: u32,
    pub col: u32,
}

impl TileIndex {
    pub fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }
}

impl fmt::Display for TileIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tile_{}_{}", self.row, self.col)
    }
}

/// Pixel position of a tile's upper-left corner within its source raster.
#[derive(Serialize, Deserialize, JsonSchema, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PixelOffset {
    pub col: u32,
    pub row: u32,
}

/// A window of the source raster together with its placement.
#[derive(Clone, Debug)]
pub struct Tile {
    pub index: TileIndex,
    pub offset: PixelOffset,
    /// Nominal edge length; edge tiles may be smaller.
    pub size: u32,
    pub raster: Raster,
}

impl Tile {
    pub fn width(&self) -> u32 {
        self.raster.width()
    }

    pub fn height(&self) -> u32 {
        self.raster.height()
    }

    pub fn is_truncated(&self) -> bool {
        self.width() < self.size || self.height() < self.size
    }
}

/// Per-pixel class labels predicted for one tile.
#[derive(Clone, Debug)]
pub struct Mask {
    pub index: TileIndex,
    /// Single band; CRS and transform copied from the tile.
    pub raster: Raster,
}

impl Mask {
    pub fn labels(&self) -> ArrayView2<'_, u8> {
        self.raster.band(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Raster {
        let data = Array3::from_shape_fn((3, 4, 5), |(b, r, c)| (b * 100 + r * 10 + c) as u8);
        Raster::new(data, Crs::Epsg(32637), GeoTransform::north_up(1000.0, 2000.0, 1.0, 1.0))
    }

    #[test]
    fn test_interleaved_round_trip() {
        let raster = sample();
        let interleaved = raster.to_interleaved();
        assert_eq!(&interleaved[..6], &[0, 100, 200, 1, 101, 201]);
        let back = Raster::from_interleaved(5, 4, 3, interleaved, raster.crs, raster.transform)
            .unwrap();
        assert_eq!(back, raster);
    }

    #[test]
    fn test_window_translates_transform() {
        let raster = sample();
        let win = raster.window(2, 1, 3, 2);
        assert_eq!((win.width(), win.height(), win.band_count()), (3, 2, 3));
        assert_eq!(win.data[[1, 0, 0]], 112);
        assert_eq!(win.transform.apply(0.0, 0.0), raster.transform.apply(2.0, 1.0));
        assert_eq!(win.crs, raster.crs);
    }

    #[test]
    fn test_bounds_north_up() {
        let raster = sample();
        assert_eq!(raster.bounds(), [1000.0, 1996.0, 1005.0, 2000.0]);
    }
}
