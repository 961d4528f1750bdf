//! Partitioning of a source raster into a row-major grid of fixed-size tiles.
//!
//! Tiles on the last row and column are truncated to the raster extent,
//! never padded. Each tile's transform is the parent transform translated to
//! the tile's pixel offset, so every tile is georeferenced on its own.

use ardhi_types::{PipelineError, PipelineResult, PixelOffset, Raster, Tile, TileIndex};

/// Placement of one tile, without pixel data.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TileSpec {
    pub index: TileIndex,
    pub offset: PixelOffset,
    pub width: u32,
    pub height: u32,
}

/// The tile grid over a `width x height` raster.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TileGrid {
    pub width: u32,
    pub height: u32,
    pub tile_size: u32,
    pub rows: u32,
    pub cols: u32,
}

impl TileGrid {
    pub fn new(width: u32, height: u32, tile_size: u32) -> PipelineResult<Self> {
        if tile_size == 0 {
            return Err(PipelineError::InvalidConfig(
                "tile_size must be positive".to_string(),
            ));
        }
        Ok(Self {
            width,
            height,
            tile_size,
            rows: height.div_ceil(tile_size),
            cols: width.div_ceil(tile_size),
        })
    }

    pub fn len(&self) -> usize {
        self.rows as usize * self.cols as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn spec(&self, index: TileIndex) -> Option<TileSpec> {
        if index.row >= self.rows || index.col >= self.cols {
            return None;
        }
        let col = index.col * self.tile_size;
        let row = index.row * self.tile_size;
        Some(TileSpec {
            index,
            offset: PixelOffset { col, row },
            width: self.tile_size.min(self.width - col),
            height: self.tile_size.min(self.height - row),
        })
    }

    /// Tile placements in row-major order.
    pub fn specs(&self) -> impl Iterator<Item = TileSpec> + '_ {
        (0..self.rows).flat_map(move |row| {
            (0..self.cols).filter_map(move |col| self.spec(TileIndex::new(row, col)))
        })
    }
}

/// Lazy tile sequence over a borrowed raster. Call [`tiles`] again to start
/// over from the first tile.
pub struct Tiles<'a> {
    raster: &'a Raster,
    grid: TileGrid,
    next: usize,
}

impl Tiles<'_> {
    pub fn grid(&self) -> TileGrid {
        self.grid
    }
}

impl Iterator for Tiles<'_> {
    type Item = Tile;

    fn next(&mut self) -> Option<Tile> {
        if self.next >= self.grid.len() {
            return None;
        }
        let cols = self.grid.cols as usize;
        let index = TileIndex::new((self.next / cols) as u32, (self.next % cols) as u32);
        self.next += 1;

        let spec = self.grid.spec(index)?;
        Some(Tile {
            index,
            offset: spec.offset,
            size: self.grid.tile_size,
            raster: self
                .raster
                .window(spec.offset.col, spec.offset.row, spec.width, spec.height),
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.grid.len().saturating_sub(self.next);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Tiles<'_> {}

/// Tiles covering `raster` with edge length `tile_size`.
pub fn tiles(raster: &Raster, tile_size: u32) -> PipelineResult<Tiles<'_>> {
    if raster.band_count() == 0 {
        return Err(PipelineError::raster_read("source", "raster has no bands"));
    }
    let grid = TileGrid::new(raster.width(), raster.height(), tile_size)?;
    tracing::debug!(
        "Tiling {}x{} raster into {} tiles ({}x{} grid, size {})",
        raster.width(),
        raster.height(),
        grid.len(),
        grid.rows,
        grid.cols,
        tile_size
    );
    Ok(Tiles {
        raster,
        grid,
        next: 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ardhi_types::{Crs, GeoTransform};
    use ndarray::{Array3, s};

    fn raster(width: usize, height: usize) -> Raster {
        let data = Array3::from_shape_fn((3, height, width), |(b, r, c)| {
            ((b * 31 + r * 7 + c * 3) % 251) as u8
        });
        Raster::new(
            data,
            Crs::Epsg(32736),
            GeoTransform::north_up(200_000.0, 9_500_000.0, 0.5, 0.5),
        )
    }

    #[test]
    fn test_grid_counts_and_truncation() {
        let grid = TileGrid::new(600, 300, 256).unwrap();
        assert_eq!((grid.rows, grid.cols, grid.len()), (2, 3, 6));

        let last = grid.spec(TileIndex::new(1, 2)).unwrap();
        assert_eq!(last.offset, PixelOffset { col: 512, row: 256 });
        assert_eq!((last.width, last.height), (88, 44));
        assert!(grid.spec(TileIndex::new(2, 0)).is_none());
    }

    #[test]
    fn test_zero_tile_size_is_invalid() {
        let r = raster(4, 4);
        assert!(matches!(
            tiles(&r, 0).err(),
            Some(PipelineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_row_major_order() {
        let r = raster(5, 5);
        let order: Vec<_> = tiles(&r, 2).unwrap().map(|t| t.index).collect();
        assert_eq!(order.len(), 9);
        assert_eq!(order[0], TileIndex::new(0, 0));
        assert_eq!(order[1], TileIndex::new(0, 1));
        assert_eq!(order[3], TileIndex::new(1, 0));
        assert_eq!(order[8], TileIndex::new(2, 2));
    }

    #[test]
    fn test_tiles_reconstruct_source() {
        let r = raster(37, 23);
        let mut rebuilt = Array3::<u8>::zeros(r.data.dim());
        let mut covered = 0usize;
        for tile in tiles(&r, 10).unwrap() {
            let (c, row) = (tile.offset.col as usize, tile.offset.row as usize);
            let (w, h) = (tile.width() as usize, tile.height() as usize);
            rebuilt
                .slice_mut(s![.., row..row + h, c..c + w])
                .assign(&tile.raster.data);
            covered += w * h;
        }
        assert_eq!(covered, 37 * 23);
        assert_eq!(rebuilt, r.data);
    }

    #[test]
    fn test_tile_transform_maps_to_source_location() {
        let r = raster(30, 30);
        for tile in tiles(&r, 8).unwrap() {
            let (x, y) = tile.raster.transform.apply(0.0, 0.0);
            let expected = r
                .transform
                .apply(tile.offset.col as f64, tile.offset.row as f64);
            assert_eq!((x, y), expected);
            assert_eq!(tile.raster.crs, r.crs);
        }
    }

    #[test]
    fn test_iteration_restarts() {
        let r = raster(9, 9);
        let first: Vec<_> = tiles(&r, 4).unwrap().map(|t| t.index).collect();
        let second: Vec<_> = tiles(&r, 4).unwrap().map(|t| t.index).collect();
        assert_eq!(first, second);
        assert_eq!(tiles(&r, 4).unwrap().len(), 9);
    }
}
