//! On-disk workspace of one pipeline run: `<base>/<run id>/{tiles,masks}/`
//! plus `mosaic.tif`. Every file is a single-image GeoTIFF.

use crate::io::write_geotiff;
use ardhi_types::{Mask, PipelineError, PipelineResult, Raster, Tile};
use ndarray::s;
use std::path::{Path, PathBuf};
use uuid::Uuid;

const TILES_DIR: &str = "tiles";
const MASKS_DIR: &str = "masks";
const MOSAIC_FILE: &str = "mosaic.tif";

#[derive(Clone, Debug)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Creates the run directory and its sub-directories.
    pub async fn create(base: &Path, run_id: Uuid) -> PipelineResult<Self> {
        let root = base.join(run_id.to_string());
        for dir in [TILES_DIR, MASKS_DIR] {
            let path = root.join(dir);
            tokio::fs::create_dir_all(&path)
                .await
                .map_err(|e| PipelineError::raster_write(path.display(), e))?;
        }
        tracing::debug!("Artifacts for run {} under {}", run_id, root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn tile_path(&self, tile: &Tile) -> PathBuf {
        self.root.join(TILES_DIR).join(format!("{}.tif", tile.index))
    }

    pub fn mask_path(&self, mask: &Mask) -> PathBuf {
        self.root.join(MASKS_DIR).join(format!("{}.tif", mask.index))
    }

    pub fn mosaic_path(&self) -> PathBuf {
        self.root.join(MOSAIC_FILE)
    }

    /// Writes the RGB(A) bands of each tile.
    pub async fn write_tiles(&self, tiles: impl IntoIterator<Item = Tile>) -> PipelineResult<usize> {
        let jobs: Vec<(PathBuf, Raster)> = tiles
            .into_iter()
            .map(|tile| (self.tile_path(&tile), displayable(tile.raster)))
            .collect();
        write_all(jobs).await
    }

    pub async fn write_masks(&self, masks: &[Mask]) -> PipelineResult<usize> {
        let jobs: Vec<(PathBuf, Raster)> = masks
            .iter()
            .map(|mask| (self.mask_path(mask), mask.raster.clone()))
            .collect();
        write_all(jobs).await
    }

    pub async fn write_mosaic(&self, mosaic: &Raster) -> PipelineResult<PathBuf> {
        let path = self.mosaic_path();
        write_all(vec![(path.clone(), mosaic.clone())]).await?;
        Ok(path)
    }
}

/// Drops bands beyond the first three unless the raster is RGBA.
fn displayable(raster: Raster) -> Raster {
    if raster.band_count() <= 4 && raster.band_count() != 2 {
        return raster;
    }
    let bands = if raster.band_count() > 4 { 3 } else { 1 };
    Raster::new(
        raster.data.slice(s![..bands, .., ..]).to_owned(),
        raster.crs,
        raster.transform,
    )
}

async fn write_all(jobs: Vec<(PathBuf, Raster)>) -> PipelineResult<usize> {
    let count = jobs.len();
    let target = jobs
        .first()
        .map(|(p, _)| p.display().to_string())
        .unwrap_or_default();
    tokio::task::spawn_blocking(move || {
        for (path, raster) in &jobs {
            write_geotiff(path, raster)?;
        }
        Ok::<_, PipelineError>(())
    })
    .await
    .map_err(|e| PipelineError::raster_write(target, e))??;
    Ok(count)
}
