//! Reassembly of per-tile masks into one raster on their shared pixel grid.

use crate::config::MergeStrategy;
use ardhi_types::{Mask, PipelineError, PipelineResult, Raster};
use ndarray::{Array2, Zip, s};

/// Placement tolerance, in pixels, for a mask origin to count as on-grid.
const GRID_TOLERANCE: f64 = 1e-6;

struct Placement<'a> {
    mask: &'a Mask,
    col: i64,
    row: i64,
}

/// Merges masks that share CRS, pixel size and rotation into a single-band
/// raster covering their union. Uncovered pixels hold `0`.
///
/// Masks are applied in grid order (row, then column; input order breaks
/// ties), so the result does not depend on the order workers finished in.
pub fn mosaic(masks: &[Mask], strategy: MergeStrategy) -> PipelineResult<Raster> {
    let reference = masks.first().ok_or(PipelineError::EmptyInput)?;
    let ref_transform = reference.raster.transform;
    let ref_crs = reference.raster.crs;
    let inverse = ref_transform.inverse().ok_or_else(|| {
        PipelineError::InvalidConfig(format!("{} has a degenerate transform", reference.index))
    })?;

    let mut placements = Vec::with_capacity(masks.len());
    for mask in masks {
        let raster = &mask.raster;
        if raster.crs != ref_crs {
            return Err(PipelineError::CrsMismatch {
                tile: mask.index,
                expected: ref_crs,
                found: raster.crs,
            });
        }
        if !raster.transform.same_linear_part(&ref_transform) {
            return Err(PipelineError::ResolutionMismatch {
                tile: mask.index,
                expected: ref_transform.pixel_size(),
                found: raster.transform.pixel_size(),
            });
        }

        let (col, row) = inverse.apply(raster.transform.c, raster.transform.f);
        let (col_round, row_round) = (col.round(), row.round());
        if (col - col_round).abs() > GRID_TOLERANCE || (row - row_round).abs() > GRID_TOLERANCE {
            return Err(PipelineError::GridMisaligned {
                tile: mask.index,
                col_offset: col - col_round,
                row_offset: row - row_round,
            });
        }
        placements.push(Placement {
            mask,
            col: col_round as i64,
            row: row_round as i64,
        });
    }

    // stable: equal offsets keep input order
    placements.sort_by_key(|p| (p.row, p.col));

    let min_col = placements.iter().map(|p| p.col).min().unwrap_or(0);
    let min_row = placements.iter().map(|p| p.row).min().unwrap_or(0);
    let max_col = placements
        .iter()
        .map(|p| p.col + p.mask.raster.width() as i64)
        .max()
        .unwrap_or(0);
    let max_row = placements
        .iter()
        .map(|p| p.row + p.mask.raster.height() as i64)
        .max()
        .unwrap_or(0);
    let (width, height) = ((max_col - min_col) as usize, (max_row - min_row) as usize);

    let mut out = Array2::<u8>::zeros((height, width));
    let mut covered = Array2::<bool>::from_elem((height, width), false);
    for p in &placements {
        let (c0, r0) = ((p.col - min_col) as usize, (p.row - min_row) as usize);
        let labels = p.mask.labels();
        let (h, w) = labels.dim();
        let mut target = out.slice_mut(s![r0..r0 + h, c0..c0 + w]);
        let mut seen = covered.slice_mut(s![r0..r0 + h, c0..c0 + w]);
        match strategy {
            MergeStrategy::Last => target.assign(&labels),
            MergeStrategy::First => Zip::from(&mut target)
                .and(&seen)
                .and(&labels)
                .for_each(|t, &done, &v| {
                    if !done {
                        *t = v
                    }
                }),
            MergeStrategy::Max => Zip::from(&mut target)
                .and(&labels)
                .for_each(|t, &v| *t = (*t).max(v)),
        }
        seen.fill(true);
    }

    let transform = ref_transform.translate_pixels(min_col, min_row);
    tracing::info!(
        "Mosaicked {} masks into {}x{} raster ({:?})",
        masks.len(),
        width,
        height,
        strategy
    );
    Ok(Raster::from_band(out, ref_crs, transform))
}
