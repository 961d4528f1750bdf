//! Raster-to-vector conversion of a class mosaic.
//!
//! Same-class pixels are grouped into regions under the configured
//! connectivity. Each region becomes one GeoJSON feature: a `Polygon`, or a
//! `MultiPolygon` when the region only holds together through pixel corners.
//! Rings follow RFC 7946 orientation in the output coordinate space.

pub mod regions;
pub mod reproject;
pub mod rings;

use crate::config::VectorizeOptions;
use ardhi_types::{
    Feature, FeatureCollection, GeoTransform, Geometry, PipelineError, PipelineResult, Raster, Ring,
};
use regions::{Region, label_regions};
use rings::{PixelPolygon, Vertex, boundary_edges};

pub use reproject::reproject_to_wgs84;

/// Vectorizes band 0 of `mosaic`. Coordinates are in the mosaic's CRS unless
/// `reproject_to_wgs84` is set.
pub fn vectorize(mosaic: &Raster, options: &VectorizeOptions) -> PipelineResult<FeatureCollection> {
    let labels = mosaic.band(0);
    if labels.iter().all(|&v| v == options.background) {
        return Err(PipelineError::EmptyRaster {
            background: options.background,
        });
    }

    let map = label_regions(labels, options.background, options.connectivity);
    let edges = boundary_edges(&map.ids, map.regions.len());
    let pixel_area = mosaic.transform.determinant().abs();

    let mut features = Vec::new();
    for (region, region_edges) in map.regions.iter().zip(&edges) {
        if region.pixel_count < options.min_region_pixels {
            continue;
        }
        let polygons = rings::polygons(region_edges);
        if polygons.is_empty() {
            tracing::warn!("Region {} produced no rings", region.id);
            continue;
        }
        let geometry = to_geometry(&polygons, &mosaic.transform);
        features.push(region_feature(
            features.len() + 1,
            region,
            geometry,
            pixel_area,
            options.class_labels.as_deref(),
        ));
    }

    tracing::info!(
        "Vectorized {} regions into {} features ({:?} connectivity, min {} px)",
        map.regions.len(),
        features.len(),
        options.connectivity,
        options.min_region_pixels
    );

    let mut collection = FeatureCollection::new(features, mosaic.crs);
    if options.reproject_to_wgs84 {
        reproject_to_wgs84(&mut collection)?;
    }
    Ok(collection)
}

fn region_feature(
    id: usize,
    region: &Region,
    geometry: Geometry,
    pixel_area: f64,
    class_labels: Option<&[String]>,
) -> Feature {
    let mut feature = Feature::new(geometry)
        .with_property("id", id)
        .with_property("class", region.class)
        .with_property("pixel_count", region.pixel_count)
        .with_property("area", region.pixel_count as f64 * pixel_area);
    if let Some(label) = class_labels.and_then(|names| names.get(region.class as usize)) {
        feature = feature.with_property("label", label.as_str());
    }
    feature
}

/// Maps a pixel ring into world space. Orientation is decided on the integer
/// pixel ring, since the world-space shoelace sum loses its sign at fine
/// resolutions far from the origin.
fn to_ring(vertices: &[Vertex], transform: &GeoTransform, exterior: bool) -> Ring {
    let mut ring: Ring = vertices
        .iter()
        .map(|&(x, y)| {
            let (wx, wy) = transform.apply(x as f64, y as f64);
            [wx, wy]
        })
        .collect();
    let world_sign = rings::doubled_area(vertices).signum() as f64 * transform.determinant().signum();
    if (exterior && world_sign < 0.0) || (!exterior && world_sign > 0.0) {
        ring.reverse();
    }
    ring
}

fn to_geometry(polygons: &[PixelPolygon], transform: &GeoTransform) -> Geometry {
    let mut world: Vec<Vec<Ring>> = polygons
        .iter()
        .map(|polygon| {
            std::iter::once(to_ring(&polygon.exterior, transform, true))
                .chain(polygon.holes.iter().map(|h| to_ring(h, transform, false)))
                .collect()
        })
        .collect();
    if world.len() == 1 {
        Geometry::Polygon {
            coordinates: world.remove(0),
        }
    } else {
        Geometry::MultiPolygon { coordinates: world }
    }
}

#[cfg(test)]
mod tests;
