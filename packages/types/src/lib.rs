//! Shared types for the Ardhi segmentation pipeline
//!
//! - `Raster`, `Tile`, `Mask` and their placement metadata
//! - `GeoTransform` and `Crs` georeferencing
//! - GeoJSON `FeatureCollection` output types
//! - `PipelineError`, the error taxonomy surfaced to callers

pub mod crs;
pub mod error;
pub mod geojson;
pub mod raster;
pub mod transform;

pub use crs::Crs;
pub use error::{ErrorBody, PipelineError, PipelineResult};
pub use geojson::{Feature, FeatureCollection, Geometry, Position, Ring};
pub use raster::{Mask, PixelOffset, Raster, Tile, TileIndex};
pub use transform::GeoTransform;

pub use ndarray;
