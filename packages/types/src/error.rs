//! Error taxonomy of the segmentation pipeline

use crate::{Crs, TileIndex};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type PipelineResult<T> = Result<T, PipelineError>;

/// Errors surfaced by any pipeline stage. Every variant names the offending
/// input so a caller can retry (re-upload, exclude a tile) without logs.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Source or intermediate raster could not be decoded
    #[error("Failed to read raster {source_name}: {message}")]
    RasterRead {
        source_name: String,
        message: String,
    },

    /// Raster could not be encoded or written
    #[error("Failed to write raster {target}: {message}")]
    RasterWrite { target: String, message: String },

    /// Inference needs at least three bands (R, G, B)
    #[error("{tile} has {found} band(s), at least {required} are required")]
    UnsupportedBandCount {
        tile: TileIndex,
        found: usize,
        required: usize,
    },

    /// Model invocation failed for a batch of tiles
    #[error("Inference failed for {}: {message}", format_tiles(.tiles))]
    Inference {
        tiles: Vec<TileIndex>,
        message: String,
    },

    /// Masks disagree on their coordinate reference system
    #[error("{tile} is in {found}, expected {expected}")]
    CrsMismatch {
        tile: TileIndex,
        expected: Crs,
        found: Crs,
    },

    /// Masks disagree on pixel size or rotation
    #[error("{tile} has pixel size {found:?}, expected {expected:?}")]
    ResolutionMismatch {
        tile: TileIndex,
        expected: (f64, f64),
        found: (f64, f64),
    },

    /// Mask origin does not fall on the shared pixel grid
    #[error("{tile} is offset by a fractional pixel ({col_offset}, {row_offset}) from the mosaic grid")]
    GridMisaligned {
        tile: TileIndex,
        col_offset: f64,
        row_offset: f64,
    },

    /// Mosaicking was asked to merge nothing
    #[error("No masks to mosaic")]
    EmptyInput,

    /// Mosaic holds only background pixels
    #[error("Raster contains only background value {background}, nothing to vectorize")]
    EmptyRaster { background: u8 },

    /// Coordinates cannot be reprojected from this CRS
    #[error("Cannot reproject from {from} to {to}")]
    Reprojection { from: Crs, to: Crs },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Run was cancelled before completion; no partial result exists
    #[error("Pipeline run cancelled")]
    Cancelled,
}

fn format_tiles(tiles: &[TileIndex]) -> String {
    match tiles {
        [] => "no tiles".to_string(),
        [tile] => tile.to_string(),
        many => many
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", "),
    }
}

/// Error payload handed to the web layer.
#[derive(Serialize, Deserialize, JsonSchema, Clone, Debug, PartialEq)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tiles: Vec<TileIndex>,
}

impl PipelineError {
    pub fn raster_read(source_name: impl ToString, err: impl ToString) -> Self {
        PipelineError::RasterRead {
            source_name: source_name.to_string(),
            message: err.to_string(),
        }
    }

    pub fn raster_write(target: impl ToString, err: impl ToString) -> Self {
        PipelineError::RasterWrite {
            target: target.to_string(),
            message: err.to_string(),
        }
    }

    pub fn inference(tiles: Vec<TileIndex>, err: impl ToString) -> Self {
        PipelineError::Inference {
            tiles,
            message: err.to_string(),
        }
    }

    /// Stable snake_case identifier of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::RasterRead { .. } => "raster_read_error",
            PipelineError::RasterWrite { .. } => "raster_write_error",
            PipelineError::UnsupportedBandCount { .. } => "unsupported_band_count_error",
            PipelineError::Inference { .. } => "inference_error",
            PipelineError::CrsMismatch { .. } => "crs_mismatch_error",
            PipelineError::ResolutionMismatch { .. } => "resolution_mismatch_error",
            PipelineError::GridMisaligned { .. } => "grid_misaligned_error",
            PipelineError::EmptyInput => "empty_input_error",
            PipelineError::EmptyRaster { .. } => "empty_raster_error",
            PipelineError::Reprojection { .. } => "reprojection_error",
            PipelineError::InvalidConfig(_) => "invalid_config_error",
            PipelineError::Cancelled => "cancelled",
        }
    }

    /// Tiles implicated in the failure, if any.
    pub fn tiles(&self) -> Vec<TileIndex> {
        match self {
            PipelineError::UnsupportedBandCount { tile, .. }
            | PipelineError::CrsMismatch { tile, .. }
            | PipelineError::ResolutionMismatch { tile, .. }
            | PipelineError::GridMisaligned { tile, .. } => vec![*tile],
            PipelineError::Inference { tiles, .. } => tiles.clone(),
            _ => Vec::new(),
        }
    }

    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            kind: self.kind().to_string(),
            message: self.to_string(),
            tiles: self.tiles(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inference_error_names_tiles() {
        let err = PipelineError::inference(
            vec![TileIndex::new(0, 1), TileIndex::new(2, 3)],
            "device lost",
        );
        assert_eq!(
            err.to_string(),
            "Inference failed for tile_0_1, tile_2_3: device lost"
        );
        assert_eq!(err.kind(), "inference_error");
    }

    #[test]
    fn test_error_body_shape() {
        let err = PipelineError::CrsMismatch {
            tile: TileIndex::new(1, 0),
            expected: Crs::Epsg(32637),
            found: Crs::WGS84,
        };
        let body = serde_json::to_value(err.to_body()).unwrap();
        assert_eq!(body["kind"], "crs_mismatch_error");
        assert_eq!(body["tiles"][0]["row"], 1);
        assert_eq!(
            body["message"],
            "tile_1_0 is in EPSG:4326, expected EPSG:32637"
        );

        let body = serde_json::to_value(PipelineError::EmptyInput.to_body()).unwrap();
        assert!(body.get("tiles").is_none());
    }
}
