//! Segmentation pipeline for georeferenced imagery:
//! tiler -> inference engine -> mosaicker -> vectorizer -> GeoJSON.

pub mod artifacts;
pub mod config;
pub mod inference;
pub mod io;
pub mod mosaic;
pub mod pipeline;
pub mod tiler;
pub mod vectorize;

pub use config::{
    Connectivity, FailurePolicy, InferenceOptions, MergeStrategy, MosaicOptions, Normalization,
    PipelineConfig, VectorizeOptions,
};
pub use inference::{InferenceEngine, InferenceReport, SkippedTile};
pub use io::Source;
pub use pipeline::{Pipeline, PipelineOutput, run_pipeline};

pub use ardhi_model_provider as model;
pub use ardhi_types as types;
pub use tokio_util::sync::CancellationToken;
