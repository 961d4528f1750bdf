use crate::artifacts::ArtifactStore;
use crate::config::PipelineConfig;
use crate::inference::{InferenceEngine, SkippedTile};
use crate::io::Source;
use crate::mosaic::mosaic;
use crate::tiler;
use crate::vectorize::vectorize;
use ardhi_model_provider::SegmentationModel;
use ardhi_types::{FeatureCollection, PipelineError, PipelineResult};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Result of one pipeline invocation.
#[derive(Serialize, Debug, Clone)]
pub struct PipelineOutput {
    pub run_id: Uuid,
    pub features: FeatureCollection,
    pub tile_count: usize,
    /// Tiles dropped under the skip failure policy; their area is background
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub skipped_tiles: Vec<SkippedTile>,
    /// Run directory, when artifacts are persisted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifacts_dir: Option<PathBuf>,
}

/// Tiler, inference, mosaic and vectorization wired together for one model.
pub struct Pipeline {
    config: PipelineConfig,
    model: Arc<dyn SegmentationModel>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, model: Arc<dyn SegmentationModel>) -> PipelineResult<Self> {
        config.validate()?;
        Ok(Self { config, model })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Runs the whole pipeline under a fresh run id.
    pub async fn run(
        &self,
        source: Source,
        cancel: CancellationToken,
    ) -> PipelineResult<PipelineOutput> {
        self.run_with_id(Uuid::new_v4(), source, cancel).await
    }

    #[tracing::instrument(name = "pipeline.run", skip(self, source, cancel), fields(run_id = %run_id, source = %source.name()))]
    pub async fn run_with_id(
        &self,
        run_id: Uuid,
        source: Source,
        cancel: CancellationToken,
    ) -> PipelineResult<PipelineOutput> {
        let started = Instant::now();
        let tile_size = self.config.tile_size;

        let raster = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
            raster = source.read() => raster?,
        };
        tracing::info!(
            "Read {}x{} raster with {} bands in {}",
            raster.width(),
            raster.height(),
            raster.band_count(),
            raster.crs
        );

        let tiles: Vec<_> = tiler::tiles(&raster, tile_size)?.collect();
        let tile_count = tiles.len();

        let store = match &self.config.artifacts_dir {
            Some(base) => Some(ArtifactStore::create(base, run_id).await?),
            None => None,
        };

        let engine = InferenceEngine::new(self.model.clone(), self.config.inference.clone());
        let report = engine.run(tiles, &cancel).await?;
        ensure_active(&cancel)?;

        if let Some(store) = &store {
            store.write_tiles(tiler::tiles(&raster, tile_size)?).await?;
            store.write_masks(&report.masks).await?;
        }

        let masks = report.masks;
        let strategy = self.config.mosaic.strategy;
        let merged = run_blocking(move || mosaic(&masks, strategy)).await?;
        ensure_active(&cancel)?;

        if let Some(store) = &store {
            store.write_mosaic(&merged).await?;
        }

        let options = self.config.vectorize.clone();
        let features = run_blocking(move || vectorize(&merged, &options)).await?;
        ensure_active(&cancel)?;

        tracing::info!(
            "Run finished: {} tiles, {} skipped, {} features in {:.2?}",
            tile_count,
            report.skipped.len(),
            features.len(),
            started.elapsed()
        );

        Ok(PipelineOutput {
            run_id,
            features,
            tile_count,
            skipped_tiles: report.skipped,
            artifacts_dir: store.map(|s| s.root().to_path_buf()),
        })
    }
}

fn ensure_active(cancel: &CancellationToken) -> PipelineResult<()> {
    if cancel.is_cancelled() {
        tracing::info!("Run cancelled");
        return Err(PipelineError::Cancelled);
    }
    Ok(())
}

async fn run_blocking<T, F>(f: F) -> PipelineResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> PipelineResult<T> + Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result,
        Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
        Err(_) => Err(PipelineError::Cancelled),
    }
}

/// `(source, tile_size, model) -> FeatureCollection` with default settings.
pub async fn run_pipeline(
    source: Source,
    tile_size: u32,
    model: Arc<dyn SegmentationModel>,
) -> PipelineResult<FeatureCollection> {
    let config = PipelineConfig::default().with_tile_size(tile_size);
    let output = Pipeline::new(config, model)?
        .run(source, CancellationToken::new())
        .await?;
    Ok(output.features)
}
