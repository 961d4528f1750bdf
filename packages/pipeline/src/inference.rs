//! Batched segmentation inference over tiles.
//!
//! Tiles are grouped into NCHW batches and handed to the model on a bounded
//! pool of blocking workers. Each resulting mask reuses its tile's CRS and
//! transform verbatim.

use crate::config::{FailurePolicy, InferenceOptions, Normalization};
use ardhi_model_provider::{Prediction, SegmentationModel};
use ardhi_types::{Mask, PipelineError, PipelineResult, Raster, Tile, TileIndex};
use futures::{FutureExt, StreamExt, future::BoxFuture, stream::FuturesUnordered};
use ndarray::{Array2, Array4, ArrayView3, Axis, s};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// Bands fed to the model: R, G, B.
pub const REQUIRED_BANDS: usize = 3;

const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// A tile dropped under [`FailurePolicy::Skip`].
#[derive(Serialize, Deserialize, JsonSchema, Clone, Debug, PartialEq)]
pub struct SkippedTile {
    pub tile: TileIndex,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct InferenceReport {
    /// Masks sorted by tile index.
    pub masks: Vec<Mask>,
    pub skipped: Vec<SkippedTile>,
}

pub struct InferenceEngine {
    model: Arc<dyn SegmentationModel>,
    options: InferenceOptions,
}

struct BatchOutcome {
    masks: Vec<Mask>,
    skipped: Vec<SkippedTile>,
}

impl InferenceEngine {
    pub fn new(model: Arc<dyn SegmentationModel>, options: InferenceOptions) -> Self {
        Self { model, options }
    }

    pub fn model_name(&self) -> &str {
        self.model.name()
    }

    /// Spatial size `(height, width)` the model sees for `tile`.
    fn target_size(&self, tile: &Tile) -> PipelineResult<(usize, usize)> {
        let (h, w) = (tile.height() as usize, tile.width() as usize);
        if let Some((mh, mw)) = self.model.input_size() {
            let (mh, mw) = (mh as usize, mw as usize);
            if h > mh || w > mw {
                return Err(PipelineError::InvalidConfig(format!(
                    "{} is {}x{} but model {} accepts at most {}x{}",
                    tile.index,
                    w,
                    h,
                    self.model.name(),
                    mw,
                    mh
                )));
            }
            return Ok((mh, mw));
        }
        if self.options.pad_edge_tiles {
            let size = tile.size as usize;
            Ok((size.max(h), size.max(w)))
        } else {
            Ok((h, w))
        }
    }

    /// Groups tiles into batches of at most `batch_size` sharing one input shape.
    fn plan_batches(&self, tiles: Vec<Tile>) -> PipelineResult<Vec<(Vec<Tile>, (usize, usize))>> {
        let mut batches: Vec<(Vec<Tile>, (usize, usize))> = Vec::new();
        for tile in tiles {
            let found = tile.raster.band_count();
            if found < REQUIRED_BANDS {
                return Err(PipelineError::UnsupportedBandCount {
                    tile: tile.index,
                    found,
                    required: REQUIRED_BANDS,
                });
            }
            let target = self.target_size(&tile)?;
            match batches.last_mut() {
                Some((batch, shape))
                    if *shape == target && batch.len() < self.options.batch_size =>
                {
                    batch.push(tile)
                }
                _ => batches.push((vec![tile], target)),
            }
        }
        Ok(batches)
    }

    /// Runs the model over every tile and returns one mask per tile that
    /// succeeded. Under the abort policy any failure fails the call.
    #[tracing::instrument(name = "inference", skip(self, tiles, cancel), fields(model = %self.model.name()), level = "debug")]
    pub async fn run(
        &self,
        tiles: impl IntoIterator<Item = Tile>,
        cancel: &CancellationToken,
    ) -> PipelineResult<InferenceReport> {
        let batches = self.plan_batches(tiles.into_iter().collect())?;
        let tile_count: usize = batches.iter().map(|(b, _)| b.len()).sum();
        tracing::info!(
            "Running {} on {} tiles in {} batches ({} workers)",
            self.model.name(),
            tile_count,
            batches.len(),
            self.options.workers
        );

        let sem = Arc::new(Semaphore::new(std::cmp::max(1, self.options.workers)));
        let mut tasks: FuturesUnordered<BoxFuture<'static, PipelineResult<BatchOutcome>>> =
            FuturesUnordered::new();

        for (batch_no, (batch, target)) in batches.into_iter().enumerate() {
            let sem = sem.clone();
            let cancel = cancel.clone();
            let model = self.model.clone();
            let normalization = self.options.normalization;
            let policy = self.options.failure_policy;
            tasks.push(
                async move {
                    let _permit = sem
                        .acquire_owned()
                        .await
                        .map_err(|_| PipelineError::Cancelled)?;
                    if cancel.is_cancelled() {
                        return Err(PipelineError::Cancelled);
                    }
                    tracing::debug!("Batch {} started with {} tiles", batch_no, batch.len());
                    match tokio::task::spawn_blocking(move || {
                        run_batch(model.as_ref(), batch, target, normalization, policy)
                    })
                    .await
                    {
                        Ok(outcome) => outcome,
                        Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
                        Err(_) => Err(PipelineError::Cancelled),
                    }
                }
                .boxed(),
            );
        }

        let mut report = InferenceReport::default();
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                next = tasks.next() => next,
            };
            let Some(outcome) = next else { break };
            let outcome = outcome?;
            report.masks.extend(outcome.masks);
            report.skipped.extend(outcome.skipped);
        }

        report.masks.sort_by_key(|m| m.index);
        report.skipped.sort_by_key(|s| s.tile);
        if !report.skipped.is_empty() {
            tracing::warn!(
                "{} of {} tiles skipped after inference failures",
                report.skipped.len(),
                tile_count
            );
        }
        Ok(report)
    }
}

fn run_batch(
    model: &dyn SegmentationModel,
    tiles: Vec<Tile>,
    target: (usize, usize),
    normalization: Normalization,
    policy: FailurePolicy,
) -> PipelineResult<BatchOutcome> {
    match infer_tiles(model, &tiles, target, normalization) {
        Ok(masks) => Ok(BatchOutcome {
            masks,
            skipped: Vec::new(),
        }),
        Err(message) => match policy {
            FailurePolicy::Abort => Err(PipelineError::inference(
                tiles.iter().map(|t| t.index).collect(),
                message,
            )),
            FailurePolicy::Skip if tiles.len() == 1 => {
                tracing::warn!("Skipping {}: {}", tiles[0].index, message);
                Ok(BatchOutcome {
                    masks: Vec::new(),
                    skipped: vec![SkippedTile {
                        tile: tiles[0].index,
                        reason: message,
                    }],
                })
            }
            FailurePolicy::Skip => {
                tracing::debug!(
                    "Batch of {} tiles failed ({}), retrying tile by tile",
                    tiles.len(),
                    message
                );
                let mut outcome = BatchOutcome {
                    masks: Vec::new(),
                    skipped: Vec::new(),
                };
                for tile in tiles.chunks(1) {
                    match infer_tiles(model, tile, target, normalization) {
                        Ok(masks) => outcome.masks.extend(masks),
                        Err(reason) => {
                            tracing::warn!("Skipping {}: {}", tile[0].index, reason);
                            outcome.skipped.push(SkippedTile {
                                tile: tile[0].index,
                                reason,
                            });
                        }
                    }
                }
                Ok(outcome)
            }
        },
    }
}

fn infer_tiles(
    model: &dyn SegmentationModel,
    tiles: &[Tile],
    target: (usize, usize),
    normalization: Normalization,
) -> Result<Vec<Mask>, String> {
    let input = prepare_batch(tiles, target, normalization);
    let prediction = model.infer(input).map_err(|e| e.to_string())?;
    masks_from_prediction(tiles, target, prediction)
}

/// Stacks the first three bands of each tile into a zero-padded
/// `[batch, 3, height, width]` tensor.
pub fn prepare_batch(
    tiles: &[Tile],
    (height, width): (usize, usize),
    normalization: Normalization,
) -> Array4<f32> {
    let mut batch = Array4::<f32>::zeros((tiles.len(), REQUIRED_BANDS, height, width));
    for (i, tile) in tiles.iter().enumerate() {
        let (h, w) = (tile.height() as usize, tile.width() as usize);
        for band in 0..REQUIRED_BANDS {
            let source = tile.raster.band(band);
            let mut dest = batch.slice_mut(s![i, band, ..h, ..w]);
            dest.zip_mut_with(&source, |d, &v| *d = normalize(v, band, normalization));
        }
    }
    batch
}

fn normalize(value: u8, band: usize, normalization: Normalization) -> f32 {
    match normalization {
        Normalization::Raw => value as f32,
        Normalization::Unit => value as f32 / 255.0,
        Normalization::Imagenet => (value as f32 / 255.0 - IMAGENET_MEAN[band]) / IMAGENET_STD[band],
    }
}

/// Per-pixel index of the highest score; ties go to the lowest class index.
pub fn argmax_labels(scores: ArrayView3<'_, f32>, height: usize, width: usize) -> Array2<u8> {
    let classes = scores.dim().0;
    Array2::from_shape_fn((height, width), |(r, c)| {
        let mut best = 0usize;
        let mut best_score = scores[[0, r, c]];
        for class in 1..classes {
            let score = scores[[class, r, c]];
            if score > best_score || (best_score.is_nan() && !score.is_nan()) {
                best = class;
                best_score = score;
            }
        }
        best as u8
    })
}

fn masks_from_prediction(
    tiles: &[Tile],
    (height, width): (usize, usize),
    prediction: Prediction,
) -> Result<Vec<Mask>, String> {
    if prediction.batch_size() != tiles.len() {
        return Err(format!(
            "model returned {} predictions for {} tiles (shape {:?})",
            prediction.batch_size(),
            tiles.len(),
            prediction.shape()
        ));
    }
    if prediction.spatial_dims() != (height, width) {
        return Err(format!(
            "model output is {:?}, expected spatial size {}x{}",
            prediction.shape(),
            height,
            width
        ));
    }
    if let Prediction::Scores(scores) = &prediction {
        let classes = scores.dim().1;
        if classes == 0 || classes > u8::MAX as usize + 1 {
            return Err(format!("model returned {classes} classes, expected 1..=256"));
        }
    }

    let masks = tiles
        .iter()
        .enumerate()
        .map(|(i, tile)| {
            let (h, w) = (tile.height() as usize, tile.width() as usize);
            let labels = match &prediction {
                Prediction::Scores(scores) => argmax_labels(scores.index_axis(Axis(0), i), h, w),
                Prediction::Labels(labels) => labels.slice(s![i, ..h, ..w]).to_owned(),
            };
            Mask {
                index: tile.index,
                raster: Raster::from_band(labels, tile.raster.crs, tile.raster.transform),
            }
        })
        .collect();
    Ok(masks)
}
