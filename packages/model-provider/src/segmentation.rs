/// # Segmentation Model Capability
/// The pipeline only sees this trait; network architecture and weights stay behind it.
use ndarray::{Array3, Array4, ArrayView3};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Failed to load model from {source_name}: {message}")]
    Load {
        source_name: String,
        message: String,
    },

    #[error("Model backend error: {0}")]
    Backend(String),

    #[error("Unexpected model output shape {found:?}: {message}")]
    Shape { found: Vec<usize>, message: String },

    #[error("Execution device unavailable: {0}")]
    Device(String),
}

impl From<ndarray::ShapeError> for ModelError {
    fn from(err: ndarray::ShapeError) -> Self {
        ModelError::Backend(err.to_string())
    }
}

#[cfg(feature = "local-ml")]
impl From<ort::Error> for ModelError {
    fn from(err: ort::Error) -> Self {
        ModelError::Backend(err.to_string())
    }
}

/// Raw model output for one batch.
#[derive(Debug, Clone)]
pub enum Prediction {
    /// Per-class scores shaped `[batch, classes, height, width]`.
    Scores(Array4<f32>),
    /// Class labels already reduced by the model, shaped `[batch, height, width]`.
    Labels(Array3<u8>),
}

impl Prediction {
    pub fn batch_size(&self) -> usize {
        match self {
            Prediction::Scores(s) => s.dim().0,
            Prediction::Labels(l) => l.dim().0,
        }
    }

    /// `(height, width)` of each prediction.
    pub fn spatial_dims(&self) -> (usize, usize) {
        match self {
            Prediction::Scores(s) => (s.dim().2, s.dim().3),
            Prediction::Labels(l) => (l.dim().1, l.dim().2),
        }
    }

    pub fn shape(&self) -> Vec<usize> {
        match self {
            Prediction::Scores(s) => s.shape().to_vec(),
            Prediction::Labels(l) => l.shape().to_vec(),
        }
    }
}

/// Narrows class indices to `u8` labels. Any index that is not an integer in
/// `0..=255` fails the whole batch.
pub fn labels_from_indices<T, F>(indices: ArrayView3<'_, T>, to_label: F) -> Result<Array3<u8>, ModelError>
where
    T: Copy + std::fmt::Display,
    F: Fn(T) -> Option<u8>,
{
    let mut labels = Array3::<u8>::zeros(indices.raw_dim());
    for (label, &index) in labels.iter_mut().zip(indices.iter()) {
        *label = to_label(index).ok_or_else(|| ModelError::Shape {
            found: indices.shape().to_vec(),
            message: format!("class index {index} is outside 0..=255"),
        })?;
    }
    Ok(labels)
}

/// Label for an `f32` class index.
pub fn label_from_f32(index: f32) -> Option<u8> {
    (index.fract() == 0.0 && (0.0..=255.0).contains(&index)).then_some(index as u8)
}

/// Label for an `i64` class index.
pub fn label_from_i64(index: i64) -> Option<u8> {
    u8::try_from(index).ok()
}

/// A loaded segmentation network.
///
/// `infer` receives an NCHW `f32` batch (channels R, G, B) and returns one
/// prediction per batch item with the same spatial size. Implementations must
/// be safe to call from several worker threads; backends bound to a device
/// that cannot run concurrent calls serialize internally.
pub trait SegmentationModel: Send + Sync {
    fn name(&self) -> &str;

    /// Spatial size `(height, width)` the network requires, if fixed.
    fn input_size(&self) -> Option<(u32, u32)> {
        None
    }

    fn infer(&self, batch: Array4<f32>) -> Result<Prediction, ModelError>;
}
