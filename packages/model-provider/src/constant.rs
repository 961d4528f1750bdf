use crate::segmentation::{ModelError, Prediction, SegmentationModel};
use ndarray::{Array4, s};

/// Test double that predicts the same class for every pixel.
///
/// It answers with one-hot scores so callers exercise the same arg-max path
/// a real network takes.
#[derive(Debug, Clone)]
pub struct ConstantModel {
    pub label: u8,
    pub num_classes: usize,
    name: String,
}

impl ConstantModel {
    pub fn new(label: u8) -> Self {
        Self {
            label,
            num_classes: (label as usize + 1).max(2),
            name: format!("constant-{label}"),
        }
    }

    pub fn with_num_classes(mut self, num_classes: usize) -> Self {
        self.num_classes = num_classes.max(self.label as usize + 1);
        self
    }
}

impl SegmentationModel for ConstantModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn infer(&self, batch: Array4<f32>) -> Result<Prediction, ModelError> {
        let (n, _, h, w) = batch.dim();
        let mut scores = Array4::<f32>::zeros((n, self.num_classes, h, w));
        scores
            .slice_mut(s![.., self.label as usize, .., ..])
            .fill(1.0);
        Ok(Prediction::Scores(scores))
    }
}
