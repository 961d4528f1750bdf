use crate::constant::ConstantModel;
use crate::segmentation::{ModelError, SegmentationModel};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// Which implementation backs a model handle
#[derive(Serialize, Deserialize, JsonSchema, Clone, Debug, PartialEq)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum ModelBackend {
    /// ONNX export of the trained network, run through ONNX Runtime
    Onnx { path: PathBuf },
    /// Predicts one label everywhere; for wiring checks and tests
    Constant {
        label: u8,
        #[serde(default)]
        num_classes: Option<usize>,
    },
}

/// Resolved description of the model a pipeline run should use.
#[derive(Serialize, Deserialize, JsonSchema, Clone, Debug, PartialEq)]
pub struct ModelDescriptor {
    #[serde(flatten)]
    pub backend: ModelBackend,
    /// Optional human readable names indexed by class label
    #[serde(default)]
    pub class_labels: Option<Vec<String>>,
}

impl ModelDescriptor {
    pub fn onnx(path: impl Into<PathBuf>) -> Self {
        Self {
            backend: ModelBackend::Onnx { path: path.into() },
            class_labels: None,
        }
    }

    pub fn constant(label: u8) -> Self {
        Self {
            backend: ModelBackend::Constant {
                label,
                num_classes: None,
            },
            class_labels: None,
        }
    }

    /// Loads the model once; the returned handle is shared by every worker.
    pub fn load(&self) -> Result<Arc<dyn SegmentationModel>, ModelError> {
        match &self.backend {
            ModelBackend::Constant { label, num_classes } => {
                let mut model = ConstantModel::new(*label);
                if let Some(n) = num_classes {
                    model = model.with_num_classes(*n);
                }
                Ok(Arc::new(model))
            }
            #[cfg(feature = "local-ml")]
            ModelBackend::Onnx { path } => {
                crate::execution_providers::initialize_ort();
                Ok(Arc::new(crate::onnx::OnnxSegmentationModel::from_file(
                    path,
                )?))
            }
            #[cfg(not(feature = "local-ml"))]
            ModelBackend::Onnx { path } => Err(ModelError::Load {
                source_name: path.display().to_string(),
                message: "ONNX execution requires the 'local-ml' feature. Rebuild with --features local-ml".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_descriptor_from_json() {
        let descriptor: ModelDescriptor = serde_json::from_value(json!({
            "backend": "onnx",
            "path": "/models/buildings.onnx",
            "class_labels": ["background", "building"]
        }))
        .unwrap();
        assert_eq!(
            descriptor.backend,
            ModelBackend::Onnx {
                path: PathBuf::from("/models/buildings.onnx")
            }
        );
        assert_eq!(descriptor.class_labels.unwrap().len(), 2);
    }

    #[test]
    fn test_constant_descriptor_loads() {
        let model = ModelDescriptor::constant(1).load().unwrap();
        assert_eq!(model.name(), "constant-1");
        assert!(model.input_size().is_none());
    }

    #[cfg(not(feature = "local-ml"))]
    #[test]
    fn test_onnx_without_feature_is_load_error() {
        let err = ModelDescriptor::onnx("model.onnx").load().err().unwrap();
        assert!(matches!(err, ModelError::Load { .. }));
    }
}
