/// # ONNX Runtime Segmentation Backend
/// UNet-like models with one image input and one score or label output
use crate::execution_providers::{get_ep_info, is_initialized};
use crate::segmentation::{
    ModelError, Prediction, SegmentationModel, label_from_f32, label_from_i64, labels_from_indices,
};
use ndarray::{Array4, ArrayViewD, Ix3, Ix4};
use ort::{inputs, session::Session, value::Value};
use std::path::Path;
use std::sync::Mutex;

/// ONNX Runtime session bundled with the metadata the pipeline needs.
///
/// ORT sessions are run through `&mut`, so the session sits behind a mutex;
/// this is also the gate that keeps device-bound calls from overlapping.
pub struct OnnxSegmentationModel {
    session: Mutex<Session>,
    name: String,
    pub input_name: String,
    pub output_name: String,
    input_size: Option<(u32, u32)>,
    /// The execution providers that are actually active
    pub ep_active: Vec<String>,
    /// Whether GPU/NPU acceleration is active
    pub accelerated: bool,
}

impl OnnxSegmentationModel {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ModelError> {
        let path = path.as_ref();
        let session = Session::builder()
            .and_then(|builder| builder.commit_from_file(path))
            .map_err(|e| ModelError::Load {
                source_name: path.display().to_string(),
                message: e.to_string(),
            })?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "onnx".to_string());
        Self::from_session(session, name)
    }

    pub fn from_memory(bytes: &[u8], name: impl Into<String>) -> Result<Self, ModelError> {
        let name = name.into();
        let session = Session::builder()
            .and_then(|builder| builder.commit_from_memory(bytes))
            .map_err(|e| ModelError::Load {
                source_name: name.clone(),
                message: e.to_string(),
            })?;
        Self::from_session(session, name)
    }

    fn from_session(session: Session, name: String) -> Result<Self, ModelError> {
        let ep_info = get_ep_info().unwrap_or_default();
        if !is_initialized() {
            tracing::warn!(
                "ORT not initialized - call initialize_ort() at startup for GPU acceleration"
            );
        }

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .ok_or_else(|| ModelError::Load {
                source_name: name.clone(),
                message: "model declares no inputs".to_string(),
            })?;
        let output_name = session
            .outputs
            .first()
            .map(|o| o.name.clone())
            .ok_or_else(|| ModelError::Load {
                source_name: name.clone(),
                message: "model declares no outputs".to_string(),
            })?;
        let input_size = determine_input_size(&session, &input_name);

        tracing::info!(
            model = %name,
            input = %input_name,
            output = %output_name,
            ?input_size,
            providers = ?ep_info.active_providers,
            "Loaded ONNX segmentation model"
        );

        Ok(Self {
            session: Mutex::new(session),
            name,
            input_name,
            output_name,
            input_size,
            ep_active: ep_info.active_providers,
            accelerated: ep_info.accelerated,
        })
    }
}

/// Fixed `(height, width)` of an NCHW input, `None` when either axis is dynamic.
fn determine_input_size(session: &Session, input_name: &str) -> Option<(u32, u32)> {
    let input = session.inputs.iter().find(|i| i.name == input_name)?;
    let dims = input.input_type.tensor_shape()?;
    let d = dims.len();
    if d < 2 {
        return None;
    }
    let (h, w) = (dims[d - 2], dims[d - 1]);
    (h > 0 && w > 0).then_some((h as u32, w as u32))
}

fn scores_from_view(view: ArrayViewD<'_, f32>) -> Result<Prediction, ModelError> {
    let found = view.shape().to_vec();
    match found.len() {
        // [B, C, H, W]
        4 => Ok(Prediction::Scores(
            view.into_dimensionality::<Ix4>()?.to_owned(),
        )),
        // [B, H, W] - already class indices
        3 => {
            let indices = view.into_dimensionality::<Ix3>()?;
            Ok(Prediction::Labels(labels_from_indices(indices, label_from_f32)?))
        }
        _ => Err(ModelError::Shape {
            found,
            message: "expected [B, C, H, W] scores or [B, H, W] labels".to_string(),
        }),
    }
}

impl SegmentationModel for OnnxSegmentationModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn input_size(&self) -> Option<(u32, u32)> {
        self.input_size
    }

    fn infer(&self, batch: Array4<f32>) -> Result<Prediction, ModelError> {
        let value = Value::from_array(batch)?;
        let mut session = self
            .session
            .lock()
            .map_err(|_| ModelError::Device("ONNX session mutex poisoned".to_string()))?;
        let outputs = session.run(inputs![self.input_name.as_str() => value])?;
        let output = &outputs[self.output_name.as_str()];

        if let Ok(scores) = output.try_extract_array::<f32>() {
            return scores_from_view(scores);
        }

        // DeepLab style exports emit int64 class indices
        let labels = output.try_extract_array::<i64>()?;
        let found = labels.shape().to_vec();
        if found.len() != 3 {
            return Err(ModelError::Shape {
                found,
                message: "integer outputs must be [B, H, W] labels".to_string(),
            });
        }
        let indices = labels.into_dimensionality::<Ix3>()?;
        Ok(Prediction::Labels(labels_from_indices(indices, label_from_i64)?))
    }
}
