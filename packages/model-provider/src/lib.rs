//! Segmentation model capability for the Ardhi pipeline
//!
//! - `SegmentationModel`: the trait the inference engine calls
//! - `ConstantModel`: constant-label test double
//! - `OnnxSegmentationModel`: ONNX Runtime backend (`local-ml` feature)
//! - `ModelDescriptor`: serializable handle description resolved by callers

pub mod constant;
pub mod execution_providers;
#[cfg(feature = "local-ml")]
pub mod onnx;
pub mod provider;
pub mod segmentation;

pub use constant::ConstantModel;
pub use execution_providers::{ExecutionProviderInfo, get_ep_info, initialize_ort, is_initialized};
#[cfg(feature = "local-ml")]
pub use onnx::OnnxSegmentationModel;
pub use provider::{ModelBackend, ModelDescriptor};
pub use segmentation::{ModelError, Prediction, SegmentationModel};
