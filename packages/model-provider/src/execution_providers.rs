//! Execution Provider Configuration for ONNX Runtime
//!
//! Registers the best available execution providers (EPs) once per process,
//! before any segmentation session is created. Sessions built afterwards pick
//! the registered EPs up automatically and fall back to CPU.
//!
//! Preference order: TensorRT > CUDA > CoreML > DirectML > XNNPACK > CPU.
//! Every EP is behind a cargo feature of the same name; without `local-ml`
//! initialization is a no-op that reports CPU only.
//!
//! ```ignore
//! let info = ardhi_model_provider::initialize_ort();
//! let model = OnnxSegmentationModel::from_file("unet.onnx")?;
//! ```

use std::sync::OnceLock;

/// Information about the active execution providers after initialization
#[derive(Debug, Clone, Default)]
pub struct ExecutionProviderInfo {
    /// List of active execution providers (in priority order)
    pub active_providers: Vec<String>,
    /// Whether any GPU/NPU acceleration is active
    pub accelerated: bool,
    /// Warnings during initialization
    pub warnings: Vec<String>,
}

/// Set exactly once, by the first `initialize_ort()` call
static EP_INFO: OnceLock<ExecutionProviderInfo> = OnceLock::new();

/// Initialize ONNX Runtime with the best available execution providers.
///
/// Safe to call multiple times - subsequent calls return the cached info.
pub fn initialize_ort() -> ExecutionProviderInfo {
    EP_INFO.get_or_init(do_initialize_ort).clone()
}

pub fn is_initialized() -> bool {
    EP_INFO.get().is_some()
}

/// Current execution provider info, `None` before `initialize_ort()`.
pub fn get_ep_info() -> Option<ExecutionProviderInfo> {
    EP_INFO.get().cloned()
}

#[cfg(feature = "local-ml")]
fn do_initialize_ort() -> ExecutionProviderInfo {
    #[allow(unused_imports)]
    use tracing::{info, warn};

    let mut active_providers = Vec::new();
    #[allow(unused_mut)]
    let mut warnings: Vec<String> = Vec::new();
    #[allow(unused_mut)]
    let mut eps: Vec<ort::execution_providers::ExecutionProviderDispatch> = Vec::new();

    macro_rules! register_ep {
        ($feature:literal, $provider:ty, $label:literal, $missing:literal) => {
            #[cfg(feature = $feature)]
            {
                use ort::execution_providers::ExecutionProvider;
                let provider = <$provider>::default();
                if provider.is_available().unwrap_or(false) {
                    info!("{} execution provider available", $label);
                    eps.push(provider.build());
                    active_providers.push($label.to_string());
                } else {
                    warn!("{}", $missing);
                    warnings.push($missing.to_string());
                }
            }
        };
    }

    register_ep!(
        "tensorrt",
        ort::execution_providers::TensorRTExecutionProvider,
        "TensorRT",
        "TensorRT feature enabled but runtime not available"
    );
    register_ep!(
        "cuda",
        ort::execution_providers::CUDAExecutionProvider,
        "CUDA",
        "CUDA feature enabled but runtime not available"
    );
    register_ep!(
        "coreml",
        ort::execution_providers::CoreMLExecutionProvider,
        "CoreML",
        "CoreML feature enabled but not on Apple platform"
    );
    register_ep!(
        "directml",
        ort::execution_providers::DirectMLExecutionProvider,
        "DirectML",
        "DirectML feature enabled but not on Windows"
    );
    register_ep!(
        "xnnpack",
        ort::execution_providers::XNNPACKExecutionProvider,
        "XNNPACK",
        "XNNPACK feature enabled but not available"
    );

    // CPU is always available as final fallback
    active_providers.push("CPU".to_string());
    let accelerated = active_providers.iter().any(|p| p != "CPU");

    if eps.is_empty() {
        info!("No GPU/NPU acceleration available, using CPU");
        let _ = ort::init().commit();
    } else {
        info!(
            "Initializing ORT with execution providers: {:?}",
            active_providers
        );
        let _ = ort::init().with_execution_providers(eps).commit();
    }

    ExecutionProviderInfo {
        active_providers,
        accelerated,
        warnings,
    }
}

#[cfg(not(feature = "local-ml"))]
fn do_initialize_ort() -> ExecutionProviderInfo {
    ExecutionProviderInfo {
        active_providers: vec!["CPU (local-ml feature disabled)".to_string()],
        accelerated: false,
        warnings: vec!["local-ml feature not enabled".to_string()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialize_idempotent() {
        let info1 = initialize_ort();
        let info2 = initialize_ort();
        assert_eq!(info1.active_providers, info2.active_providers);
        assert!(is_initialized());
        assert!(get_ep_info().is_some());
    }

    #[test]
    fn test_cpu_always_available() {
        let info = initialize_ort();
        assert!(info.active_providers.iter().any(|p| p.contains("CPU")));
    }
}
