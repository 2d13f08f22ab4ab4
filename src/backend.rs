//! Backend abstraction - Multi-backend support
//!
//! CUDA (GPU) is used when the `cuda` feature is compiled in, NdArray (CPU)
//! otherwise. When CUDA is compiled in but no GPU is visible at runtime the
//! report says so and training still runs on whatever device Burn selects.

use burn::backend::Autodiff;
use serde::{Deserialize, Serialize};

// --------------------------------------------------------------------------------
// BACKEND SELECTION: CUDA (preferred) or NdArray (fallback)
// --------------------------------------------------------------------------------

#[cfg(feature = "cuda")]
pub type DefaultBackend = burn_cuda::Cuda;

#[cfg(all(not(feature = "cuda"), any(feature = "ndarray", feature = "cpu")))]
pub type DefaultBackend = burn_ndarray::NdArray;

#[cfg(all(not(feature = "cuda"), not(feature = "ndarray"), not(feature = "cpu")))]
compile_error!("At least one backend (cuda, ndarray, or cpu) must be enabled!");

/// The default autodiff backend for training
pub type TrainingBackend = Autodiff<DefaultBackend>;

/// Get the default device
pub fn default_device() -> <DefaultBackend as burn::tensor::backend::Backend>::Device {
    <DefaultBackend as burn::tensor::backend::Backend>::Device::default()
}

/// Get a human-readable name for the current backend
pub fn backend_name() -> &'static str {
    #[cfg(feature = "cuda")]
    {
        "CUDA (GPU)"
    }

    #[cfg(all(not(feature = "cuda"), any(feature = "ndarray", feature = "cpu")))]
    {
        "NdArray (CPU)"
    }
}

/// What the runtime ended up using
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackendReport {
    pub backend: String,
    pub gpu_detected: bool,
    pub fallback: bool,
}

/// Describe the active backend, logging a warning on GPU fallback
pub fn backend_report() -> BackendReport {
    let gpu_detected = has_nvidia_gpu();
    let fallback = cfg!(feature = "cuda") && !gpu_detected;

    if fallback {
        tracing::warn!("CUDA backend compiled in but no NVIDIA GPU detected");
    } else {
        tracing::info!("Burn backend initialized: {}", backend_name());
    }

    BackendReport {
        backend: backend_name().to_string(),
        gpu_detected,
        fallback,
    }
}

/// Check for an NVIDIA GPU without touching CUDA
fn has_nvidia_gpu() -> bool {
    #[cfg(target_os = "linux")]
    {
        std::path::Path::new("/proc/driver/nvidia/version").exists()
            || std::path::Path::new("/dev/nvidia0").exists()
    }

    #[cfg(not(target_os = "linux"))]
    {
        std::env::var("CUDA_VISIBLE_DEVICES").is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_name() {
        assert!(!backend_name().is_empty());
    }

    #[test]
    fn test_backend_report_consistent() {
        let report = backend_report();
        assert_eq!(report.backend, backend_name());
        if !cfg!(feature = "cuda") {
            assert!(!report.fallback);
        }
    }
}
