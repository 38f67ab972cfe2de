//! Compute backends.
//!
//! CPU (`ndarray`) by default; the `wgpu` feature moves both training and
//! serving to the GPU.

use burn::backend::Autodiff;

#[cfg(not(feature = "wgpu"))]
pub type ServeBackend = burn::backend::NdArray;

#[cfg(feature = "wgpu")]
pub type ServeBackend = burn::backend::Wgpu;

/// Serving backend with gradient tracking
pub type TrainBackend = Autodiff<ServeBackend>;

pub type Device = <ServeBackend as burn::tensor::backend::Backend>::Device;

pub fn default_device() -> Device {
    Device::default()
}
