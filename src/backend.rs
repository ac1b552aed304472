//! Backend Selector
//!
//! One burn backend per build, picked by cargo feature. Falls back to NdArray
//! when no feature (or more than one) is enabled.

use burn::backend::Autodiff;

#[cfg(all(feature = "cuda", not(feature = "gpu"), not(feature = "torch")))]
mod backend_impl {
    pub use burn::backend::cuda_jit::{Cuda, CudaDevice};
    pub type MyBackend = Cuda;
    pub const NAME: &str = "CUDA";

    pub fn get_device() -> CudaDevice {
        CudaDevice::new(0)
    }
}

#[cfg(all(feature = "gpu", not(feature = "cuda"), not(feature = "torch")))]
mod backend_impl {
    pub use burn::backend::wgpu::{Wgpu, WgpuDevice};
    pub type MyBackend = Wgpu<f32, i32>;
    pub const NAME: &str = "WGPU";

    pub fn get_device() -> WgpuDevice {
        WgpuDevice::BestAvailable
    }
}

#[cfg(all(feature = "torch", not(feature = "cuda"), not(feature = "gpu")))]
mod backend_impl {
    pub use burn::backend::libtorch::{LibTorch, LibTorchDevice};
    pub type MyBackend = LibTorch<f32>;
    pub const NAME: &str = "LibTorch";

    pub fn get_device() -> LibTorchDevice {
        LibTorchDevice::Cuda(0)
    }
}

#[cfg(not(any(
    all(feature = "cuda", not(feature = "gpu"), not(feature = "torch")),
    all(feature = "gpu", not(feature = "cuda"), not(feature = "torch")),
    all(feature = "torch", not(feature = "cuda"), not(feature = "gpu"))
)))]
mod backend_impl {
    pub use burn::backend::ndarray::{NdArray, NdArrayDevice};
    pub type MyBackend = NdArray;
    pub const NAME: &str = "CPU (NdArray)";

    pub fn get_device() -> NdArrayDevice {
        NdArrayDevice::Cpu
    }
}

pub use backend_impl::{get_device, MyBackend, NAME as BACKEND_NAME};

/// Backend with autodiff for training
pub type TrainBackend = Autodiff<MyBackend>;
