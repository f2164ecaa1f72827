#![recursion_limit = "256"]

use mnist_carbon::{logger::install_file_logger, training::ARTIFACT_DIR, Error};

#[cfg(any(
    feature = "ndarray",
    feature = "ndarray-blas-netlib",
    feature = "ndarray-blas-openblas",
    feature = "ndarray-blas-accelerate",
))]
mod ndarray {
    use burn::backend::{
        ndarray::{NdArray, NdArrayDevice},
        Autodiff,
    };
    use mnist_carbon::{training, Error};

    pub fn run() -> Result<f64, Error> {
        let device = NdArrayDevice::Cpu;
        training::run::<Autodiff<NdArray>>(device)
    }
}

#[cfg(feature = "tch-gpu")]
mod tch_gpu {
    use burn::backend::{
        libtorch::{LibTorch, LibTorchDevice},
        Autodiff,
    };
    use mnist_carbon::{training, Error};

    pub fn run() -> Result<f64, Error> {
        #[cfg(not(target_os = "macos"))]
        let device = LibTorchDevice::Cuda(0);
        #[cfg(target_os = "macos")]
        let device = LibTorchDevice::Mps;

        training::run::<Autodiff<LibTorch>>(device)
    }
}

#[cfg(feature = "wgpu")]
mod wgpu {
    use burn::backend::{
        wgpu::{Wgpu, WgpuDevice},
        Autodiff,
    };
    use mnist_carbon::{training, Error};

    pub fn run() -> Result<f64, Error> {
        let device = WgpuDevice::default();
        training::run::<Autodiff<Wgpu>>(device)
    }
}

#[cfg(feature = "tch-cpu")]
mod tch_cpu {
    use burn::backend::{
        libtorch::{LibTorch, LibTorchDevice},
        Autodiff,
    };
    use mnist_carbon::{training, Error};

    pub fn run() -> Result<f64, Error> {
        let device = LibTorchDevice::Cpu;
        training::run::<Autodiff<LibTorch>>(device)
    }
}

#[allow(unreachable_code)]
fn run() -> Result<f64, Error> {
    #[cfg(any(
        feature = "ndarray",
        feature = "ndarray-blas-netlib",
        feature = "ndarray-blas-openblas",
        feature = "ndarray-blas-accelerate",
    ))]
    return ndarray::run();

    #[cfg(feature = "tch-gpu")]
    return tch_gpu::run();

    #[cfg(feature = "tch-cpu")]
    return tch_cpu::run();

    #[cfg(feature = "wgpu")]
    return wgpu::run();

    unreachable!("At least one backend will be selected.")
}

fn main() -> Result<(), Error> {
    std::fs::create_dir_all(ARTIFACT_DIR)?;
    install_file_logger(&format!("{ARTIFACT_DIR}/training.log"));

    let emissions = run()?;
    println!("Emissions: {emissions} kg");

    Ok(())
}
