pub mod callback;
pub mod data;
pub mod logger;
pub mod model;
pub mod tracker;
pub mod training;

mod error;

pub use error::*;

#[cfg(test)]
pub type TestBackend = burn::backend::NdArray<f32>;
