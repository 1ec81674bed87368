pub mod client;
pub mod upload;
pub mod wire;

#[cfg(test)]
pub(crate) mod stub;

pub use client::{GatewayError, GatewayState, InferenceGateway};
pub use upload::{ImageUpload, UploadError};
pub use wire::BackendPrediction;
