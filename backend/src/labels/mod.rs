pub mod loader;
pub mod registry;

pub use registry::{normalize_code, LabelRegistry};
