mod registry;
mod selectors;

pub use registry::{ModelRegistry, ModelSpec, CAP_IMAGE_EDIT, CAP_VISION};
pub use selectors::{ModelSelection, ModelSelector};
