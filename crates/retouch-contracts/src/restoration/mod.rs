mod error;
mod image;
mod plan;
mod state;
mod status;
mod step;

pub use error::RestoreError;
pub use image::{extension_for_mime, mime_for_path, ImageRef};
pub use plan::{parse_plan, validate_plan, PlanStep, PlanValidationError};
pub use state::RunState;
pub use status::AppStatus;
pub use step::RestorationStep;
