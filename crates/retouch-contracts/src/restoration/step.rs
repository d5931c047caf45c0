use serde::{Deserialize, Serialize};

use super::image::ImageRef;
use super::plan::PlanStep;

/// A completed plan step: the goal, the prompt the gateway wrote for it, and
/// the image before and after the edit. Built once, never changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestorationStep {
    step: u32,
    goal: String,
    prompt: String,
    before_image: ImageRef,
    after_image: ImageRef,
}

impl RestorationStep {
    pub fn new(
        plan_step: &PlanStep,
        prompt: impl Into<String>,
        before_image: ImageRef,
        after_image: ImageRef,
    ) -> Self {
        Self {
            step: plan_step.step,
            goal: plan_step.goal.clone(),
            prompt: prompt.into(),
            before_image,
            after_image,
        }
    }

    pub fn step(&self) -> u32 {
        self.step
    }

    pub fn goal(&self) -> &str {
        &self.goal
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn before_image(&self) -> &ImageRef {
        &self.before_image
    }

    pub fn after_image(&self) -> &ImageRef {
        &self.after_image
    }
}
