use super::error::RestoreError;
use super::image::ImageRef;
use super::plan::PlanStep;
use super::status::AppStatus;
use super::step::RestorationStep;

/// Observable state of the current restoration run.
///
/// Only the run loop mutates it. Every mutator checks the lifecycle and the
/// step-chaining rules, so an observer holding a `&RunState` always sees a
/// consistent prefix of the run.
#[derive(Debug, Clone, Default)]
pub struct RunState {
    status: AppStatus,
    error: Option<String>,
    progress: Option<String>,
    instructions: String,
    original: Option<ImageRef>,
    plan: Vec<PlanStep>,
    steps: Vec<RestorationStep>,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> AppStatus {
        self.status
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn progress(&self) -> Option<&str> {
        self.progress.as_deref()
    }

    pub fn instructions(&self) -> &str {
        &self.instructions
    }

    pub fn original(&self) -> Option<&ImageRef> {
        self.original.as_ref()
    }

    pub fn plan(&self) -> &[PlanStep] {
        &self.plan
    }

    pub fn steps(&self) -> &[RestorationStep] {
        &self.steps
    }

    pub fn is_busy(&self) -> bool {
        self.status.is_busy()
    }

    /// Image the next edit starts from: the latest result, or the upload.
    pub fn current_image(&self) -> Option<&ImageRef> {
        self.steps
            .last()
            .map(RestorationStep::after_image)
            .or(self.original.as_ref())
    }

    /// The plan step that runs next, if any remain.
    pub fn next_plan_step(&self) -> Option<&PlanStep> {
        self.plan.get(self.steps.len())
    }

    /// Starts a run. A finished run is cleared first; a run in flight is
    /// refused.
    pub fn begin(&mut self, original: ImageRef, instructions: &str) -> Result<(), RestoreError> {
        if self.status.is_busy() {
            return Err(RestoreError::Busy);
        }
        if self.status.is_terminal() {
            self.reset();
        }
        self.transition(AppStatus::Planning)?;
        self.instructions = instructions.trim().to_string();
        self.original = Some(original);
        Ok(())
    }

    pub fn set_progress(&mut self, message: impl Into<String>) {
        self.progress = Some(message.into());
    }

    pub fn accept_plan(&mut self, plan: Vec<PlanStep>) -> Result<(), RestoreError> {
        if plan.is_empty() {
            return Err(RestoreError::Invariant("plan has no steps".to_string()));
        }
        self.transition(AppStatus::Restoring)?;
        self.plan = plan;
        Ok(())
    }

    pub fn push_step(&mut self, step: RestorationStep) -> Result<&RestorationStep, RestoreError> {
        if self.status != AppStatus::Restoring {
            return Err(RestoreError::Invariant(format!(
                "cannot record a step while {}",
                self.status
            )));
        }
        let Some(expected) = self.next_plan_step() else {
            return Err(RestoreError::Invariant(format!(
                "plan has {} steps; step {} is one too many",
                self.plan.len(),
                step.step()
            )));
        };
        if expected.step != step.step() || expected.goal != step.goal() {
            return Err(RestoreError::Invariant(format!(
                "expected plan step {} next, got step {}",
                expected.step,
                step.step()
            )));
        }
        if self.current_image() != Some(step.before_image()) {
            return Err(RestoreError::Invariant(format!(
                "step {} does not start from the previous result",
                step.step()
            )));
        }
        self.steps.push(step);
        Ok(&self.steps[self.steps.len() - 1])
    }

    pub fn finish(&mut self) -> Result<(), RestoreError> {
        if self.steps.len() != self.plan.len() {
            return Err(RestoreError::Invariant(format!(
                "{} of {} planned steps completed",
                self.steps.len(),
                self.plan.len()
            )));
        }
        self.transition(AppStatus::Done)?;
        self.progress = None;
        Ok(())
    }

    /// Ends the run with an error. Published steps stay in place.
    pub fn fail(&mut self, message: impl Into<String>) -> Result<(), RestoreError> {
        self.transition(AppStatus::Error)?;
        self.error = Some(message.into());
        self.progress = None;
        Ok(())
    }

    /// Back to `idle` with nothing recorded. Safe to call in any state.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    fn transition(&mut self, next: AppStatus) -> Result<(), RestoreError> {
        if !self.status.can_transition_to(next) {
            return Err(RestoreError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{AppStatus, ImageRef, PlanStep, RestorationStep, RestoreError, RunState};

    fn image(byte: u8) -> ImageRef {
        ImageRef::new("image/png", vec![byte])
    }

    fn two_step_plan() -> Vec<PlanStep> {
        vec![
            PlanStep::new(1, "Remove scratches"),
            PlanStep::new(2, "Colorize"),
        ]
    }

    #[test]
    fn happy_path_walks_the_lifecycle() -> anyhow::Result<()> {
        let mut state = RunState::new();
        state.begin(image(0), "  keep the grain ")?;
        assert_eq!(state.status(), AppStatus::Planning);
        assert_eq!(state.instructions(), "keep the grain");

        state.accept_plan(two_step_plan())?;
        assert_eq!(state.status(), AppStatus::Restoring);
        assert_eq!(state.current_image(), Some(&image(0)));

        let plan = two_step_plan();
        state.push_step(RestorationStep::new(&plan[0], "fix scratches", image(0), image(1)))?;
        assert_eq!(state.current_image(), Some(&image(1)));
        state.push_step(RestorationStep::new(&plan[1], "add color", image(1), image(2)))?;

        state.set_progress("wrapping up");
        state.finish()?;
        assert_eq!(state.status(), AppStatus::Done);
        assert_eq!(state.steps().len(), 2);
        assert!(state.progress().is_none());
        Ok(())
    }

    #[test]
    fn refuses_to_begin_while_busy() -> anyhow::Result<()> {
        let mut state = RunState::new();
        state.begin(image(0), "")?;
        assert_eq!(state.begin(image(1), ""), Err(RestoreError::Busy));
        state.accept_plan(two_step_plan())?;
        assert_eq!(state.begin(image(1), ""), Err(RestoreError::Busy));
        Ok(())
    }

    #[test]
    fn begin_after_terminal_state_starts_clean() -> anyhow::Result<()> {
        let mut state = RunState::new();
        state.begin(image(0), "")?;
        state.fail("boom")?;
        state.begin(image(5), "again")?;
        assert_eq!(state.status(), AppStatus::Planning);
        assert!(state.error().is_none());
        assert!(state.steps().is_empty());
        assert_eq!(state.original(), Some(&image(5)));
        Ok(())
    }

    #[test]
    fn rejects_steps_that_break_the_chain() -> anyhow::Result<()> {
        let mut state = RunState::new();
        state.begin(image(0), "")?;
        state.accept_plan(two_step_plan())?;
        let plan = two_step_plan();

        let wrong_before = state.push_step(RestorationStep::new(&plan[0], "p", image(9), image(1)));
        assert!(matches!(wrong_before, Err(RestoreError::Invariant(_))));

        let out_of_order = state.push_step(RestorationStep::new(&plan[1], "p", image(0), image(1)));
        assert!(matches!(out_of_order, Err(RestoreError::Invariant(_))));

        state.push_step(RestorationStep::new(&plan[0], "p", image(0), image(1)))?;
        state.push_step(RestorationStep::new(&plan[1], "p", image(1), image(2)))?;
        let extra = state.push_step(RestorationStep::new(
            &PlanStep::new(3, "Sharpen"),
            "p",
            image(2),
            image(3),
        ));
        assert!(matches!(extra, Err(RestoreError::Invariant(_))));
        assert_eq!(state.steps().len(), 2);
        Ok(())
    }

    #[test]
    fn cannot_finish_early_or_skip_planning() -> anyhow::Result<()> {
        let mut state = RunState::new();
        assert!(matches!(
            state.accept_plan(two_step_plan()),
            Err(RestoreError::InvalidTransition { .. })
        ));
        state.begin(image(0), "")?;
        assert!(matches!(
            state.accept_plan(Vec::new()),
            Err(RestoreError::Invariant(_))
        ));
        state.accept_plan(two_step_plan())?;
        assert!(matches!(state.finish(), Err(RestoreError::Invariant(_))));
        Ok(())
    }

    #[test]
    fn failure_keeps_published_steps() -> anyhow::Result<()> {
        let mut state = RunState::new();
        state.begin(image(0), "")?;
        state.accept_plan(two_step_plan())?;
        let plan = two_step_plan();
        state.push_step(RestorationStep::new(&plan[0], "p", image(0), image(1)))?;
        state.set_progress("Step 2/2: applying edit...");
        state.fail("step 2: image edit failed")?;

        assert_eq!(state.status(), AppStatus::Error);
        assert_eq!(state.error(), Some("step 2: image edit failed"));
        assert_eq!(state.steps().len(), 1);
        assert!(state.progress().is_none());
        Ok(())
    }

    #[test]
    fn reset_is_idempotent_from_any_state() -> anyhow::Result<()> {
        let mut state = RunState::new();
        state.reset();
        assert_eq!(state.status(), AppStatus::Idle);

        state.begin(image(0), "x")?;
        state.fail("boom")?;
        state.reset();
        state.reset();
        assert_eq!(state.status(), AppStatus::Idle);
        assert!(state.error().is_none());
        assert!(state.steps().is_empty());
        assert!(state.plan().is_empty());
        assert!(state.original().is_none());
        Ok(())
    }
}
