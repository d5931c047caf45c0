use anyhow::Result;
use retouch_contracts::restoration::{RestorationStep, RunState};
use retouch_engine::RunObserver;

/// Prints the run to stdout as it happens.
#[derive(Debug, Default)]
pub struct TerminalObserver;

impl RunObserver for TerminalObserver {
    fn status_changed(&mut self, state: &RunState) -> Result<()> {
        println!("[{}]", state.status());
        if let Some(error) = state.error() {
            println!("  {error}");
        }
        Ok(())
    }

    fn progress(&mut self, _state: &RunState, message: &str) -> Result<()> {
        println!("  {message}");
        Ok(())
    }

    fn plan_received(&mut self, state: &RunState) -> Result<()> {
        println!("Plan:");
        for step in state.plan() {
            println!("  {}. {}", step.step, step.goal);
        }
        Ok(())
    }

    fn step_completed(&mut self, state: &RunState, step: &RestorationStep) -> Result<()> {
        println!(
            "Step {} of {} done: {} ({} -> {})",
            step.step(),
            state.plan().len(),
            step.goal(),
            step.before_image().short_digest(),
            step.after_image().short_digest(),
        );
        Ok(())
    }
}
