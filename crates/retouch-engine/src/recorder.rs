use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use retouch_contracts::restoration::{AppStatus, ImageRef, RestorationStep, RunState};
use retouch_contracts::runs::summary::{
    new_run_id, now_utc_iso, write_summary, RunSummary, StepRecord,
};
use serde_json::{Map, Value};

use crate::restorer::RunObserver;

pub const SUMMARY_FILE: &str = "summary.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderLayout {
    /// Every run writes straight into the output directory. Step images left
    /// there by an earlier run are removed when a new run starts.
    Single,
    /// Each run gets its own `run-<id>` directory under the output directory.
    PerRun,
}

#[derive(Debug)]
struct ActiveRun {
    dir: PathBuf,
    summary: RunSummary,
}

/// Writes a run to disk as it is published: the original image, each step's
/// result and a `summary.json` rewritten after every change.
#[derive(Debug)]
pub struct RunRecorder {
    root: PathBuf,
    layout: RecorderLayout,
    run_id: String,
    gateway: Option<String>,
    active: Option<ActiveRun>,
}

impl RunRecorder {
    pub fn new(root: impl Into<PathBuf>, layout: RecorderLayout, run_id: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            layout,
            run_id: run_id.into(),
            gateway: None,
            active: None,
        }
    }

    pub fn with_gateway(mut self, gateway: impl Into<String>) -> Self {
        self.set_gateway(gateway);
        self
    }

    /// Gateway name written into summaries of runs that start from now on.
    pub fn set_gateway(&mut self, gateway: impl Into<String>) {
        self.gateway = Some(gateway.into());
    }

    /// Directory of the latest run, once one has started.
    pub fn run_dir(&self) -> Option<&Path> {
        self.active.as_ref().map(|run| run.dir.as_path())
    }

    pub fn summary(&self) -> Option<&RunSummary> {
        self.active.as_ref().map(|run| &run.summary)
    }

    pub fn summary_path(&self) -> Option<PathBuf> {
        self.run_dir().map(|dir| dir.join(SUMMARY_FILE))
    }

    fn begin_run(&mut self, state: &RunState) -> Result<()> {
        let (run_id, dir) = match self.layout {
            RecorderLayout::Single => (self.run_id.clone(), self.root.clone()),
            RecorderLayout::PerRun => {
                let run_id = new_run_id();
                let dir = self.root.join(&run_id);
                (run_id, dir)
            }
        };
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
        if self.layout == RecorderLayout::Single {
            clear_step_images(&dir)?;
        }

        let mut summary = RunSummary::new(run_id);
        summary.instructions = state.instructions().to_string();
        summary.gateway = self.gateway.clone();
        if let Some(original) = state.original() {
            let name = format!("original.{}", original.extension());
            write_image(&dir.join(&name), original)?;
            summary.original_image = Some(name);
        }
        self.active = Some(ActiveRun { dir, summary });
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        let Some(run) = &self.active else {
            return Ok(());
        };
        let mut extra = Map::new();
        extra.insert(
            "step_count".to_string(),
            Value::from(run.summary.steps.len()),
        );
        write_summary(&run.dir.join(SUMMARY_FILE), &run.summary, Some(&extra))
    }
}

impl RunObserver for RunRecorder {
    fn status_changed(&mut self, state: &RunState) -> Result<()> {
        let status = state.status();
        if status == AppStatus::Planning {
            self.begin_run(state)?;
        }
        let Some(run) = self.active.as_mut() else {
            return Ok(());
        };
        if status == AppStatus::Idle {
            // A reset leaves the last run on disk as it was.
            return Ok(());
        }
        run.summary.status = status;
        run.summary.error = state.error().map(str::to_string);
        if status.is_terminal() {
            run.summary.finished_at = Some(now_utc_iso());
        }
        self.flush()
    }

    fn plan_received(&mut self, state: &RunState) -> Result<()> {
        if let Some(run) = self.active.as_mut() {
            run.summary.plan = state.plan().to_vec();
        }
        self.flush()
    }

    fn step_completed(&mut self, _state: &RunState, step: &RestorationStep) -> Result<()> {
        let Some(run) = self.active.as_mut() else {
            return Ok(());
        };
        let before_image = match run.summary.steps.last() {
            Some(previous) => previous.after_image.clone(),
            None => run.summary.original_image.clone().unwrap_or_default(),
        };
        let after_image = format!("step-{:02}.{}", step.step(), step.after_image().extension());
        write_image(&run.dir.join(&after_image), step.after_image())?;
        run.summary.steps.push(StepRecord {
            step: step.step(),
            goal: step.goal().to_string(),
            prompt: step.prompt().to_string(),
            before_image,
            after_image,
            after_digest: step.after_image().digest(),
        });
        self.flush()
    }
}

/// Removes `step-NN.*` files so a shorter run never inherits a longer run's tail.
fn clear_step_images(dir: &Path) -> Result<()> {
    let entries =
        std::fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))?;
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        let is_step = name
            .to_str()
            .is_some_and(|name| name.starts_with("step-"));
        if is_step && entry.file_type()?.is_file() {
            std::fs::remove_file(entry.path())
                .with_context(|| format!("failed to remove {}", entry.path().display()))?;
        }
    }
    Ok(())
}

fn write_image(path: &Path, image: &ImageRef) -> Result<()> {
    std::fs::write(path, image.bytes())
        .with_context(|| format!("failed to write {}", path.display()))
}
