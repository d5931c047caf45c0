use std::cell::RefCell;
use std::rc::Rc;

use anyhow::Result;
use retouch_contracts::events::{
    EventPayload, EventWriter, OBSERVER_ERROR, PLAN_RECEIVED, PROGRESS, PROMPT_GENERATED,
    RUN_FAILED, RUN_FINISHED, RUN_RESET, RUN_STARTED, STATUS_CHANGED, STEP_COMPLETED,
};
use retouch_contracts::restoration::{
    validate_plan, AppStatus, ImageRef, RestorationStep, RestoreError, RunState,
};
use serde_json::{json, Value};

use crate::gateway::{error_chain_text, RestorationGateway};

const MAX_ERROR_CHARS: usize = 600;
pub const PLANNING_MESSAGE: &str = "Analyzing photo and drafting a restoration plan...";

/// Receives the run as it happens. Every callback sees the state after the
/// change it reports.
///
/// A failing observer is journaled and skipped; it never stops a run.
pub trait RunObserver {
    fn status_changed(&mut self, _state: &RunState) -> Result<()> {
        Ok(())
    }

    fn progress(&mut self, _state: &RunState, _message: &str) -> Result<()> {
        Ok(())
    }

    fn plan_received(&mut self, _state: &RunState) -> Result<()> {
        Ok(())
    }

    fn step_completed(&mut self, _state: &RunState, _step: &RestorationStep) -> Result<()> {
        Ok(())
    }
}

impl<T: RunObserver> RunObserver for Rc<RefCell<T>> {
    fn status_changed(&mut self, state: &RunState) -> Result<()> {
        self.borrow_mut().status_changed(state)
    }

    fn progress(&mut self, state: &RunState, message: &str) -> Result<()> {
        self.borrow_mut().progress(state, message)
    }

    fn plan_received(&mut self, state: &RunState) -> Result<()> {
        self.borrow_mut().plan_received(state)
    }

    fn step_completed(&mut self, state: &RunState, step: &RestorationStep) -> Result<()> {
        self.borrow_mut().step_completed(state, step)
    }
}

/// Drives one restoration at a time: plan, then prompt and edit per step,
/// each edit starting from the previous result.
pub struct Restorer {
    gateway: Box<dyn RestorationGateway>,
    journal: EventWriter,
    state: RunState,
    observers: Vec<Box<dyn RunObserver>>,
    last_error: Option<RestoreError>,
}

impl Restorer {
    pub fn new(gateway: Box<dyn RestorationGateway>, journal: EventWriter) -> Self {
        Self {
            gateway,
            journal,
            state: RunState::new(),
            observers: Vec::new(),
            last_error: None,
        }
    }

    pub fn add_observer(&mut self, observer: Box<dyn RunObserver>) {
        self.observers.push(observer);
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn status(&self) -> AppStatus {
        self.state.status()
    }

    pub fn journal(&self) -> &EventWriter {
        &self.journal
    }

    pub fn gateway_name(&self) -> &str {
        self.gateway.name()
    }

    /// The error that ended the latest run, if it failed.
    pub fn last_error(&self) -> Option<&RestoreError> {
        self.last_error.as_ref()
    }

    /// Runs a full restoration and returns the status it ended in.
    ///
    /// Without an image nothing happens. Failures inside the run end it in
    /// `error` and are kept in [`Restorer::last_error`]; only a refused start
    /// or a broken journal come back as `Err`.
    pub fn start(
        &mut self,
        image: Option<ImageRef>,
        instructions: &str,
    ) -> Result<AppStatus, RestoreError> {
        let Some(image) = image else {
            return Ok(self.state.status());
        };
        self.state.begin(image, instructions)?;
        self.last_error = None;

        match self.run() {
            Ok(()) => Ok(self.state.status()),
            Err(err @ RestoreError::Journal(_)) => {
                // Only the journal is broken; observers still hear how the run ended.
                let _ = self.abort(err.clone());
                for observer in &mut self.observers {
                    let _ = observer.status_changed(&self.state);
                }
                Err(err)
            }
            Err(err) => {
                self.abort(err)?;
                self.publish_status()?;
                Ok(self.state.status())
            }
        }
    }

    /// Back to `idle`. Allowed from any state.
    pub fn reset(&mut self) -> Result<(), RestoreError> {
        let previous = self.state.status();
        self.state.reset();
        self.last_error = None;
        self.emit(RUN_RESET, json!({ "from": previous.as_str() }))?;
        self.publish_status()
    }

    fn run(&mut self) -> Result<(), RestoreError> {
        let instructions = self.state.instructions().to_string();
        let original = self
            .state
            .original()
            .cloned()
            .ok_or_else(|| RestoreError::Invariant("run started without an image".to_string()))?;
        self.emit(
            RUN_STARTED,
            json!({
                "gateway": self.gateway.name(),
                "instructions": instructions,
                "image": {
                    "mime_type": original.mime_type(),
                    "bytes": original.len(),
                    "digest": original.digest(),
                },
            }),
        )?;
        self.publish_status()?;

        self.publish_progress(PLANNING_MESSAGE.to_string())?;
        let plan = self
            .gateway
            .request_plan(&original, &instructions)
            .map_err(|err| RestoreError::Plan(error_chain_text(&err, MAX_ERROR_CHARS)))?;
        let plan = validate_plan(plan)?;
        self.state.accept_plan(plan.clone())?;
        self.emit(PLAN_RECEIVED, json!({ "steps": plan }))?;
        self.publish_status()?;
        self.notify(|observer, state| observer.plan_received(state))?;

        let total = plan.len();
        for (index, plan_step) in plan.iter().enumerate() {
            let position = index + 1;
            let current = self.state.current_image().cloned().ok_or_else(|| {
                RestoreError::Invariant("no image to continue from".to_string())
            })?;

            self.publish_progress(format!(
                "Step {position}/{total}: writing an edit prompt for '{}'...",
                plan_step.goal
            ))?;
            let prompt = self
                .gateway
                .request_edit_prompt(&current, &plan_step.goal, &instructions)
                .map_err(|err| RestoreError::Prompt {
                    step: plan_step.step,
                    message: error_chain_text(&err, MAX_ERROR_CHARS),
                })?;
            let prompt = prompt.trim().to_string();
            if prompt.is_empty() {
                return Err(RestoreError::Prompt {
                    step: plan_step.step,
                    message: "gateway returned an empty prompt".to_string(),
                });
            }
            self.emit(
                PROMPT_GENERATED,
                json!({ "step": plan_step.step, "goal": plan_step.goal, "prompt": prompt }),
            )?;

            self.publish_progress(format!("Step {position}/{total}: applying edit..."))?;
            let edited = self
                .gateway
                .request_image_edit(&current, &prompt)
                .map_err(|err| RestoreError::Edit {
                    step: plan_step.step,
                    message: error_chain_text(&err, MAX_ERROR_CHARS),
                })?;
            if edited.is_empty() {
                return Err(RestoreError::Edit {
                    step: plan_step.step,
                    message: "gateway returned an empty image".to_string(),
                });
            }

            let before_digest = current.digest();
            let after_digest = edited.digest();
            let mime_type = edited.mime_type().to_string();
            self.state
                .push_step(RestorationStep::new(plan_step, prompt, current, edited))?;
            self.emit(
                STEP_COMPLETED,
                json!({
                    "step": plan_step.step,
                    "goal": plan_step.goal,
                    "index": position,
                    "total": total,
                    "mime_type": mime_type,
                    "before_digest": before_digest,
                    "after_digest": after_digest,
                }),
            )?;
            self.notify(|observer, state| match state.steps().last() {
                Some(step) => observer.step_completed(state, step),
                None => Ok(()),
            })?;
        }

        self.state.finish()?;
        self.emit(RUN_FINISHED, json!({ "steps": self.state.steps().len() }))?;
        self.publish_status()
    }

    fn abort(&mut self, err: RestoreError) -> Result<(), RestoreError> {
        let message = err.to_string();
        if self.state.is_busy() {
            self.state.fail(message.clone())?;
        }
        let payload = json!({
            "kind": err.kind(),
            "step": err.step(),
            "error": message,
            "completed_steps": self.state.steps().len(),
        });
        self.last_error = Some(err);
        self.emit(RUN_FAILED, payload)
    }

    fn publish_status(&mut self) -> Result<(), RestoreError> {
        self.emit(
            STATUS_CHANGED,
            json!({
                "status": self.state.status().as_str(),
                "error": self.state.error(),
            }),
        )?;
        self.notify(|observer, state| observer.status_changed(state))
    }

    fn publish_progress(&mut self, message: String) -> Result<(), RestoreError> {
        self.state.set_progress(message.clone());
        self.emit(PROGRESS, json!({ "message": message }))?;
        self.notify(|observer, state| observer.progress(state, &message))
    }

    fn notify<F>(&mut self, mut call: F) -> Result<(), RestoreError>
    where
        F: FnMut(&mut dyn RunObserver, &RunState) -> Result<()>,
    {
        for (index, observer) in self.observers.iter_mut().enumerate() {
            if let Err(err) = call(observer.as_mut(), &self.state) {
                let payload = json!({
                    "observer": index,
                    "status": self.state.status().as_str(),
                    "error": error_chain_text(&err, MAX_ERROR_CHARS),
                });
                emit_to(&self.journal, OBSERVER_ERROR, payload)?;
            }
        }
        Ok(())
    }

    fn emit(&self, event_type: &str, payload: Value) -> Result<(), RestoreError> {
        emit_to(&self.journal, event_type, payload)
    }
}

fn emit_to(journal: &EventWriter, event_type: &str, payload: Value) -> Result<(), RestoreError> {
    let payload: EventPayload = match payload {
        Value::Object(map) => map,
        _ => EventPayload::new(),
    };
    journal
        .emit(event_type, payload)
        .map(|_| ())
        .map_err(|err| RestoreError::Journal(error_chain_text(&err, MAX_ERROR_CHARS)))
}
