use std::cell::RefCell;
use std::io::{self, BufRead, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::Result;
use retouch_contracts::chat::{parse_intent, Intent, CHAT_HELP_COMMANDS};
use retouch_contracts::events::EventWriter;
use retouch_contracts::restoration::{AppStatus, ImageRef, RestoreError};
use retouch_contracts::runs::summary::new_run_id;
use retouch_engine::{build_gateway, GatewayConfig, RecorderLayout, Restorer, RunRecorder};

use crate::report::export_report;
use crate::terminal::TerminalObserver;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatFlow {
    Continue,
    Quit,
}

/// Interactive restoration session. Each `/start` records into its own run
/// directory under `out_dir`; all runs share one event journal.
pub struct ChatSession {
    out_dir: PathBuf,
    config: GatewayConfig,
    journal: EventWriter,
    recorder: Rc<RefCell<RunRecorder>>,
    restorer: Option<Restorer>,
    image: Option<ImageRef>,
    image_path: Option<PathBuf>,
    instructions: String,
}

impl ChatSession {
    pub fn new(out_dir: &Path, events_path: PathBuf, config: GatewayConfig) -> Self {
        let session_id = new_run_id();
        Self {
            out_dir: out_dir.to_path_buf(),
            config,
            journal: EventWriter::new(events_path, &session_id),
            recorder: Rc::new(RefCell::new(RunRecorder::new(
                out_dir,
                RecorderLayout::PerRun,
                session_id,
            ))),
            restorer: None,
            image: None,
            image_path: None,
            instructions: String::new(),
        }
    }

    pub fn status(&self) -> AppStatus {
        self.restorer
            .as_ref()
            .map(Restorer::status)
            .unwrap_or_default()
    }

    #[cfg(test)]
    fn restorer(&self) -> Option<&Restorer> {
        self.restorer.as_ref()
    }

    pub fn instructions(&self) -> &str {
        &self.instructions
    }

    pub fn last_run_dir(&self) -> Option<PathBuf> {
        self.recorder.borrow().run_dir().map(Path::to_path_buf)
    }

    pub fn handle_line(&mut self, line: &str) -> Result<ChatFlow> {
        let intent = parse_intent(line);
        self.handle(&intent)
    }

    pub fn handle(&mut self, intent: &Intent) -> Result<ChatFlow> {
        match intent.action.as_str() {
            "noop" => {}
            "help" => println!("Commands: {}", CHAT_HELP_COMMANDS.join(" ")),
            "quit" => return Ok(ChatFlow::Quit),
            "set_image" => match intent.arg_str("path") {
                Some(path) => self.set_image(Path::new(path)),
                None => println!("/image requires a path"),
            },
            "set_instructions" => {
                self.instructions = intent.arg_str("text").unwrap_or_default().to_string();
                if self.instructions.is_empty() {
                    println!("Instructions cleared");
                } else {
                    println!("Instructions set: {}", self.instructions);
                }
            }
            "set_text_model" => match intent.arg_str("model") {
                Some(model) => {
                    self.config.text_model = Some(model.to_string());
                    self.restorer = None;
                    println!("Text model set to {model}");
                }
                None => println!("/text_model requires a model name"),
            },
            "set_image_model" => match intent.arg_str("model") {
                Some(model) => {
                    self.config.image_model = Some(model.to_string());
                    self.restorer = None;
                    println!("Image model set to {model}");
                }
                None => println!("/image_model requires a model name"),
            },
            "start" => self.start()?,
            "reset" => {
                if let Some(restorer) = self.restorer.as_mut() {
                    restorer.reset()?;
                }
                println!("Session reset");
            }
            "status" => self.print_status(),
            "steps" => self.print_steps(),
            "export" => self.export(intent.arg_str("path"))?,
            "unknown" => {
                let command = intent.arg_str("command").unwrap_or_default();
                println!("Unknown command: /{command}. Type /help for commands.");
            }
            other => println!("Unhandled action: {other}"),
        }
        Ok(ChatFlow::Continue)
    }

    fn set_image(&mut self, path: &Path) {
        match ImageRef::from_path(path) {
            Ok(image) => {
                println!(
                    "Image set to {} ({}, {} bytes)",
                    path.display(),
                    image.mime_type(),
                    image.len()
                );
                self.image = Some(image);
                self.image_path = Some(path.to_path_buf());
            }
            Err(err) => println!("Could not load image: {err:#}"),
        }
    }

    fn start(&mut self) -> Result<()> {
        if self.image.is_none() {
            println!("Set a photo first with /image PATH");
            return Ok(());
        }
        if self.restorer.is_none() {
            match self.build_restorer() {
                Ok(restorer) => self.restorer = Some(restorer),
                Err(err) => {
                    println!("{err}");
                    return Ok(());
                }
            }
        }
        let Some(restorer) = self.restorer.as_mut() else {
            return Ok(());
        };
        let status = restorer.start(self.image.clone(), &self.instructions)?;
        if status == AppStatus::Done {
            if let Some(dir) = self.recorder.borrow().run_dir() {
                println!("Restoration finished. Results in {}", dir.display());
            }
        }
        Ok(())
    }

    fn build_restorer(&self) -> Result<Restorer, RestoreError> {
        let resolved = self.config.resolve()?;
        for note in &resolved.notes {
            println!("{note}");
        }
        let gateway = build_gateway(&self.config)?;
        println!(
            "Using {} ({} + {})",
            gateway.name(),
            resolved.text_model,
            resolved.image_model
        );
        self.recorder.borrow_mut().set_gateway(gateway.name());
        let mut restorer = Restorer::new(gateway, self.journal.clone());
        restorer.add_observer(Box::new(TerminalObserver));
        restorer.add_observer(Box::new(self.recorder.clone()));
        Ok(restorer)
    }

    fn print_status(&self) {
        println!("Status: {}", self.status());
        match &self.image_path {
            Some(path) => println!("Image: {}", path.display()),
            None => println!("Image: (none)"),
        }
        if !self.instructions.is_empty() {
            println!("Instructions: {}", self.instructions);
        }
        if let Some(restorer) = &self.restorer {
            let state = restorer.state();
            if let Some(progress) = state.progress() {
                println!("Progress: {progress}");
            }
            if let Some(error) = state.error() {
                println!("Error: {error}");
            }
            println!(
                "Steps: {} of {} completed",
                state.steps().len(),
                state.plan().len()
            );
        }
    }

    fn print_steps(&self) {
        let steps = self
            .restorer
            .as_ref()
            .map(|restorer| restorer.state().steps())
            .unwrap_or_default();
        if steps.is_empty() {
            println!("No completed steps yet");
            return;
        }
        for step in steps {
            println!("{}. {}", step.step(), step.goal());
            println!("   prompt: {}", step.prompt());
            println!(
                "   {} -> {}",
                step.before_image().short_digest(),
                step.after_image().short_digest()
            );
        }
    }

    fn export(&self, path: Option<&str>) -> Result<()> {
        let Some(run_dir) = self.last_run_dir() else {
            println!("Nothing to export yet");
            return Ok(());
        };
        let out_path = path
            .map(PathBuf::from)
            .unwrap_or_else(|| run_dir.join("report.html"));
        export_report(&run_dir, &out_path, false)?;
        println!("Exported to {}", out_path.display());
        Ok(())
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }
}

pub fn run_chat<R: BufRead>(session: &mut ChatSession, mut input: R) -> Result<()> {
    println!(
        "Retouch chat started. Runs are recorded under {}. Type /help for commands.",
        session.out_dir().display()
    );
    let mut line = String::new();
    loop {
        print!("> ");
        io::stdout().flush()?;

        line.clear();
        let read = match input.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        let text = line.trim_end_matches(['\n', '\r']);
        if session.handle_line(text)? == ChatFlow::Quit {
            break;
        }
    }
    Ok(())
}
