mod chat;
mod report;
mod terminal;

use std::fs;
use std::io;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use retouch_contracts::events::EventWriter;
use retouch_contracts::restoration::{validate_plan, AppStatus, ImageRef, RestoreError};
use retouch_contracts::runs::summary::new_run_id;
use retouch_engine::{
    build_gateway, error_chain_text, GatewayConfig, RecorderLayout, Restorer, RunRecorder,
};

use crate::chat::{run_chat, ChatSession};
use crate::report::export_report;
use crate::terminal::TerminalObserver;

#[derive(Debug, Parser)]
#[command(name = "retouch", version, about = "Multi-step photo restoration")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Plan and run a full restoration of one photo.
    Restore(RestoreArgs),
    /// Ask for a restoration plan only.
    Plan(PlanArgs),
    /// Interactive session.
    Chat(ChatArgs),
    /// Render the HTML report for a recorded run.
    Export(ExportArgs),
}

#[derive(Debug, Parser)]
struct RestoreArgs {
    #[arg(long)]
    image: PathBuf,
    #[arg(long, default_value = "")]
    instructions: String,
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long)]
    text_model: Option<String>,
    #[arg(long)]
    image_model: Option<String>,
    #[arg(long)]
    no_report: bool,
}

#[derive(Debug, Parser)]
struct PlanArgs {
    #[arg(long)]
    image: PathBuf,
    #[arg(long, default_value = "")]
    instructions: String,
    #[arg(long)]
    text_model: Option<String>,
    #[arg(long)]
    image_model: Option<String>,
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Parser)]
struct ChatArgs {
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long)]
    text_model: Option<String>,
    #[arg(long)]
    image_model: Option<String>,
}

#[derive(Debug, Parser)]
struct ExportArgs {
    #[arg(long)]
    run: PathBuf,
    #[arg(long)]
    out: PathBuf,
    /// Inline images as data URLs so the report stands alone.
    #[arg(long)]
    embed: bool,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("retouch error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Restore(args) => run_restore(args),
        Command::Plan(args) => run_plan(args),
        Command::Chat(args) => {
            run_chat_session(args)?;
            Ok(0)
        }
        Command::Export(args) => run_export(args),
    }
}

fn gateway_config(text_model: Option<String>, image_model: Option<String>) -> GatewayConfig {
    GatewayConfig::from_env()
        .with_text_model(text_model)
        .with_image_model(image_model)
}

fn run_restore(args: RestoreArgs) -> Result<i32> {
    let image = ImageRef::from_path(&args.image)?;
    let config = gateway_config(args.text_model, args.image_model);
    let resolved = config.resolve()?;
    for note in &resolved.notes {
        println!("{note}");
    }
    let gateway = build_gateway(&config)?;
    println!(
        "Using {} ({} + {})",
        gateway.name(),
        resolved.text_model,
        resolved.image_model
    );

    fs::create_dir_all(&args.out)
        .with_context(|| format!("failed to create {}", args.out.display()))?;
    let run_id = new_run_id();
    let events_path = args
        .events
        .clone()
        .unwrap_or_else(|| args.out.join("events.jsonl"));
    let recorder =
        RunRecorder::new(&args.out, RecorderLayout::Single, &run_id).with_gateway(gateway.name());
    let mut restorer = Restorer::new(gateway, EventWriter::new(events_path, &run_id));
    restorer.add_observer(Box::new(TerminalObserver));
    restorer.add_observer(Box::new(recorder));

    let status = restorer.start(Some(image), &args.instructions)?;

    if !args.no_report {
        let report_path = args.out.join("report.html");
        export_report(&args.out, &report_path, false)?;
        println!("Report: {}", report_path.display());
    }

    match status {
        AppStatus::Done => {
            println!(
                "Restored in {} steps. Results in {}",
                restorer.state().steps().len(),
                args.out.display()
            );
            Ok(0)
        }
        _ => {
            if let Some(err) = restorer.last_error() {
                eprintln!("Restoration failed ({}): {err}", err.kind());
            }
            Ok(1)
        }
    }
}

fn run_plan(args: PlanArgs) -> Result<i32> {
    let image = ImageRef::from_path(&args.image)?;
    let config = gateway_config(args.text_model, args.image_model);
    let gateway = build_gateway(&config)?;
    let plan = gateway
        .request_plan(&image, args.instructions.trim())
        .map_err(|err| RestoreError::Plan(error_chain_text(&err, 600)))?;
    let plan = validate_plan(plan).map_err(RestoreError::from)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
    } else {
        for step in &plan {
            println!("{}. {}", step.step, step.goal);
        }
    }
    Ok(0)
}

fn run_chat_session(args: ChatArgs) -> Result<()> {
    fs::create_dir_all(&args.out)
        .with_context(|| format!("failed to create {}", args.out.display()))?;
    let events_path = args
        .events
        .clone()
        .unwrap_or_else(|| args.out.join("events.jsonl"));
    let config = gateway_config(args.text_model, args.image_model);
    let mut session = ChatSession::new(&args.out, events_path, config);
    run_chat(&mut session, io::stdin().lock())
}

fn run_export(args: ExportArgs) -> Result<i32> {
    export_report(&args.run, &args.out, args.embed)?;
    println!("Exported to {}", args.out.display());
    Ok(0)
}
