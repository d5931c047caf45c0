use std::path::Path;

use anyhow::{bail, Context};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::restoration::{AppStatus, PlanStep};

/// One completed step as written to disk: images are referenced by file name
/// relative to the run directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: u32,
    pub goal: String,
    pub prompt: String,
    pub before_image: String,
    pub after_image: String,
    pub after_digest: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub started_at: String,
    #[serde(default)]
    pub finished_at: Option<String>,
    pub status: AppStatus,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub instructions: String,
    #[serde(default)]
    pub gateway: Option<String>,
    #[serde(default)]
    pub original_image: Option<String>,
    #[serde(default)]
    pub plan: Vec<PlanStep>,
    #[serde(default)]
    pub steps: Vec<StepRecord>,
}

impl RunSummary {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            started_at: now_utc_iso(),
            finished_at: None,
            status: AppStatus::Idle,
            error: None,
            instructions: String::new(),
            gateway: None,
            original_image: None,
            plan: Vec::new(),
            steps: Vec::new(),
        }
    }

    /// The image the run ended on, if any step completed.
    pub fn final_image(&self) -> Option<&str> {
        self.steps.last().map(|step| step.after_image.as_str())
    }
}

pub fn write_summary(
    path: &Path,
    summary: &RunSummary,
    extra: Option<&Map<String, Value>>,
) -> anyhow::Result<()> {
    let Value::Object(mut payload) = serde_json::to_value(summary)? else {
        bail!("run summary did not serialize to an object");
    };
    payload.insert("ts".to_string(), Value::String(now_utc_iso()));
    if let Some(extra) = extra {
        for (key, value) in extra {
            payload.insert(key.clone(), value.clone());
        }
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(&Value::Object(payload))?)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

pub fn load_summary(path: &Path) -> anyhow::Result<RunSummary> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("invalid run summary ({})", path.display()))
}

pub fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

/// Fresh run identifier, also used as the per-run directory name.
pub fn new_run_id() -> String {
    format!("run-{}", Uuid::new_v4().simple())
}
