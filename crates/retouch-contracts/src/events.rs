use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

pub type EventPayload = Map<String, Value>;

pub const RUN_STARTED: &str = "run_started";
pub const STATUS_CHANGED: &str = "status_changed";
pub const PROGRESS: &str = "progress";
pub const PLAN_RECEIVED: &str = "plan_received";
pub const PROMPT_GENERATED: &str = "prompt_generated";
pub const STEP_COMPLETED: &str = "step_completed";
pub const RUN_FINISHED: &str = "run_finished";
pub const RUN_FAILED: &str = "run_failed";
pub const RUN_RESET: &str = "run_reset";
pub const OBSERVER_ERROR: &str = "observer_error";

/// Append-only journal of run events.
///
/// - default fields are `type`, `run_id`, `ts`
/// - caller payload is merged last and can override defaults
/// - file journals hold one compact JSON object per line
/// - memory journals keep the emitted objects in order
#[derive(Debug, Clone)]
pub struct EventWriter {
    inner: Arc<EventWriterInner>,
}

#[derive(Debug)]
struct EventWriterInner {
    run_id: String,
    sink: EventSink,
}

#[derive(Debug)]
enum EventSink {
    File { path: PathBuf, lock: Mutex<()> },
    Memory(Mutex<Vec<Value>>),
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, run_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(EventWriterInner {
                run_id: run_id.into(),
                sink: EventSink::File {
                    path: path.into(),
                    lock: Mutex::new(()),
                },
            }),
        }
    }

    pub fn in_memory(run_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(EventWriterInner {
                run_id: run_id.into(),
                sink: EventSink::Memory(Mutex::new(Vec::new())),
            }),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.inner.sink {
            EventSink::File { path, .. } => Some(path.as_path()),
            EventSink::Memory(_) => None,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.inner.run_id
    }

    pub fn emit(&self, event_type: &str, payload: EventPayload) -> anyhow::Result<Value> {
        let mut event = Map::new();
        event.insert("type".to_string(), Value::String(event_type.to_string()));
        event.insert(
            "run_id".to_string(),
            Value::String(self.inner.run_id.clone()),
        );
        event.insert("ts".to_string(), Value::String(now_utc_iso()));
        for (key, value) in payload {
            event.insert(key, value);
        }
        let event = Value::Object(event);

        match &self.inner.sink {
            EventSink::File { path, lock } => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let line = serde_json::to_string(&event)?;
                let _guard = lock
                    .lock()
                    .map_err(|_| anyhow::anyhow!("event journal lock poisoned"))?;
                let mut file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .with_context(|| format!("failed to open {}", path.display()))?;
                file.write_all(line.as_bytes())?;
                file.write_all(b"\n")?;
            }
            EventSink::Memory(events) => {
                events
                    .lock()
                    .map_err(|_| anyhow::anyhow!("event journal lock poisoned"))?
                    .push(event.clone());
            }
        }

        Ok(event)
    }

    /// Everything emitted so far, in order.
    pub fn recorded(&self) -> anyhow::Result<Vec<Value>> {
        match &self.inner.sink {
            EventSink::File { path, .. } => {
                if !path.exists() {
                    return Ok(Vec::new());
                }
                read_events(path)
            }
            EventSink::Memory(events) => Ok(events
                .lock()
                .map_err(|_| anyhow::anyhow!("event journal lock poisoned"))?
                .clone()),
        }
    }
}

/// Reads a JSONL journal, skipping blank and unparseable lines.
pub fn read_events(path: &Path) -> anyhow::Result<Vec<Value>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed reading {}", path.display()))?;
    Ok(raw
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| serde_json::from_str::<Value>(line).ok())
        .collect())
}

pub fn event_types(events: &[Value]) -> Vec<String> {
    events
        .iter()
        .filter_map(|row| row.get("type").and_then(Value::as_str).map(str::to_string))
        .collect()
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use chrono::DateTime;

    use super::*;

    #[test]
    fn emit_writes_compact_jsonl_line() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let writer = EventWriter::new(&path, "run-123");

        let mut payload = EventPayload::new();
        payload.insert("instructions".to_string(), Value::String("colorize".to_string()));
        let emitted = writer.emit(RUN_STARTED, payload)?;

        let content = fs::read_to_string(&path)?;
        assert_eq!(content.lines().count(), 1);
        let line = content.lines().next().unwrap_or("");
        assert!(!line.contains('\n'));
        let parsed: Value = serde_json::from_str(line)?;

        assert_eq!(parsed, emitted);
        assert_eq!(parsed["type"], Value::String("run_started".to_string()));
        assert_eq!(parsed["run_id"], Value::String("run-123".to_string()));
        assert_eq!(parsed["instructions"], Value::String("colorize".to_string()));

        let ts = parsed["ts"].as_str().unwrap_or("");
        DateTime::parse_from_rfc3339(ts)?;
        Ok(())
    }

    #[test]
    fn payload_can_override_default_keys() -> anyhow::Result<()> {
        let writer = EventWriter::in_memory("run-123");

        let mut payload = EventPayload::new();
        payload.insert("run_id".to_string(), Value::String("other".to_string()));
        let emitted = writer.emit(PROGRESS, payload)?;

        assert_eq!(emitted["type"], Value::String("progress".to_string()));
        assert_eq!(emitted["run_id"], Value::String("other".to_string()));
        Ok(())
    }

    #[test]
    fn file_journal_creates_parent_dirs_and_appends() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("nested").join("events.jsonl");
        let writer = EventWriter::new(&path, "run-123");

        writer.emit(STATUS_CHANGED, EventPayload::new())?;
        writer.emit(RUN_FINISHED, EventPayload::new())?;

        let events = writer.recorded()?;
        assert_eq!(event_types(&events), vec!["status_changed", "run_finished"]);
        assert_eq!(writer.path(), Some(path.as_path()));
        Ok(())
    }

    #[test]
    fn memory_journal_keeps_order_and_is_shared_between_clones() -> anyhow::Result<()> {
        let writer = EventWriter::in_memory("run-9");
        let clone = writer.clone();

        writer.emit(RUN_STARTED, EventPayload::new())?;
        clone.emit(PLAN_RECEIVED, EventPayload::new())?;

        assert!(writer.path().is_none());
        assert_eq!(
            event_types(&writer.recorded()?),
            vec!["run_started", "plan_received"]
        );
        Ok(())
    }

    #[test]
    fn read_events_skips_blank_and_garbage_lines() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        fs::write(&path, "{\"type\":\"one\"}\n\nnot json\n{\"type\":\"two\"}\n")?;

        let events = read_events(&path)?;
        assert_eq!(event_types(&events), vec!["one", "two"]);
        Ok(())
    }

    #[test]
    fn missing_file_journal_reads_as_empty() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let writer = EventWriter::new(temp.path().join("never.jsonl"), "run-1");
        assert!(writer.recorded()?.is_empty());
        Ok(())
    }
}
