use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

pub type EventPayload = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventSink {
    File(PathBuf),
    Stderr,
}

/// Structured request log: one compact JSON object per line.
///
/// - default fields are `type`, `run_id`, `ts`
/// - caller payload is merged last and can override defaults
/// - writers created with [`EventWriter::for_run`] share the sink and its lock
#[derive(Debug, Clone)]
pub struct EventWriter {
    sink: Arc<SinkInner>,
    run_id: String,
}

#[derive(Debug)]
struct SinkInner {
    sink: EventSink,
    lock: Mutex<()>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, run_id: impl Into<String>) -> Self {
        Self::with_sink(EventSink::File(path.into()), run_id)
    }

    pub fn stderr(run_id: impl Into<String>) -> Self {
        Self::with_sink(EventSink::Stderr, run_id)
    }

    pub fn with_sink(sink: EventSink, run_id: impl Into<String>) -> Self {
        Self {
            sink: Arc::new(SinkInner {
                sink,
                lock: Mutex::new(()),
            }),
            run_id: run_id.into(),
        }
    }

    /// Same sink, different run id.
    pub fn for_run(&self, run_id: impl Into<String>) -> Self {
        Self {
            sink: Arc::clone(&self.sink),
            run_id: run_id.into(),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.sink.sink {
            EventSink::File(path) => Some(path),
            EventSink::Stderr => None,
        }
    }

    pub fn emit(&self, event_type: &str, payload: EventPayload) -> anyhow::Result<Value> {
        let mut event = Map::new();
        event.insert("type".to_string(), Value::String(event_type.to_string()));
        event.insert("run_id".to_string(), Value::String(self.run_id.clone()));
        event.insert("ts".to_string(), Value::String(now_utc_iso()));
        for (key, value) in payload {
            event.insert(key, value);
        }

        let line = serde_json::to_string(&event)?;
        let _guard = self
            .sink
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("event writer lock poisoned"))?;
        match &self.sink.sink {
            EventSink::File(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let mut file = OpenOptions::new().create(true).append(true).open(path)?;
                file.write_all(line.as_bytes())?;
                file.write_all(b"\n")?;
            }
            EventSink::Stderr => {
                let mut stderr = std::io::stderr().lock();
                stderr.write_all(line.as_bytes())?;
                stderr.write_all(b"\n")?;
            }
        }

        Ok(Value::Object(event))
    }

    /// Emits, swallowing sink failures; logging must never fail a request.
    pub fn record(&self, event_type: &str, payload: EventPayload) {
        let _ = self.emit(event_type, payload);
    }
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
        let writer = EventWriter::new(&path, "req-123");

        let mut payload = EventPayload::new();
        payload.insert(
            "template".to_string(),
            Value::String("lora_flux_workflow.json".to_string()),
        );
        let emitted = writer.emit("template_loaded", payload)?;

        let content = fs::read_to_string(&path)?;
        let line = content.lines().next().unwrap_or("");
        let parsed: Value = serde_json::from_str(line)?;

        assert_eq!(parsed, emitted);
        assert_eq!(parsed["type"], Value::String("template_loaded".to_string()));
        assert_eq!(parsed["run_id"], Value::String("req-123".to_string()));

        let ts = parsed["ts"].as_str().unwrap_or("");
        DateTime::parse_from_rfc3339(ts)?;
        Ok(())
    }

    #[test]
    fn payload_can_override_default_keys() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let writer = EventWriter::new(temp.path().join("events.jsonl"), "req-123");

        let mut payload = EventPayload::new();
        payload.insert("run_id".to_string(), Value::String("override".to_string()));
        let emitted = writer.emit("request_received", payload)?;

        assert_eq!(emitted["run_id"], Value::String("override".to_string()));
        Ok(())
    }

    #[test]
    fn run_scoped_writers_share_the_file() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("nested").join("events.jsonl");
        let base = EventWriter::new(&path, "process");

        base.for_run("req-a").emit("one", EventPayload::new())?;
        base.for_run("req-b").emit("two", EventPayload::new())?;

        let content = fs::read_to_string(&path)?;
        let rows: Vec<Value> = content
            .lines()
            .map(serde_json::from_str)
            .collect::<Result<_, _>>()?;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["run_id"], Value::String("req-a".to_string()));
        assert_eq!(rows[1]["type"], Value::String("two".to_string()));
        assert_eq!(base.path(), Some(path.as_path()));
        Ok(())
    }
}
