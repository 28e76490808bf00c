//! Append-only event log (`--messages-file`).
//!
//! Worker records share the envelope `{"type":"saga_worker","subtype":...,
//! "timestamp":...}`. Agent stream records are forwarded verbatim.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::core::types::TerminalStatus;

const RECORD_TYPE: &str = "saga_worker";

/// Progress records emitted by the worker itself.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "subtype", rename_all = "snake_case")]
pub enum WorkerEvent {
    #[serde(rename_all = "camelCase")]
    PipelineStart { story_id: String },
    PipelineStep { step: u32, message: String },
    #[serde(rename_all = "camelCase")]
    PipelineEnd {
        story_id: String,
        status: String,
        exit_code: i32,
        cycles: u32,
        elapsed_minutes: u64,
    },
    #[serde(rename_all = "camelCase")]
    CycleStart { cycle: u32, max_cycles: u32 },
    CycleEnd { cycle: u32, status: TerminalStatus },
}

#[derive(Serialize)]
struct Envelope<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(flatten)]
    event: &'a WorkerEvent,
    timestamp: String,
}

/// Render a worker event with its envelope and current timestamp.
pub fn worker_record(event: &WorkerEvent) -> Value {
    let envelope = Envelope {
        kind: RECORD_TYPE,
        event,
        timestamp: Utc::now().to_rfc3339(),
    };
    serde_json::to_value(&envelope).unwrap_or(Value::Null)
}

/// Destination for event records. Writes are fire-and-forget.
pub trait EventSink: Send + Sync {
    fn write(&self, record: &Value);

    fn emit(&self, event: &WorkerEvent) {
        self.write(&worker_record(event));
    }
}

/// Sink that drops every record.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn write(&self, _record: &Value) {}
}

/// Sink that appends one JSON object per line to a file.
///
/// The file and its parent directory are created on first write.
#[derive(Debug)]
pub struct JsonlEventSink {
    path: PathBuf,
    writer: Mutex<Option<BufWriter<File>>>,
}

impl JsonlEventSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: Mutex::new(None),
        }
    }

    fn append(&self, record: &Value) -> Result<()> {
        let mut guard = self
            .writer
            .lock()
            .map_err(|_| anyhow::anyhow!("event sink lock poisoned"))?;
        if guard.is_none() {
            *guard = Some(open_append(&self.path)?);
        }
        if let Some(writer) = guard.as_mut() {
            let line = serde_json::to_string(record).context("serialize event")?;
            writeln!(writer, "{line}")
                .with_context(|| format!("append {}", self.path.display()))?;
            writer
                .flush()
                .with_context(|| format!("flush {}", self.path.display()))?;
        }
        Ok(())
    }
}

impl EventSink for JsonlEventSink {
    fn write(&self, record: &Value) {
        if let Err(err) = self.append(record) {
            warn!(err = %format!("{err:#}"), path = %self.path.display(), "event write failed");
        }
    }
}

fn open_append(path: &Path) -> Result<BufWriter<File>> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("create events dir {}", parent.display()))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open {}", path.display()))?;
    Ok(BufWriter::new(file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn read_lines(path: &Path) -> Vec<Value> {
        fs::read_to_string(path)
            .expect("read events")
            .lines()
            .map(|line| serde_json::from_str(line).expect("parse line"))
            .collect()
    }

    #[test]
    fn worker_records_carry_envelope() {
        let record = worker_record(&WorkerEvent::CycleStart {
            cycle: 1,
            max_cycles: 10,
        });
        assert_eq!(record["type"], "saga_worker");
        assert_eq!(record["subtype"], "cycle_start");
        assert_eq!(record["cycle"], 1);
        assert_eq!(record["maxCycles"], 10);
        assert!(record["timestamp"].as_str().is_some_and(|ts| !ts.is_empty()));
    }

    #[test]
    fn cycle_end_reports_terminal_status() {
        let record = worker_record(&WorkerEvent::CycleEnd {
            cycle: 2,
            status: TerminalStatus::NonSuccess,
        });
        assert_eq!(record["subtype"], "cycle_end");
        assert_eq!(record["status"], "non_success");
    }

    #[test]
    fn jsonl_sink_creates_parents_and_appends() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("nested/dir/messages.jsonl");
        let sink = JsonlEventSink::new(&path);
        sink.write(&json!({"type": "assistant"}));
        sink.emit(&WorkerEvent::PipelineStart {
            story_id: "auth".to_string(),
        });
        drop(sink);

        let again = JsonlEventSink::new(&path);
        again.write(&json!({"type": "result", "subtype": "success"}));

        let lines = read_lines(&path);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["type"], "assistant");
        assert_eq!(lines[1]["storyId"], "auth");
        assert_eq!(lines[2]["subtype"], "success");
    }

    #[test]
    fn unwritable_sink_does_not_panic() {
        let temp = tempfile::tempdir().expect("tempdir");
        let blocker = temp.path().join("file");
        fs::write(&blocker, "x").expect("write");
        let sink = JsonlEventSink::new(blocker.join("messages.jsonl"));
        sink.write(&json!({"type": "assistant"}));
    }
}
