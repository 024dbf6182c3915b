//! Append-only audit trail
//!
//! Every pipeline stage writes one structured record sharing the request's
//! trace id; terminal outcomes write exactly one terminal record. Records are
//! JSON lines, appended under a single writer and flushed before the response
//! returns. Nothing ever modifies or deletes a record at runtime.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

/// Outcome of a pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditOutcome {
    Passed,
    Blocked,
    Error,
}

/// One audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub trace_id: String,
    pub ts: DateTime<Utc>,
    pub stage: String,
    pub outcome: AuditOutcome,
    pub reason_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_preview: Option<String>,
}

/// Longest preview stored alongside an event.
const MAX_PREVIEW_LEN: usize = 200;

impl AuditEvent {
    pub fn new(trace_id: &str, stage: &str, outcome: AuditOutcome, reason_code: &str) -> Self {
        AuditEvent {
            trace_id: trace_id.to_string(),
            ts: Utc::now(),
            stage: stage.to_string(),
            outcome,
            reason_code: reason_code.to_string(),
            payload_preview: None,
        }
    }

    /// Attach a payload preview, truncated on a character boundary.
    pub fn with_preview(mut self, preview: &str) -> Self {
        let truncated: String = preview.chars().take(MAX_PREVIEW_LEN).collect();
        self.payload_preview = Some(truncated);
        self
    }
}

/// Sink for audit events.
///
/// Recording is infallible from the caller's perspective: the audit trail is a
/// non-security auxiliary, so sink failures are logged and swallowed rather
/// than failing the request.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// JSONL file sink; one event per line, serialised writes, flushed per record.
pub struct JsonlAuditSink {
    file: Mutex<File>,
}

impl JsonlAuditSink {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(JsonlAuditSink {
            file: Mutex::new(file),
        })
    }
}

impl AuditSink for JsonlAuditSink {
    fn record(&self, event: AuditEvent) {
        let line = match serde_json::to_string(&event) {
            Ok(line) => line,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialise audit event");
                return;
            }
        };
        let mut file = self.file.lock().unwrap();
        if let Err(e) = writeln!(file, "{}", line).and_then(|_| file.flush()) {
            tracing::error!(error = %e, "failed to write audit event");
        }
    }
}

/// In-memory sink for tests.
#[derive(Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Events recorded for one trace, in insertion order.
    pub fn events_for(&self, trace_id: &str) -> Vec<AuditEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.trace_id == trace_id)
            .cloned()
            .collect()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        self.events.lock().unwrap().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_is_truncated() {
        let long = "x".repeat(500);
        let event =
            AuditEvent::new("t1", "validate", AuditOutcome::Blocked, "VALIDATION_WRITE_BANNED")
                .with_preview(&long);
        assert_eq!(event.payload_preview.unwrap().len(), 200);
    }

    #[test]
    fn jsonl_sink_appends_one_line_per_event() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let sink = JsonlAuditSink::open(&path).unwrap();

        sink.record(AuditEvent::new("t1", "guardrail", AuditOutcome::Passed, "ok"));
        sink.record(
            AuditEvent::new("t1", "summarise", AuditOutcome::Error, "CITATION_UNVERIFIED")
                .with_preview("chunk_999"),
        );

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: AuditEvent = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.stage, "guardrail");
        assert_eq!(first.outcome, AuditOutcome::Passed);

        let second: AuditEvent = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second.reason_code, "CITATION_UNVERIFIED");
        assert_eq!(second.payload_preview.as_deref(), Some("chunk_999"));
    }

    #[test]
    fn memory_sink_orders_per_trace() {
        let sink = MemoryAuditSink::new();
        sink.record(AuditEvent::new("a", "guardrail", AuditOutcome::Passed, "ok"));
        sink.record(AuditEvent::new("b", "guardrail", AuditOutcome::Blocked, "GUARDRAIL_BLOCKED"));
        sink.record(AuditEvent::new("a", "plan", AuditOutcome::Passed, "ok"));

        let trace_a = sink.events_for("a");
        assert_eq!(trace_a.len(), 2);
        assert_eq!(trace_a[0].stage, "guardrail");
        assert_eq!(trace_a[1].stage, "plan");
    }
}
