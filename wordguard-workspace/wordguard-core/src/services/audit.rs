//! services/audit.rs
//! Failure and decision reporting for the moderation pipeline.
//!
//! - Every degraded stage, failed cache load and fail-closed decision is handed to an
//!   [`ErrorSink`].
//! - [`LogbookSink`] writes JSONL files under `<root>/logbook/`.

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::config::LogbookConfig;
use crate::record::DecisionRecord;

/// Receives failures from caches, stages and the runner.
///
/// Implementations must never panic and never block for long; they are called on
/// request threads and on cache worker threads.
pub trait ErrorSink: Send + Sync {
    /// `stage` is a stage name (`emoji`, `matching`, ...) or `cache:<category>`.
    fn report_failure(&self, stage: &str, reason: &str);

    /// Called once per finished run. Default: ignore.
    fn record_decision(&self, _decision: &DecisionRecord) {}
}

/// Forwards failures to `tracing` at `warn` level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl ErrorSink for TracingSink {
    fn report_failure(&self, stage: &str, reason: &str) {
        tracing::warn!(stage, reason, "moderation stage degraded");
    }

    fn record_decision(&self, decision: &DecisionRecord) {
        tracing::debug!(
            run_id = %decision.run_id,
            blocked = decision.blocked,
            hits = decision.hits.len(),
            excused = decision.excused.len(),
            "decision"
        );
    }
}

/// Appends failures to `failures.jsonl` and decisions to `decisions.jsonl`.
#[derive(Debug, Clone)]
pub struct LogbookSink {
    failures: PathBuf,
    decisions: PathBuf,
    preview_len: usize,
    // serializes appends from concurrent runs so lines never interleave
    write_lock: Arc<Mutex<()>>,
}

impl LogbookSink {
    pub fn new(failures: impl Into<PathBuf>, decisions: impl Into<PathBuf>, preview_len: usize) -> Self {
        Self {
            failures: failures.into(),
            decisions: decisions.into(),
            preview_len,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn from_config(cfg: &LogbookConfig) -> Self {
        Self::new(&cfg.failures_log, &cfg.decisions_log, cfg.preview_len)
    }

    pub fn failures_path(&self) -> &Path {
        &self.failures
    }

    pub fn decisions_path(&self) -> &Path {
        &self.decisions
    }

    fn append<S: Serialize>(&self, path: &Path, val: &S) {
        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());
        if let Err(e) = append_jsonl(path, val) {
            tracing::warn!(path = %path.display(), error = %e, "logbook append failed");
        }
    }
}

#[derive(Serialize)]
struct FailureLine<'a> {
    timestamp: String,
    event: &'static str,
    stage: &'a str,
    reason: &'a str,
}

#[derive(Serialize)]
struct DecisionLine<'a> {
    timestamp: String,
    event: &'static str,
    run_id: String,
    blocked: bool,
    content_preview: String,
    hits: Vec<u64>,
    excused: Vec<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    degraded: Vec<String>,
}

impl ErrorSink for LogbookSink {
    fn report_failure(&self, stage: &str, reason: &str) {
        let line = FailureLine {
            timestamp: Utc::now().to_rfc3339(),
            event: "stage_failure",
            stage,
            reason,
        };
        self.append(&self.failures, &line);
    }

    fn record_decision(&self, decision: &DecisionRecord) {
        let line = DecisionLine {
            timestamp: Utc::now().to_rfc3339(),
            event: "decision",
            run_id: decision.run_id.to_string(),
            blocked: decision.blocked,
            content_preview: redact_preview(&decision.content, self.preview_len),
            hits: decision.hit_ids(),
            excused: decision.excused_ids(),
            reason: decision.reason.as_deref(),
            degraded: decision.degraded.clone(),
        };
        self.append(&self.decisions, &line);
    }
}

/// Sends every report to each inner sink in order.
#[derive(Clone, Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn ErrorSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn ErrorSink>>) -> Self {
        Self { sinks }
    }

    pub fn push(&mut self, sink: Arc<dyn ErrorSink>) {
        self.sinks.push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl ErrorSink for FanoutSink {
    fn report_failure(&self, stage: &str, reason: &str) {
        for s in &self.sinks {
            s.report_failure(stage, reason);
        }
    }

    fn record_decision(&self, decision: &DecisionRecord) {
        for s in &self.sinks {
            s.record_decision(decision);
        }
    }
}

/// Collects reports in memory. Handy for embedding callers and tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    failures: Mutex<Vec<(String, String)>>,
    decisions: Mutex<Vec<DecisionRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(stage, reason)` pairs in report order.
    pub fn failures(&self) -> Vec<(String, String)> {
        self.failures.lock().map(|v| v.clone()).unwrap_or_default()
    }

    pub fn failed_stages(&self) -> Vec<String> {
        self.failures().into_iter().map(|(s, _)| s).collect()
    }

    pub fn decisions(&self) -> Vec<DecisionRecord> {
        self.decisions.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

impl ErrorSink for MemorySink {
    fn report_failure(&self, stage: &str, reason: &str) {
        if let Ok(mut v) = self.failures.lock() {
            v.push((stage.to_string(), reason.to_string()));
        }
    }

    fn record_decision(&self, decision: &DecisionRecord) {
        if let Ok(mut v) = self.decisions.lock() {
            v.push(decision.clone());
        }
    }
}

/// ----------- Helpers -----------

/// Append a single JSON value as a line to a JSONL file, creating parents as needed.
pub(crate) fn append_jsonl<S: Serialize>(path: &Path, val: &S) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let line = serde_json::to_string(val)?;
    let mut f = fs::OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(f, "{}", line)?;
    Ok(())
}

/// Single-line preview: newlines flattened, cut to `max_chars` characters with an ellipsis.
pub fn redact_preview(s: &str, max_chars: usize) -> String {
    let flat = s.replace(['\n', '\r'], " ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let mut t: String = flat.chars().take(max_chars).collect();
    t.push('…');
    t
}

/// First line written to each logbook stream by `init`.
pub(crate) fn init_event_line(version: &str) -> String {
    json!({
        "timestamp": Utc::now().to_rfc3339(),
        "event": "system_init",
        "data": { "version": version },
    })
    .to_string()
}
