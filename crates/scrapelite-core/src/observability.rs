//! Observability: tracing init and the JSONL audit log.
//!
//! Uses `config::ObservabilityConfig` for SCRAPELITE_QUIET, LOG_LEVEL, LOG_JSON, AUDIT_LOG.
//! Logs go to stderr; stdout belongs to envelopes and RPC responses.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use serde_json::json;
use tracing_subscriber::{prelude::*, EnvFilter};

static AUDIT_PATH: Mutex<Option<String>> = Mutex::new(None);

/// Initialize tracing. Call once at process startup.
/// When SCRAPELITE_QUIET=1 only WARN and above are logged.
pub fn init_tracing() {
    let cfg = crate::config::ObservabilityConfig::from_env();
    let level = if cfg.quiet {
        "scrapelite=warn".to_string()
    } else {
        cfg.log_level.clone()
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level));

    let _ = if cfg.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_thread_ids(false),
            )
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_thread_ids(false),
            )
            .try_init()
    };
}

fn get_audit_path() -> Option<String> {
    {
        let guard = AUDIT_PATH.lock().ok()?;
        if let Some(ref p) = *guard {
            return Some(p.clone());
        }
    }
    let path = crate::config::ObservabilityConfig::from_env().audit_log.clone()?;
    if let Some(parent) = Path::new(&path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    {
        let mut guard = AUDIT_PATH.lock().ok()?;
        *guard = Some(path.clone());
    }
    Some(path)
}

fn append_jsonl(path: &Path, record: &serde_json::Value) {
    if let Ok(mut f) = OpenOptions::new().create(true).append(true).open(path) {
        if let Ok(line) = serde_json::to_string(record) {
            let _ = writeln!(f, "{}", line);
        }
    }
}

fn audit_record(event: &str, request_id: &str, details: serde_json::Value) -> serde_json::Value {
    json!({
        "ts": Utc::now().to_rfc3339(),
        "event": event,
        "request_id": request_id,
        "details": details,
    })
}

/// Audit: a request entered the coordinator.
pub fn audit_execution_started(request_id: &str, tool_type: &str, dependency_count: usize) {
    let Some(path) = get_audit_path() else {
        return;
    };
    let record = audit_record(
        "execution_started",
        request_id,
        json!({ "tool_type": tool_type, "dependencies": dependency_count }),
    );
    append_jsonl(Path::new(&path), &record);
}

/// Audit: a request left the coordinator with its final envelope.
pub fn audit_execution_completed(
    request_id: &str,
    tool_type: &str,
    success: bool,
    phase: Option<&str>,
    elapsed_ms: u64,
) {
    let Some(path) = get_audit_path() else {
        return;
    };
    let record = audit_record(
        "execution_completed",
        request_id,
        json!({
            "tool_type": tool_type,
            "success": success,
            "phase": phase,
            "elapsed_ms": elapsed_ms,
        }),
    );
    append_jsonl(Path::new(&path), &record);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_jsonl_writes_one_line_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        append_jsonl(&path, &audit_record("execution_started", "r1", json!({"tool_type": "x"})));
        append_jsonl(&path, &audit_record("execution_completed", "r1", json!({"success": true})));

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["event"], "execution_started");
        assert_eq!(first["request_id"], "r1");
        assert!(first["ts"].as_str().is_some());
    }
}
