//! Request and result types shared by the coordinator, the CLI and the stdio server.
//!
//! `ExecutionRequest` uses the snake_case webhook field names on the wire
//! (camelCase aliases are accepted). `ResultEnvelope` is serialized camelCase
//! and is the only shape a caller ever receives, whatever phase failed.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Default `max_items` when the caller omits it.
pub const DEFAULT_MAX_ITEMS: u64 = 1000;

fn default_tool_type() -> String {
    "unknown".to_string()
}

fn default_max_items() -> u64 {
    DEFAULT_MAX_ITEMS
}

// ─── Input ───────────────────────────────────────────────────────────────────

/// One script execution request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// TypeScript source to run.
    #[serde(default, alias = "scriptCode", alias = "scriptSource")]
    pub script_code: String,
    /// Declared package identifiers, in caller order.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Tool tag, e.g. `stagehand`, `playwright`, `hybrid`.
    #[serde(default = "default_tool_type", alias = "toolType")]
    pub tool_type: String,
    /// Advisory item bound, exposed to the script as `MAX_ITEMS`.
    #[serde(default = "default_max_items", alias = "maxItems")]
    pub max_items: u64,
    /// Exposed to the script as `TEST_MODE`.
    #[serde(default, alias = "testMode")]
    pub test_mode: bool,
    /// Hard wall-clock bound on the script process. `None` falls back to
    /// the executor's configured default.
    #[serde(
        default,
        alias = "timeoutSeconds",
        skip_serializing_if = "Option::is_none"
    )]
    pub timeout_seconds: Option<u64>,
}

impl ExecutionRequest {
    pub fn new(script_code: impl Into<String>) -> Self {
        Self {
            script_code: script_code.into(),
            dependencies: Vec::new(),
            tool_type: default_tool_type(),
            max_items: DEFAULT_MAX_ITEMS,
            test_mode: false,
            timeout_seconds: None,
        }
    }

    /// Reject malformed requests before any provisioning happens.
    pub fn validate(&self) -> Result<(), RequestError> {
        if self.script_code.trim().is_empty() {
            return Err(RequestError::EmptyScript);
        }
        if self.timeout_seconds == Some(0) {
            return Err(RequestError::ZeroTimeout);
        }
        if self.max_items == 0 {
            return Err(RequestError::ZeroMaxItems);
        }
        Ok(())
    }
}

/// Request rejected before entering the pipeline.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("No script code provided")]
    EmptyScript,

    #[error("timeout_seconds must be a positive integer")]
    ZeroTimeout,

    #[error("max_items must be a positive integer")]
    ZeroMaxItems,
}

impl RequestError {
    /// Short machine-readable reason placed in `metadata.error`.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::EmptyScript => "Missing script code",
            Self::ZeroTimeout => "Invalid timeout",
            Self::ZeroMaxItems => "Invalid max items",
        }
    }
}

// ─── Output ──────────────────────────────────────────────────────────────────

/// Pipeline stage a result (or failure) is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    EnvironmentValidation,
    DependencyInstallation,
    /// Best-effort; only ever logged, never terminal.
    BrowserProvisioning,
    Execution,
    Timeout,
    OutputParsing,
    Unexpected,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EnvironmentValidation => "environment_validation",
            Self::DependencyInstallation => "dependency_installation",
            Self::BrowserProvisioning => "browser_provisioning",
            Self::Execution => "execution",
            Self::Timeout => "timeout",
            Self::OutputParsing => "output_parsing",
            Self::Unexpected => "unexpected",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single externally visible result shape.
///
/// Construct through [`ResultEnvelope::failure`] / [`ResultEnvelope::success`]
/// so that `total_found` always equals `data.len()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultEnvelope {
    pub success: bool,
    pub data: Vec<Value>,
    pub total_found: usize,
    pub errors: Vec<String>,
    /// Milliseconds.
    pub execution_time: u64,
    pub metadata: Map<String, Value>,
}

impl ResultEnvelope {
    fn base(success: bool, tool_used: &str, test_mode: bool, execution_time: u64) -> Self {
        let mut metadata = Map::new();
        metadata.insert("toolUsed".to_string(), Value::String(tool_used.to_string()));
        metadata.insert("testMode".to_string(), Value::Bool(test_mode));
        Self {
            success,
            data: Vec::new(),
            total_found: 0,
            errors: Vec::new(),
            execution_time,
            metadata,
        }
    }

    /// Failed envelope with no data.
    pub fn failure(
        tool_used: &str,
        test_mode: bool,
        errors: Vec<String>,
        execution_time: u64,
    ) -> Self {
        let mut envelope = Self::base(false, tool_used, test_mode, execution_time);
        envelope.errors = errors;
        envelope
    }

    /// Successful envelope carrying `data`.
    pub fn success(tool_used: &str, test_mode: bool, data: Vec<Value>, execution_time: u64) -> Self {
        let mut envelope = Self::base(true, tool_used, test_mode, execution_time);
        envelope.total_found = data.len();
        envelope.data = data;
        envelope
    }

    /// Tag the envelope with the phase it ended in.
    pub fn with_phase(self, phase: Phase) -> Self {
        self.with_meta("phase", phase.as_str())
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.errors.push(error.into());
        self
    }

    /// Phase recorded in metadata, if any.
    pub fn phase(&self) -> Option<&str> {
        self.metadata.get("phase").and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_defaults_from_minimal_json() {
        let req: ExecutionRequest = serde_json::from_value(json!({"script_code": "x"})).unwrap();
        assert_eq!(req.tool_type, "unknown");
        assert_eq!(req.max_items, 1000);
        assert_eq!(req.timeout_seconds, None);
        assert!(!req.test_mode);
        assert!(req.dependencies.is_empty());
    }

    #[test]
    fn test_request_accepts_camel_case_aliases() {
        let req: ExecutionRequest = serde_json::from_value(json!({
            "scriptCode": "x",
            "toolType": "stagehand",
            "maxItems": 5,
            "testMode": true,
            "timeoutSeconds": 10
        }))
        .unwrap();
        assert_eq!(req.tool_type, "stagehand");
        assert_eq!(req.max_items, 5);
        assert!(req.test_mode);
        assert_eq!(req.timeout_seconds, Some(10));
    }

    #[test]
    fn test_validate_rejects_blank_script() {
        assert_eq!(ExecutionRequest::new("").validate(), Err(RequestError::EmptyScript));
        assert_eq!(ExecutionRequest::new("  \n").validate(), Err(RequestError::EmptyScript));
        assert!(ExecutionRequest::new("console.log(1)").validate().is_ok());
    }

    #[test]
    fn test_omitted_timeout_stays_unset() {
        let req: ExecutionRequest = serde_json::from_value(json!({"script_code": "x"})).unwrap();
        assert!(req.validate().is_ok());
        let v = serde_json::to_value(&req).unwrap();
        assert!(v.get("timeout_seconds").is_none());

        let zero: ExecutionRequest =
            serde_json::from_value(json!({"script_code": "x", "timeoutSeconds": 0})).unwrap();
        assert_eq!(zero.validate(), Err(RequestError::ZeroTimeout));
    }

    #[test]
    fn test_validate_rejects_zero_bounds() {
        let mut req = ExecutionRequest::new("x");
        req.timeout_seconds = Some(0);
        assert_eq!(req.validate(), Err(RequestError::ZeroTimeout));
        req.timeout_seconds = Some(1);
        req.max_items = 0;
        assert_eq!(req.validate(), Err(RequestError::ZeroMaxItems));
    }

    #[test]
    fn test_envelope_total_found_tracks_data() {
        let env = ResultEnvelope::success("playwright", false, vec![json!({"a": 1}), json!({"a": 2})], 12);
        assert_eq!(env.total_found, 2);
        let v = serde_json::to_value(&env).unwrap();
        assert_eq!(v["totalFound"], 2);
        assert_eq!(v["executionTime"], 12);
        assert_eq!(v["metadata"]["toolUsed"], "playwright");
        assert_eq!(v["metadata"]["testMode"], false);
    }

    #[test]
    fn test_envelope_phase_serialization() {
        let env = ResultEnvelope::failure("x", true, vec!["boom".into()], 0)
            .with_phase(Phase::DependencyInstallation);
        assert_eq!(env.phase(), Some("dependency_installation"));
        assert!(!env.success);
        assert_eq!(
            serde_json::to_value(Phase::EnvironmentValidation).unwrap(),
            json!("environment_validation")
        );
    }
}
