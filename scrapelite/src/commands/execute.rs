//! `run` / `exec` / `plan`: build a request, hand it to the coordinator, render the result.

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use std::io::Read;
use std::path::PathBuf;

use scrapelite_core::protocol::{ExecutionRequest, ResultEnvelope};
use scrapelite_executor::{ExecutionCoordinator, ExecutorSettings};
use scrapelite_sandbox::manifest::build_manifest;
use scrapelite_sandbox::runner::ResourceLimits;
use scrapelite_sandbox::transform::{transform_script, TransformOptions};

/// Read `arg` as a file path, or stdin when it is "-".
pub fn read_script(arg: &str) -> Result<String> {
    if arg == "-" {
        let mut s = String::new();
        std::io::stdin()
            .read_to_string(&mut s)
            .context("Failed to read script from stdin")?;
        return Ok(s);
    }
    std::fs::read_to_string(arg).with_context(|| format!("Failed to read script: {}", arg))
}

/// Parse a request given inline, as a file path, or on stdin ("-").
pub fn read_request(arg: &str) -> Result<ExecutionRequest> {
    let text = if arg == "-" {
        let mut s = String::new();
        std::io::stdin()
            .read_to_string(&mut s)
            .context("Failed to read request from stdin")?;
        s
    } else if arg.trim_start().starts_with('{') {
        arg.to_string()
    } else {
        std::fs::read_to_string(arg).with_context(|| format!("Failed to read request: {}", arg))?
    };
    serde_json::from_str(&text).context("Invalid ExecutionRequest JSON")
}

/// Settings from env, with CLI overrides applied.
pub fn settings_with_overrides(
    max_memory: Option<u64>,
    timeout: Option<u64>,
    work_dir: Option<String>,
) -> ExecutorSettings {
    let mut settings = ExecutorSettings::from_env();
    settings.limits = ResourceLimits::from_env().with_cli_overrides(max_memory, timeout);
    if let Some(dir) = work_dir {
        settings.provisioning.work_root = Some(PathBuf::from(dir));
    }
    settings
}

/// Execute one request with the host Node toolchain.
pub fn execute_request(settings: ExecutorSettings, request: &ExecutionRequest) -> ResultEnvelope {
    ExecutionCoordinator::with_node_toolchain(settings).execute(request)
}

/// What `plan` prints: the manifest and rewritten script for a request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionPlan {
    pub package_json: Value,
    pub transformed_script: String,
    pub requires_browser: bool,
    pub requires_llm: bool,
}

pub fn plan(script: &str, deps: &[String], tool_type: &str, opts: &TransformOptions) -> ExecutionPlan {
    let manifest = build_manifest(deps, tool_type);
    ExecutionPlan {
        package_json: manifest.to_package_json(),
        transformed_script: transform_script(script, deps, tool_type, opts),
        requires_browser: manifest.requires_browser(),
        requires_llm: manifest.requires_llm(),
    }
}

/// Plan for an `execute`-shaped request.
pub fn plan_request(request: &ExecutionRequest, opts: &TransformOptions) -> ExecutionPlan {
    plan(&request.script_code, &request.dependencies, &request.tool_type, opts)
}
