//! Execution coordinator.
//!
//! `validating → provisioning → executing → extracting → done`. Each state
//! either hands off to the next or returns a phase-tagged envelope; nothing
//! is retried here. The workspace and the script's process group are scoped
//! to [`ExecutionCoordinator::execute`] and are gone when it returns.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use scrapelite_core::config::ProvisioningConfig;
use scrapelite_core::observability::{audit_execution_completed, audit_execution_started};
use scrapelite_core::protocol::{ExecutionRequest, Phase, ResultEnvelope};
use scrapelite_sandbox::env::{
    resolve_execution_env, EnvironmentProvisioner, HostEnv, ProvisionError,
};
use scrapelite_sandbox::extract::extract_result;
use scrapelite_sandbox::info_log;
use scrapelite_sandbox::manifest::build_manifest;
use scrapelite_sandbox::runner::{ExecutionOutcome, ResourceLimits, RunParams, SandboxRunner};
use scrapelite_sandbox::toolchain::{NodeToolchain, Toolchain};
use scrapelite_sandbox::transform::{transform_script, TransformOptions};

/// Length of stdout/stderr previews in metadata.
pub const PREVIEW_CHARS: usize = 500;

/// Length of the stderr excerpt in an execution error message.
pub const ERROR_PREVIEW_CHARS: usize = 1000;

/// Everything a coordinator needs, resolved once at startup and shared
/// read-only between requests.
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub provisioning: ProvisioningConfig,
    pub limits: ResourceLimits,
    pub transform: TransformOptions,
    pub host_env: HostEnv,
}

impl ExecutorSettings {
    pub fn from_env() -> Self {
        let provisioning = ProvisioningConfig::from_env();
        let transform = TransformOptions {
            display: provisioning.display.clone(),
        };
        Self {
            provisioning,
            limits: ResourceLimits::from_env(),
            transform,
            host_env: HostEnv::from_process(),
        }
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

fn millis(d: Duration) -> u64 {
    d.as_millis() as u64
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}

pub struct ExecutionCoordinator {
    settings: ExecutorSettings,
    provisioner: EnvironmentProvisioner,
    runner: SandboxRunner,
}

impl ExecutionCoordinator {
    pub fn new(settings: ExecutorSettings, toolchain: Arc<dyn Toolchain>) -> Self {
        let provisioner =
            EnvironmentProvisioner::new(settings.provisioning.clone(), toolchain.clone());
        let runner = SandboxRunner::new(toolchain, &settings.provisioning, settings.limits);
        Self {
            settings,
            provisioner,
            runner,
        }
    }

    /// Coordinator over the host's npm / npx toolchain.
    pub fn with_node_toolchain(settings: ExecutorSettings) -> Self {
        Self::new(settings, Arc::new(NodeToolchain::detect()))
    }

    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    /// Run one request to completion. Never fails: every outcome, including
    /// a panic inside the pipeline, comes back as an envelope.
    pub fn execute(&self, request: &ExecutionRequest) -> ResultEnvelope {
        let request_id = uuid::Uuid::new_v4().to_string();
        let span = tracing::info_span!(
            "execute",
            request_id = %request_id,
            tool_type = %request.tool_type
        );
        let _enter = span.enter();
        let started = Instant::now();

        audit_execution_started(&request_id, &request.tool_type, request.dependencies.len());

        let envelope = match catch_unwind(AssertUnwindSafe(|| self.run_pipeline(request, started))) {
            Ok(envelope) => envelope,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::error!("execution panicked: {}", message);
                self.unexpected(request, message, started)
            }
        };

        let elapsed_ms = millis(started.elapsed());
        info_log!(
            success = envelope.success,
            phase = envelope.phase().unwrap_or("done"),
            total_found = envelope.total_found,
            elapsed_ms,
            "execution finished"
        );
        audit_execution_completed(
            &request_id,
            &request.tool_type,
            envelope.success,
            envelope.phase(),
            elapsed_ms,
        );
        envelope
    }

    fn run_pipeline(&self, request: &ExecutionRequest, started: Instant) -> ResultEnvelope {
        // validating
        if let Err(e) = request.validate() {
            tracing::warn!("request rejected: {}", e);
            return ResultEnvelope::failure(
                &request.tool_type,
                request.test_mode,
                vec![e.to_string()],
                0,
            )
            .with_meta("error", e.reason());
        }

        let manifest = build_manifest(&request.dependencies, &request.tool_type);
        tracing::debug!(
            packages = manifest.requested.len(),
            requires_browser = manifest.requires_browser(),
            requires_llm = manifest.requires_llm(),
            "manifest built"
        );
        let env = match resolve_execution_env(&self.settings.host_env, manifest.requires_llm()) {
            Ok(env) => env,
            Err(e) => return self.provision_failure(request, &e, started),
        };
        let script = transform_script(
            &request.script_code,
            &request.dependencies,
            &request.tool_type,
            &self.settings.transform,
        );

        // provisioning
        let workspace = match self.provisioner.provision(&manifest, &script, &env) {
            Ok(ws) => ws,
            Err(e) => return self.provision_failure(request, &e, started),
        };

        // executing
        let timeout_secs = self
            .settings
            .limits
            .script_timeout_secs(request.timeout_seconds);
        let params = RunParams {
            max_items: request.max_items,
            test_mode: request.test_mode,
            timeout: Duration::from_secs(timeout_secs),
        };
        let outcome = match self.runner.run(&workspace, &env, &params) {
            Ok(outcome) => outcome,
            Err(e) => return self.unexpected(request, format!("{:#}", e), started),
        };
        drop(workspace);

        // extracting
        self.envelope_from_outcome(request, outcome, timeout_secs, started)
    }

    fn provision_failure(
        &self,
        request: &ExecutionRequest,
        error: &ProvisionError,
        started: Instant,
    ) -> ResultEnvelope {
        tracing::error!(phase = %error.phase(), "{}", error);
        ResultEnvelope::failure(
            &request.tool_type,
            request.test_mode,
            error.errors(),
            millis(started.elapsed()),
        )
        .with_phase(error.phase())
    }

    fn unexpected(&self, request: &ExecutionRequest, message: String, started: Instant) -> ResultEnvelope {
        ResultEnvelope::failure(
            &request.tool_type,
            request.test_mode,
            vec![format!("Unexpected error: {}", message)],
            millis(started.elapsed()),
        )
        .with_phase(Phase::Unexpected)
        .with_meta("error", message)
    }

    fn envelope_from_outcome(
        &self,
        request: &ExecutionRequest,
        outcome: ExecutionOutcome,
        timeout_secs: u64,
        started: Instant,
    ) -> ResultEnvelope {
        let tool = request.tool_type.as_str();
        let test_mode = request.test_mode;
        let total_ms = millis(started.elapsed());

        if outcome.timed_out {
            tracing::warn!("script timed out after {}s", timeout_secs);
            return ResultEnvelope::failure(
                tool,
                test_mode,
                vec![format!(
                    "Script execution timed out after {} seconds",
                    timeout_secs
                )],
                outcome.elapsed_ms,
            )
            .with_phase(Phase::Timeout)
            .with_meta("timeout", true)
            .with_meta("totalTimeMs", total_ms)
            .with_meta("stdoutPreview", truncate_chars(&outcome.stdout, PREVIEW_CHARS));
        }

        if outcome.memory_exceeded {
            return ResultEnvelope::failure(
                tool,
                test_mode,
                vec![format!(
                    "Script exceeded memory limit of {} MB",
                    self.settings.limits.max_memory_mb
                )],
                outcome.elapsed_ms,
            )
            .with_phase(Phase::Execution)
            .with_meta("memoryExceeded", true)
            .with_meta("totalTimeMs", total_ms)
            .with_meta("stderrPreview", truncate_chars(&outcome.stderr, PREVIEW_CHARS));
        }

        if outcome.exit_code != 0 {
            tracing::warn!(exit_code = outcome.exit_code, "script failed");
            return ResultEnvelope::failure(
                tool,
                test_mode,
                vec![format!(
                    "Script execution failed: {}",
                    truncate_chars(&outcome.stderr, ERROR_PREVIEW_CHARS)
                )],
                outcome.elapsed_ms,
            )
            .with_phase(Phase::Execution)
            .with_meta("returnCode", outcome.exit_code)
            .with_meta("totalTimeMs", total_ms)
            .with_meta("stderrPreview", truncate_chars(&outcome.stderr, PREVIEW_CHARS))
            .with_meta("stdoutPreview", truncate_chars(&outcome.stdout, PREVIEW_CHARS));
        }

        match extract_result(&outcome.stdout) {
            Some(payload) => {
                let limited = payload.data.len() as u64 >= request.max_items;
                ResultEnvelope::success(tool, test_mode, payload.data, outcome.elapsed_ms)
                    .with_meta("originalCount", payload.reported_total.unwrap_or(0))
                    .with_meta("limited", limited)
                    .with_meta("totalTimeMs", total_ms)
            }
            None => {
                tracing::warn!("script exited 0 without a structured payload");
                ResultEnvelope::success(tool, test_mode, Vec::new(), outcome.elapsed_ms)
                    .with_error("Script executed successfully but no structured output found")
                    .with_phase(Phase::OutputParsing)
                    .with_meta("totalTimeMs", total_ms)
                    .with_meta("stdoutPreview", truncate_chars(&outcome.stdout, PREVIEW_CHARS))
            }
        }
    }
}
