use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

use scrapelite_core::config::{LimitsConfig, ProvisioningConfig};

use crate::common::{run_bounded, LaunchSpec, Termination, WaitLimits};
use crate::env::{ExecutionEnv, ProvisionedWorkspace};
use crate::info_log;
use crate::toolchain::{Toolchain, SCRIPT_FILE};

/// Resource limits for a script run.
///
/// Defaults come from `LimitsConfig`:
/// - `max_memory_mb`: SCRAPELITE_MAX_MEMORY_MB (2048 MB), `0` disables the bound
/// - `timeout_secs`: SCRAPELITE_TIMEOUT_SECS (300 seconds)
#[derive(Debug, Clone, Copy)]
pub struct ResourceLimits {
    pub max_memory_mb: u64,
    pub timeout_secs: u64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        let cfg = LimitsConfig::default();
        Self {
            max_memory_mb: cfg.max_memory_mb,
            timeout_secs: cfg.timeout_secs,
        }
    }
}

impl ResourceLimits {
    /// Get memory limit in bytes
    pub fn max_memory_bytes(&self) -> u64 {
        self.max_memory_mb.saturating_mul(1024 * 1024)
    }

    /// Script timeout in seconds: the request's own value, else the default.
    pub fn script_timeout_secs(&self, requested: Option<u64>) -> u64 {
        requested.unwrap_or(self.timeout_secs)
    }

    /// Load resource limits from environment variables
    pub fn from_env() -> Self {
        let cfg = LimitsConfig::from_env();
        Self {
            max_memory_mb: cfg.max_memory_mb,
            timeout_secs: cfg.timeout_secs,
        }
    }

    /// Override with CLI parameters
    pub fn with_cli_overrides(mut self, cli_max_memory: Option<u64>, cli_timeout: Option<u64>) -> Self {
        if let Some(max_memory) = cli_max_memory {
            self.max_memory_mb = max_memory;
        }
        if let Some(timeout) = cli_timeout {
            self.timeout_secs = timeout;
        }
        self
    }
}

/// Per-request run parameters.
#[derive(Debug, Clone, Copy)]
pub struct RunParams {
    pub max_items: u64,
    pub test_mode: bool,
    pub timeout: Duration,
}

/// What the script did. Produced exactly once per executed request.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub elapsed_ms: u64,
    pub timed_out: bool,
    pub memory_exceeded: bool,
}

/// Runs the workspace script under the time and memory bounds.
pub struct SandboxRunner {
    toolchain: Arc<dyn Toolchain>,
    display: String,
    screen: String,
    limits: ResourceLimits,
}

impl SandboxRunner {
    pub fn new(
        toolchain: Arc<dyn Toolchain>,
        provisioning: &ProvisioningConfig,
        limits: ResourceLimits,
    ) -> Self {
        Self {
            toolchain,
            display: provisioning.display.clone(),
            screen: provisioning.screen.clone(),
            limits,
        }
    }

    /// Script command, under a virtual display when a browser is needed and
    /// one is available.
    pub fn launch_spec(&self, requires_browser: bool) -> LaunchSpec {
        let direct = self.toolchain.script_launch(SCRIPT_FILE);
        if !requires_browser {
            return direct;
        }
        match self.toolchain.display_wrapper(direct.clone(), &self.screen) {
            Some(wrapped) => wrapped,
            None => {
                tracing::warn!("No virtual display wrapper available, launching directly");
                direct
            }
        }
    }

    fn child_env(
        &self,
        workspace: &ProvisionedWorkspace,
        env: &ExecutionEnv,
        params: &RunParams,
    ) -> Vec<(String, String)> {
        env.clone()
            .with("NODE_PATH", workspace.node_modules().to_string_lossy())
            .with("MAX_ITEMS", params.max_items.to_string())
            .with("TEST_MODE", params.test_mode.to_string())
            .with_default("DISPLAY", self.display.as_str())
            .with("TMPDIR", workspace.path().to_string_lossy())
            .vars()
            .to_vec()
    }

    /// Run the script. `Err` only when the process could not be started or
    /// waited on; timeouts and non-zero exits are reported in the outcome.
    pub fn run(
        &self,
        workspace: &ProvisionedWorkspace,
        env: &ExecutionEnv,
        params: &RunParams,
    ) -> Result<ExecutionOutcome> {
        let spec = self.launch_spec(workspace.requires_browser());
        let child_env = self.child_env(workspace, env, params);
        let limits = WaitLimits {
            timeout: params.timeout,
            memory_limit_bytes: (self.limits.max_memory_mb > 0)
                .then(|| self.limits.max_memory_bytes()),
        };

        info_log!(
            "Running script (timeout {}s, max_items {})",
            params.timeout.as_secs(),
            params.max_items
        );
        tracing::debug!(command = %spec.display(), "script launch");

        let out = run_bounded(&spec, workspace.path(), &child_env, limits)?;
        let timed_out = out.termination == Some(Termination::Timeout);
        let memory_exceeded = matches!(out.termination, Some(Termination::MemoryLimit { .. }));
        if let Some(Termination::MemoryLimit { used_bytes }) = out.termination {
            tracing::warn!(
                "Script killed: memory {} MB over limit {} MB",
                used_bytes / (1024 * 1024),
                self.limits.max_memory_mb
            );
        }

        Ok(ExecutionOutcome {
            exit_code: out.exit_code,
            stdout: out.stdout,
            stderr: out.stderr,
            elapsed_ms: out.elapsed.as_millis() as u64,
            timed_out,
            memory_exceeded,
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::env::{resolve_execution_env, EnvironmentProvisioner, HostEnv};
    use crate::manifest::build_manifest;

    struct ShellToolchain {
        wrapper: bool,
    }

    impl Toolchain for ShellToolchain {
        fn name(&self) -> &str {
            "shell"
        }
        fn install(&self) -> LaunchSpec {
            LaunchSpec::new("/bin/sh", ["-c", "mkdir node_modules"])
        }
        fn install_packages(&self, _packages: &[&str]) -> LaunchSpec {
            LaunchSpec::new("/bin/sh", ["-c", "true"])
        }
        fn browser_install(&self, _with_deps: bool) -> LaunchSpec {
            LaunchSpec::new("/bin/sh", ["-c", "true"])
        }
        fn script_launch(&self, script_file: &str) -> LaunchSpec {
            LaunchSpec::new("/bin/sh", [script_file])
        }
        fn display_wrapper(&self, inner: LaunchSpec, screen: &str) -> Option<LaunchSpec> {
            self.wrapper.then(|| {
                inner.wrapped_in("/usr/bin/env", [format!("SCREEN_GEOMETRY={}", screen)])
            })
        }
    }

    fn setup(
        script: &str,
        tool_type: &str,
        wrapper: bool,
    ) -> (tempfile::TempDir, SandboxRunner, ProvisionedWorkspace, ExecutionEnv) {
        let root = tempfile::tempdir().unwrap();
        let toolchain: Arc<dyn Toolchain> = Arc::new(ShellToolchain { wrapper });
        let config = ProvisioningConfig {
            work_root: Some(root.path().to_path_buf()),
            npm_cache_dir: None,
            ..ProvisioningConfig::default()
        };
        let host = HostEnv::from_vars([
            ("PATH", std::env::var("PATH").unwrap_or_default()),
            ("OPENAI_MODEL", "gpt-test".to_string()),
        ]);
        let env = resolve_execution_env(&host, false).unwrap();
        let provisioner = EnvironmentProvisioner::new(config.clone(), toolchain.clone());
        let ws = provisioner
            .provision(&build_manifest(&[], tool_type), script, &env)
            .unwrap();
        let runner = SandboxRunner::new(toolchain, &config, ResourceLimits::default());
        (root, runner, ws, env)
    }

    fn params(timeout: Duration) -> RunParams {
        RunParams {
            max_items: 7,
            test_mode: true,
            timeout,
        }
    }

    #[test]
    fn test_child_environment() {
        let script = "echo \"$MAX_ITEMS|$TEST_MODE|$DISPLAY|$OPENAI_MODEL\"; echo \"$NODE_PATH\"; echo \"$TMPDIR\"";
        let (_root, runner, ws, env) = setup(script, "test", false);
        let out = runner.run(&ws, &env, &params(Duration::from_secs(10))).unwrap();

        let lines: Vec<&str> = out.stdout.lines().collect();
        assert_eq!(lines[0], "7|true|:99|gpt-test");
        assert_eq!(lines[1], ws.node_modules().to_string_lossy());
        assert_eq!(lines[2], ws.path().to_string_lossy());
        assert_eq!(out.exit_code, 0);
        assert!(!out.timed_out);
    }

    #[test]
    fn test_nonzero_exit_is_an_outcome() {
        let (_root, runner, ws, env) = setup("echo boom >&2; exit 2", "test", false);
        let out = runner.run(&ws, &env, &params(Duration::from_secs(10))).unwrap();
        assert_eq!(out.exit_code, 2);
        assert_eq!(out.stderr.trim(), "boom");
    }

    #[test]
    fn test_timeout_marks_outcome() {
        let (_root, runner, ws, env) = setup("echo partial; sleep 5", "test", false);
        let out = runner.run(&ws, &env, &params(Duration::from_millis(500))).unwrap();
        assert!(out.timed_out);
        assert!(!out.memory_exceeded);
        assert_eq!(out.stdout.trim(), "partial");
        assert!(out.elapsed_ms >= 500 && out.elapsed_ms < 3000);
    }

    #[test]
    fn test_browser_scripts_use_display_wrapper() {
        let (_root, runner, ws, env) = setup("echo \"$SCREEN_GEOMETRY\"", "playwright", true);
        assert!(ws.requires_browser());
        let out = runner.run(&ws, &env, &params(Duration::from_secs(10))).unwrap();
        assert_eq!(out.stdout.trim(), "1024x768x24");
    }

    #[test]
    fn test_missing_wrapper_falls_back_to_direct_launch() {
        let (_root, runner, _ws, _env) = setup("true", "playwright", false);
        assert_eq!(runner.launch_spec(true).display(), "/bin/sh scraper.ts");
    }

    #[test]
    fn test_resource_limits_cli_overrides() {
        let limits = ResourceLimits::default().with_cli_overrides(Some(512), None);
        assert_eq!(limits.max_memory_mb, 512);
        assert_eq!(limits.timeout_secs, 300);
        assert_eq!(limits.max_memory_bytes(), 512 * 1024 * 1024);
    }

    #[test]
    fn test_huge_memory_limit_saturates() {
        let limits = ResourceLimits {
            max_memory_mb: u64::MAX,
            timeout_secs: 1,
        };
        assert_eq!(limits.max_memory_bytes(), u64::MAX);
        let limits = ResourceLimits {
            max_memory_mb: u64::MAX / 1024,
            timeout_secs: 1,
        };
        assert_eq!(limits.max_memory_bytes(), u64::MAX);
    }

    #[test]
    fn test_script_timeout_falls_back_to_default() {
        let limits = ResourceLimits::default().with_cli_overrides(None, Some(7));
        assert_eq!(limits.script_timeout_secs(None), 7);
        assert_eq!(limits.script_timeout_secs(Some(2)), 2);
    }
}
