//! Build ephemeral Node workspaces for one script run.
//!
//! A workspace is a fresh temporary directory owned by [`ProvisionedWorkspace`];
//! dropping it removes the directory, whatever happened in between.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use scrapelite_core::config::ProvisioningConfig;
use scrapelite_core::protocol::Phase;
use serde_json::json;
use tempfile::TempDir;
use thiserror::Error;

use super::host::ExecutionEnv;
use crate::common::{run_bounded, LaunchSpec, ProcessOutput, WaitLimits};
use crate::info_log;
use crate::manifest::{DependencyManifest, STEALTH_PACKAGES};
use crate::toolchain::{Toolchain, SCRIPT_FILE};

/// Failures that stop a request before the script runs.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("No LLM API key configured for Stagehand.")]
    MissingLlmCredentials,

    #[error("Workspace setup failed: {0}")]
    Workspace(String),

    #[error("Dependency installation failed: {stderr}")]
    DependencyInstall { stderr: String },
}

impl ProvisionError {
    pub fn phase(&self) -> Phase {
        match self {
            Self::MissingLlmCredentials => Phase::EnvironmentValidation,
            Self::DependencyInstall { .. } => Phase::DependencyInstallation,
            Self::Workspace(_) => Phase::Unexpected,
        }
    }

    /// Lines for the envelope's `errors` list.
    pub fn errors(&self) -> Vec<String> {
        match self {
            Self::MissingLlmCredentials => vec![
                self.to_string(),
                "Neither OPENAI_API_KEY nor ANTHROPIC_API_KEY found in the executor environment."
                    .to_string(),
                "Set OPENAI_API_KEY or ANTHROPIC_API_KEY for the executor process.".to_string(),
            ],
            _ => vec![self.to_string()],
        }
    }
}

impl From<std::io::Error> for ProvisionError {
    fn from(e: std::io::Error) -> Self {
        Self::Workspace(e.to_string())
    }
}

/// A provisioned request workspace. Removed from disk on drop.
#[derive(Debug)]
pub struct ProvisionedWorkspace {
    dir: TempDir,
    requires_browser: bool,
}

impl ProvisionedWorkspace {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn script_path(&self) -> PathBuf {
        self.dir.path().join(SCRIPT_FILE)
    }

    pub fn node_modules(&self) -> PathBuf {
        self.dir.path().join("node_modules")
    }

    pub fn requires_browser(&self) -> bool {
        self.requires_browser
    }
}

fn tsconfig() -> serde_json::Value {
    json!({
        "compilerOptions": {
            "target": "ES2020",
            "module": "CommonJS",
            "moduleResolution": "node",
            "allowSyntheticDefaultImports": true,
            "esModuleInterop": true,
            "strict": false,
            "skipLibCheck": true,
            "lib": ["ES2020", "DOM", "DOM.Iterable"],
        },
        "ts-node": {
            "transpileOnly": true,
        },
    })
}

fn write_json(path: &Path, value: &serde_json::Value) -> Result<(), ProvisionError> {
    let text = serde_json::to_string_pretty(value)
        .with_context(|| format!("Serialize {}", path.display()))
        .map_err(|e| ProvisionError::Workspace(format!("{:#}", e)))?;
    std::fs::write(path, text)?;
    Ok(())
}

/// Describe a failed step: stderr verbatim, or why there is none.
fn failure_text(out: &ProcessOutput, timeout: Duration) -> String {
    if out.termination.is_some() {
        format!(
            "timed out after {} seconds\n{}",
            timeout.as_secs(),
            out.stderr
        )
    } else {
        out.stderr.clone()
    }
}

/// Turns a manifest plus a transformed script into a ready workspace.
pub struct EnvironmentProvisioner {
    config: ProvisioningConfig,
    toolchain: Arc<dyn Toolchain>,
}

impl EnvironmentProvisioner {
    pub fn new(config: ProvisioningConfig, toolchain: Arc<dyn Toolchain>) -> Self {
        Self { config, toolchain }
    }

    fn create_workspace(&self) -> Result<TempDir, ProvisionError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("scrapelite-");
        let dir = match &self.config.work_root {
            Some(root) => {
                std::fs::create_dir_all(root)?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };
        Ok(dir)
    }

    fn step_env(&self, env: &ExecutionEnv) -> Vec<(String, String)> {
        let mut env = env.clone();
        if let Some(cache) = &self.config.npm_cache_dir {
            match std::fs::create_dir_all(cache) {
                Ok(()) => env = env.with("npm_config_cache", cache.to_string_lossy()),
                Err(e) => tracing::warn!("npm cache dir {} unusable: {}", cache.display(), e),
            }
        }
        env.vars().to_vec()
    }

    fn run_step(
        &self,
        dir: &Path,
        spec: &LaunchSpec,
        env: &[(String, String)],
        timeout: Duration,
    ) -> anyhow::Result<ProcessOutput> {
        tracing::debug!(command = %spec.display(), timeout_secs = timeout.as_secs(), "provisioning step");
        run_bounded(spec, dir, env, WaitLimits::timeout(timeout))
    }

    /// Create and populate a workspace.
    ///
    /// Dependency installation is the only fatal step. The anti-detection
    /// add-ons and the browser binary are best-effort: a failure there is
    /// logged and the script still runs.
    pub fn provision(
        &self,
        manifest: &DependencyManifest,
        script: &str,
        env: &ExecutionEnv,
    ) -> Result<ProvisionedWorkspace, ProvisionError> {
        let dir = self.create_workspace()?;
        let root = dir.path();
        tracing::debug!(workspace = %root.display(), "workspace created");

        write_json(&root.join("package.json"), &manifest.to_package_json())?;
        std::fs::write(root.join(SCRIPT_FILE), script)?;

        let step_env = self.step_env(env);

        info_log!("Installing dependencies with {}", self.toolchain.name());
        let install = self.toolchain.install();
        match self.run_step(root, &install, &step_env, self.config.install_timeout) {
            Ok(out) if out.success() => {
                tracing::debug!(elapsed_ms = out.elapsed.as_millis() as u64, "dependencies installed");
            }
            Ok(out) => {
                tracing::error!(exit_code = out.exit_code, "dependency installation failed");
                return Err(ProvisionError::DependencyInstall {
                    stderr: failure_text(&out, self.config.install_timeout),
                });
            }
            Err(e) => {
                tracing::error!("dependency installation failed: {:#}", e);
                return Err(ProvisionError::DependencyInstall {
                    stderr: format!("{:#}", e),
                });
            }
        }

        let requires_browser = manifest.requires_browser();
        if requires_browser && !manifest.has_stealth() {
            self.install_stealth(root, &step_env);
        }
        if requires_browser {
            if self.config.skip_browser_install {
                tracing::debug!("browser install skipped by configuration");
            } else {
                self.install_browser(root, &step_env);
            }
        }

        write_json(&root.join("tsconfig.json"), &tsconfig())?;

        Ok(ProvisionedWorkspace {
            dir,
            requires_browser,
        })
    }

    fn install_stealth(&self, root: &Path, env: &[(String, String)]) {
        info_log!("Installing anti-detection packages");
        let spec = self.toolchain.install_packages(STEALTH_PACKAGES);
        match self.run_step(root, &spec, env, self.config.stealth_install_timeout) {
            Ok(out) if out.success() => {}
            Ok(out) => tracing::warn!(
                "Anti-detection install failed, continuing: {}",
                failure_text(&out, self.config.stealth_install_timeout).trim()
            ),
            Err(e) => tracing::warn!("Anti-detection install failed, continuing: {:#}", e),
        }
    }

    fn install_browser(&self, root: &Path, env: &[(String, String)]) {
        info_log!("Installing browser binaries");
        let first = self.toolchain.browser_install(true);
        match self.run_step(root, &first, env, self.config.browser_install_timeout) {
            Ok(out) if out.success() => return,
            Ok(out) => tracing::warn!(
                "Browser install with system deps failed, retrying without: {}",
                failure_text(&out, self.config.browser_install_timeout).trim()
            ),
            Err(e) => tracing::warn!("Browser install with system deps failed, retrying without: {:#}", e),
        }

        let retry = self.toolchain.browser_install(false);
        let detail = match self.run_step(root, &retry, env, self.config.browser_retry_timeout) {
            Ok(out) if out.success() => return,
            Ok(out) => failure_text(&out, self.config.browser_retry_timeout),
            Err(e) => format!("{:#}", e),
        };
        tracing::warn!(
            phase = %Phase::BrowserProvisioning,
            "Browser install failed, continuing without it: {}",
            detail.trim()
        );
    }
}
